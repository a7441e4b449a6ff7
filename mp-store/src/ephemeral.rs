//! Ephemeral store files and their cleanup registry.
//!
//! An ephemeral store lives in a fresh temp directory. The directory is
//! deleted when the guard drops (scope exit, including unwinding) and the
//! path is tracked in a process-wide registry so an embedding host's exit
//! handler can sweep anything still alive at shutdown. A forceful kill can
//! skip both; that is accepted.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{LazyLock, Mutex};
use tempfile::TempDir;

static REGISTRY: LazyLock<Mutex<HashSet<PathBuf>>> = LazyLock::new(|| Mutex::new(HashSet::new()));

#[derive(Debug)]
pub(crate) struct EphemeralGuard {
    path: PathBuf,
    // Deletes the directory on drop.
    _dir: TempDir,
}

impl EphemeralGuard {
    pub(crate) fn new() -> std::io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("mixpanel-data-").tempdir()?;
        let path = dir.path().join("ephemeral.db");
        REGISTRY.lock().expect("ephemeral registry poisoned").insert(path.clone());
        Ok(EphemeralGuard { path, _dir: dir })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for EphemeralGuard {
    fn drop(&mut self) {
        REGISTRY.lock().expect("ephemeral registry poisoned").remove(&self.path);
    }
}

/// Delete every ephemeral store file still registered. Intended for a host's
/// process-exit handler; stores dropped normally have already deregistered.
pub fn cleanup_registered() {
    let paths: Vec<PathBuf> = {
        let registry = REGISTRY.lock().expect("ephemeral registry poisoned");
        registry.iter().cloned().collect()
    };
    for path in paths {
        if let Some(parent) = path.parent() {
            let _ = std::fs::remove_dir_all(parent);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_registers_and_deregisters() {
        let guard = EphemeralGuard::new().unwrap();
        let path = guard.path().to_path_buf();
        assert!(REGISTRY.lock().unwrap().contains(&path));
        drop(guard);
        assert!(!REGISTRY.lock().unwrap().contains(&path));
    }

    #[test]
    fn drop_removes_directory() {
        let guard = EphemeralGuard::new().unwrap();
        let dir = guard.path().parent().unwrap().to_path_buf();
        std::fs::write(guard.path(), b"x").unwrap();
        drop(guard);
        assert!(!dir.exists());
    }
}
