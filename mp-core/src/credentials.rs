//! The frozen credential record and the resolution chain.
//!
//! Resolution order: process environment (only when all four `MP_*`
//! credential variables are present), then the named account, then the
//! default account. A session resolves once and the record is never mutated.

use crate::accounts::ConfigStore;
use crate::error::{Error, Result};
use crate::region::Region;
use crate::secret::Secret;
use std::str::FromStr;

const ENV_USERNAME: &str = "MP_USERNAME";
const ENV_SECRET: &str = "MP_SECRET";
const ENV_PROJECT_ID: &str = "MP_PROJECT_ID";
const ENV_REGION: &str = "MP_REGION";

/// Immutable per-session credentials.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub secret: Secret,
    pub project_id: String,
    pub region: Region,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        secret: impl Into<Secret>,
        project_id: impl Into<String>,
        region: Region,
    ) -> Self {
        Credentials {
            username: username.into(),
            secret: secret.into(),
            project_id: project_id.into(),
            region,
        }
    }
}

/// Resolve credentials from the environment, a named account, or the
/// default account, in that order.
pub fn resolve_credentials(account: Option<&str>) -> Result<Credentials> {
    let store = ConfigStore::new()?;
    resolve_with(&store, account, |key| std::env::var(key).ok())
}

/// Resolution against an explicit store and environment lookup. The
/// injectable lookup keeps tests hermetic under parallel execution.
pub fn resolve_with(
    store: &ConfigStore,
    account: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<Credentials> {
    // Env wins only when the full quadruple is present.
    if let (Some(username), Some(secret), Some(project_id), Some(region)) = (
        env(ENV_USERNAME),
        env(ENV_SECRET),
        env(ENV_PROJECT_ID),
        env(ENV_REGION),
    ) {
        return Ok(Credentials {
            username,
            secret: Secret::new(secret),
            project_id,
            region: Region::from_str(&region)?,
        });
    }

    let resolved = match account {
        Some(name) => store.get(name)?,
        None => store.default_account()?.ok_or_else(|| {
            Error::config(
                "no credentials found: set the MP_* environment variables or add an account",
            )
        })?,
    };

    Ok(Credentials {
        username: resolved.username,
        secret: resolved.secret,
        project_id: resolved.project_id,
        region: resolved.region,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    fn store_with_default() -> (TempDir, ConfigStore) {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::with_path(dir.path().join("config.toml"));
        store.add("prod", "cfg_user", Secret::new("cfg_secret"), "999", Region::Us).unwrap();
        (dir, store)
    }

    #[test]
    fn env_wins_when_all_four_are_set() {
        let (_dir, store) = store_with_default();
        let creds = resolve_with(
            &store,
            None,
            env_of(&[
                ("MP_USERNAME", "env_u"),
                ("MP_SECRET", "env_s"),
                ("MP_PROJECT_ID", "123"),
                ("MP_REGION", "eu"),
            ]),
        )
        .unwrap();
        assert_eq!(creds.username, "env_u");
        assert_eq!(creds.project_id, "123");
        assert_eq!(creds.region, Region::Eu);
    }

    #[test]
    fn partial_env_falls_through_to_account() {
        let (_dir, store) = store_with_default();
        let creds = resolve_with(
            &store,
            None,
            env_of(&[("MP_USERNAME", "env_u"), ("MP_SECRET", "env_s")]),
        )
        .unwrap();
        assert_eq!(creds.username, "cfg_user");
    }

    #[test]
    fn named_account_beats_default() {
        let (_dir, store) = store_with_default();
        store.add("staging", "stg_user", Secret::new("s"), "111", Region::In).unwrap();
        let creds = resolve_with(&store, Some("staging"), |_| None).unwrap();
        assert_eq!(creds.username, "stg_user");
        assert_eq!(creds.region, Region::In);
    }

    #[test]
    fn missing_everything_is_config_error() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::with_path(dir.path().join("config.toml"));
        let err = resolve_with(&store, None, |_| None).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn unknown_named_account_is_not_found() {
        let (_dir, store) = store_with_default();
        let err = resolve_with(&store, Some("ghost"), |_| None).unwrap_err();
        assert_eq!(err.code(), "ACCOUNT_NOT_FOUND");
    }

    #[test]
    fn debug_output_redacts_secret() {
        let creds = Credentials::new("u", "topsecret", "1", Region::Us);
        let rendered = format!("{:?}", creds);
        assert!(!rendered.contains("topsecret"));
        assert!(rendered.contains("***"));
    }
}
