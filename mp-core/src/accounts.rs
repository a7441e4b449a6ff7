//! Persisted account records and the TOML config store.
//!
//! The on-disk format is a single TOML file with a top-level
//! `default = "<name>"` key and one `[accounts.<name>]` table per account:
//!
//! ```toml
//! default = "prod"
//!
//! [accounts.prod]
//! username = "svc.abc"
//! secret = "..."
//! project_id = "12345"
//! region = "us"
//! ```
//!
//! The file location is `~/.mixpanel_data/config.toml`, overridable with the
//! `MP_CONFIG_PATH` environment variable.

use crate::error::{Error, Result};
use crate::region::Region;
use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Directory under the user's home where config and store files live.
pub const APP_DIR: &str = ".mixpanel_data";

const CONFIG_FILE: &str = "config.toml";

/// A stored account, secret included. Never serialized directly; the config
/// store writes its own raw entry type and everything crossing a process
/// boundary goes through [`AccountInfo`].
#[derive(Debug, Clone)]
pub struct Account {
    pub name: String,
    pub username: String,
    pub secret: Secret,
    pub project_id: String,
    pub region: Region,
    pub is_default: bool,
}

/// The redacted form of [`Account`]: identical record minus the secret.
/// The only account shape exposed at process boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub name: String,
    pub username: String,
    pub project_id: String,
    pub region: Region,
    pub is_default: bool,
}

impl From<&Account> for AccountInfo {
    fn from(account: &Account) -> Self {
        AccountInfo {
            name: account.name.clone(),
            username: account.username.clone(),
            project_id: account.project_id.clone(),
            region: account.region,
            is_default: account.is_default,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(skip_serializing_if = "Option::is_none")]
    default: Option<String>,
    #[serde(default)]
    accounts: BTreeMap<String, AccountEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountEntry {
    username: String,
    secret: String,
    project_id: String,
    region: String,
}

/// File-backed account store.
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    /// Store at the default location, honoring `MP_CONFIG_PATH`.
    pub fn new() -> Result<Self> {
        if let Ok(path) = std::env::var("MP_CONFIG_PATH") {
            return Ok(ConfigStore { path: PathBuf::from(path) });
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::config("could not determine home directory"))?;
        Ok(ConfigStore { path: home.join(APP_DIR).join(CONFIG_FILE) })
    }

    /// Store at an explicit path (tests, embedding hosts).
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        ConfigStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<ConfigFile> {
        if !self.path.exists() {
            return Ok(ConfigFile::default());
        }
        let raw = fs::read_to_string(&self.path).map_err(|e| {
            Error::config(format!("failed to read {}: {e}", self.path.display()))
        })?;
        toml::from_str(&raw).map_err(|e| {
            Error::config(format!("failed to parse {}: {e}", self.path.display()))
        })
    }

    fn save(&self, config: &ConfigFile) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        let raw = toml::to_string_pretty(config)
            .map_err(|e| Error::config(format!("failed to encode config: {e}")))?;
        fs::write(&self.path, raw).map_err(|e| {
            Error::config(format!("failed to write {}: {e}", self.path.display()))
        })
    }

    /// Add a new account. The first account added becomes the default.
    pub fn add(
        &self,
        name: &str,
        username: &str,
        secret: Secret,
        project_id: &str,
        region: Region,
    ) -> Result<AccountInfo> {
        let mut config = self.load()?;
        if config.accounts.contains_key(name) {
            return Err(Error::AccountExists { name: name.to_string() });
        }
        config.accounts.insert(
            name.to_string(),
            AccountEntry {
                username: username.to_string(),
                secret: secret.expose().to_string(),
                project_id: project_id.to_string(),
                region: region.as_str().to_string(),
            },
        );
        if config.default.is_none() {
            config.default = Some(name.to_string());
        }
        self.save(&config)?;
        tracing::info!(account = name, "account added");
        self.get_info(name)
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        let mut config = self.load()?;
        if config.accounts.remove(name).is_none() {
            return Err(Error::AccountNotFound { name: name.to_string() });
        }
        if config.default.as_deref() == Some(name) {
            config.default = config.accounts.keys().next().cloned();
        }
        self.save(&config)?;
        tracing::info!(account = name, "account removed");
        Ok(())
    }

    pub fn set_default(&self, name: &str) -> Result<()> {
        let mut config = self.load()?;
        if !config.accounts.contains_key(name) {
            return Err(Error::AccountNotFound { name: name.to_string() });
        }
        config.default = Some(name.to_string());
        self.save(&config)
    }

    /// Full account record, secret included. Internal to credential
    /// resolution; boundaries use [`ConfigStore::get_info`].
    pub fn get(&self, name: &str) -> Result<Account> {
        let config = self.load()?;
        let entry = config
            .accounts
            .get(name)
            .ok_or_else(|| Error::AccountNotFound { name: name.to_string() })?;
        entry_to_account(name, entry, config.default.as_deref() == Some(name))
    }

    pub fn get_info(&self, name: &str) -> Result<AccountInfo> {
        self.get(name).map(|a| AccountInfo::from(&a))
    }

    /// All accounts, redacted, in name order.
    pub fn list(&self) -> Result<Vec<AccountInfo>> {
        let config = self.load()?;
        config
            .accounts
            .iter()
            .map(|(name, entry)| {
                entry_to_account(name, entry, config.default.as_deref() == Some(name.as_str()))
                    .map(|a| AccountInfo::from(&a))
            })
            .collect()
    }

    /// The default account, if one is configured.
    pub fn default_account(&self) -> Result<Option<Account>> {
        let config = self.load()?;
        let Some(name) = config.default.clone() else {
            return Ok(None);
        };
        let entry = config.accounts.get(&name).ok_or_else(|| {
            Error::config(format!("default account '{name}' is missing from the config file"))
        })?;
        entry_to_account(&name, entry, true).map(Some)
    }
}

fn entry_to_account(name: &str, entry: &AccountEntry, is_default: bool) -> Result<Account> {
    Ok(Account {
        name: name.to_string(),
        username: entry.username.clone(),
        secret: Secret::new(entry.secret.clone()),
        project_id: entry.project_id.clone(),
        region: Region::from_str(&entry.region)?,
        is_default,
    })
}
