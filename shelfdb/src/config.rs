//! Manager settings
//!
//! Tunables for the connection manager itself (timeouts, pool defaults, key
//! policy). These are operator settings, not the client-supplied target
//! configuration, and are loaded from `shelfdb.toml` plus `SHELFDB_*`
//! environment variables.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// Default settings file looked up in the working directory
pub const DEFAULT_SETTINGS_FILE: &str = "shelfdb.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerSettings {
    /// Upper bound for a whole dial (bootstrap + pool open + round-trip), seconds
    #[serde(default = "default_dial_timeout")]
    pub dial_timeout_secs: u64,

    /// Document-store server selection timeout, seconds
    #[serde(default = "default_server_selection_timeout")]
    pub server_selection_timeout_secs: u64,

    /// Pool size used when the target config does not set `poolSize`
    #[serde(default = "default_pool_size")]
    pub default_pool_size: u32,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    #[serde(default = "default_max_lifetime")]
    pub max_lifetime_secs: u64,

    /// Append a credential fingerprint to registry keys
    #[serde(default = "default_true")]
    pub key_includes_credentials: bool,

    /// Ping a cached handle before handing it out again
    #[serde(default = "default_true")]
    pub verify_on_reuse: bool,

    /// Character set for relational targets that do not set one
    #[serde(default = "default_charset")]
    pub default_charset: String,
}

fn default_dial_timeout() -> u64 {
    10
}
fn default_server_selection_timeout() -> u64 {
    5
}
fn default_pool_size() -> u32 {
    10
}
fn default_idle_timeout() -> u64 {
    600
} // 10 minutes
fn default_max_lifetime() -> u64 {
    1800
} // 30 minutes
fn default_true() -> bool {
    true
}
fn default_charset() -> String {
    "utf8mb4".to_string()
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            dial_timeout_secs: default_dial_timeout(),
            server_selection_timeout_secs: default_server_selection_timeout(),
            default_pool_size: default_pool_size(),
            idle_timeout_secs: default_idle_timeout(),
            max_lifetime_secs: default_max_lifetime(),
            key_includes_credentials: true,
            verify_on_reuse: true,
            default_charset: default_charset(),
        }
    }
}

impl ManagerSettings {
    /// Load settings: `SHELFDB_CONFIG` or `./shelfdb.toml` if present, then env overrides
    pub fn load() -> Result<Self> {
        let mut settings = match env::var("SHELFDB_CONFIG") {
            Ok(path) => {
                log::info!("Loading manager settings from SHELFDB_CONFIG: {}", path);
                Self::from_file(path)?
            }
            Err(_) if Path::new(DEFAULT_SETTINGS_FILE).exists() => {
                Self::from_file(DEFAULT_SETTINGS_FILE)?
            }
            Err(_) => {
                log::debug!("No settings file found, using defaults");
                Self::default()
            }
        };

        settings.apply_env_overrides()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from a TOML file (no env overrides)
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let content = fs::read_to_string(path_ref).map_err(|e| {
            Error::settings(format!(
                "Failed to read settings file '{}': {}. Make sure the file exists and is readable.",
                path_ref.display(),
                e
            ))
        })?;

        let settings: ManagerSettings = toml::from_str(&content).map_err(|e| {
            Error::settings(format!(
                "Failed to parse settings file '{}': {}. Check TOML syntax.",
                path_ref.display(),
                e
            ))
        })?;

        log::debug!("Loaded manager settings from: {}", path_ref.display());
        Ok(settings)
    }

    /// Defaults with environment variable overrides applied
    pub fn from_env() -> Result<Self> {
        let mut settings = Self::default();
        settings.apply_env_overrides()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.dial_timeout_secs == 0 {
            return Err(Error::settings("dial_timeout_secs cannot be 0"));
        }
        if self.server_selection_timeout_secs == 0 {
            return Err(Error::settings("server_selection_timeout_secs cannot be 0"));
        }
        if self.default_pool_size == 0 {
            return Err(Error::settings("default_pool_size cannot be 0"));
        }
        if self.default_charset.is_empty()
            || !self
                .default_charset
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(Error::settings(format!(
                "Invalid default_charset: '{}'",
                self.default_charset
            )));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| env::var(name).ok())
    }

    /// Apply `SHELFDB_*` overrides from an arbitrary lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(name: &str, value: String) -> Result<T> {
            value
                .trim()
                .parse()
                .map_err(|_| Error::settings(format!("Invalid {} value", name)))
        }

        if let Some(v) = lookup("SHELFDB_DIAL_TIMEOUT") {
            self.dial_timeout_secs = parse("SHELFDB_DIAL_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("SHELFDB_SERVER_SELECTION_TIMEOUT") {
            self.server_selection_timeout_secs = parse("SHELFDB_SERVER_SELECTION_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("SHELFDB_POOL_SIZE") {
            self.default_pool_size = parse("SHELFDB_POOL_SIZE", v)?;
        }
        if let Some(v) = lookup("SHELFDB_IDLE_TIMEOUT") {
            self.idle_timeout_secs = parse("SHELFDB_IDLE_TIMEOUT", v)?;
        }
        if let Some(v) = lookup("SHELFDB_MAX_LIFETIME") {
            self.max_lifetime_secs = parse("SHELFDB_MAX_LIFETIME", v)?;
        }
        if let Some(v) = lookup("SHELFDB_KEY_INCLUDES_CREDENTIALS") {
            self.key_includes_credentials = parse("SHELFDB_KEY_INCLUDES_CREDENTIALS", v)?;
        }
        if let Some(v) = lookup("SHELFDB_VERIFY_ON_REUSE") {
            self.verify_on_reuse = parse("SHELFDB_VERIFY_ON_REUSE", v)?;
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_secs(self.server_selection_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_secs(self.max_lifetime_secs)
    }
}
