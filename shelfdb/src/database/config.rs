//! Target database configuration
//!
//! `DatabaseConfig` is the JSON shape the settings UI, the persisted
//! client-side store and the CLI hand to the manager. It is untrusted input:
//! `check_corruption` and `validate` run before any network action.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;

/// Fragments of consumer email domains that must never appear in a host or password
const CONSUMER_EMAIL_FRAGMENTS: &[&str] = &[
    "gmail.com",
    "googlemail.com",
    "yahoo.",
    "hotmail.",
    "outlook.com",
    "live.com",
    "icloud.com",
    "aol.com",
    "protonmail.",
    "gmx.",
];

static HOST_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._:\-\[\]]+$").expect("DatabaseConfig: Invalid host pattern regex")
});

static DATABASE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_\-]{1,64}$")
        .expect("DatabaseConfig: Invalid database name pattern regex")
});

static CHARSET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{1,32}$").expect("DatabaseConfig: Invalid charset pattern regex")
});

/// Supported backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[serde(alias = "mariadb")]
    Mysql,
    #[serde(alias = "postgres", alias = "pg")]
    Postgresql,
    #[serde(alias = "mongo", alias = "document")]
    Mongodb,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Mysql => "mysql",
            BackendKind::Postgresql => "postgresql",
            BackendKind::Mongodb => "mongodb",
        }
    }

    /// Display name for logs and CLI output
    pub fn display_name(&self) -> &'static str {
        match self {
            BackendKind::Mysql => "MySQL",
            BackendKind::Postgresql => "PostgreSQL",
            BackendKind::Mongodb => "MongoDB",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            BackendKind::Mysql => 3306,
            BackendKind::Postgresql => 5432,
            BackendKind::Mongodb => 27017,
        }
    }

    pub fn is_relational(&self) -> bool {
        !matches!(self, BackendKind::Mongodb)
    }

    /// Parse a kind name, accepting the same aliases as the JSON form
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(BackendKind::Mysql),
            "postgresql" | "postgres" | "pg" => Ok(BackendKind::Postgresql),
            "mongodb" | "mongo" | "document" => Ok(BackendKind::Mongodb),
            other => Err(Error::config(format!("Unsupported database kind: '{}'", other))),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend-specific options
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool_size: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,

    /// Document store only: namespace holding the user's credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_source: Option<String>,
}

/// One backend target
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseConfig {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    pub database_name: String,

    #[serde(default)]
    pub options: ConnectionOptions,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("kind", &self.kind)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("database_name", &self.database_name)
            .field("options", &self.options)
            .finish()
    }
}

impl DatabaseConfig {
    /// Create a config with the kind's default port and no credentials
    pub fn new(kind: BackendKind, host: impl Into<String>, database_name: impl Into<String>) -> Self {
        Self {
            kind,
            host: host.into(),
            port: kind.default_port(),
            username: None,
            password: None,
            database_name: database_name.into(),
            options: ConnectionOptions::default(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    /// Parse from the client JSON shape
    pub fn from_json(value: &str) -> Result<Self> {
        serde_json::from_str(value)
            .map_err(|e| Error::config(format!("Malformed database configuration: {}", e)))
    }

    /// Username, treating an empty string as absent
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn has_credentials(&self) -> bool {
        self.username().is_some()
    }

    /// True when the host names this machine
    pub fn is_loopback(&self) -> bool {
        is_loopback_host(&self.host)
    }

    /// Host without IPv6 brackets, the form socket-level drivers take
    pub fn bare_host(&self) -> &str {
        strip_brackets(self.host.trim())
    }

    /// Host as written in a URI authority; IPv6 literals are bracketed
    pub fn uri_host(&self) -> String {
        let host = self.bare_host();
        if host.contains(':') {
            format!("[{}]", host)
        } else {
            host.to_string()
        }
    }

    /// Reject values that look like they were swapped with an email address
    pub fn check_corruption(&self) -> Result<()> {
        let host = self.host.to_lowercase();
        if host.contains('@') {
            return Err(Error::corrupt_config(
                "host contains '@'; it looks like an email address, not a server",
            ));
        }
        if let Some(fragment) = consumer_email_fragment(&host) {
            return Err(Error::corrupt_config(format!(
                "host contains consumer email domain '{}'",
                fragment
            )));
        }
        if let Some(password) = self.password() {
            if let Some(fragment) = consumer_email_fragment(&password.to_lowercase()) {
                return Err(Error::corrupt_config(format!(
                    "password contains consumer email domain '{}'",
                    fragment
                )));
            }
        }
        Ok(())
    }

    /// Structural sanity checks; no network access
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::config("Host is required"));
        }
        if !HOST_PATTERN.is_match(&self.host) {
            return Err(Error::config(format!("Invalid host: '{}'", self.host)));
        }
        if self.port == 0 {
            return Err(Error::config("Port is required"));
        }
        if self.database_name.is_empty() {
            return Err(Error::config("Database name is required"));
        }
        if !DATABASE_NAME_PATTERN.is_match(&self.database_name) {
            return Err(Error::config(format!(
                "Invalid database name: '{}' (letters, digits, '_' and '-' only, max 64)",
                self.database_name
            )));
        }

        if self.kind.is_relational() {
            if self.username().is_none() {
                return Err(Error::config(format!(
                    "Username is required for {}",
                    self.kind.display_name()
                )));
            }
            if self.password.is_none() {
                return Err(Error::config(format!(
                    "Password is required for {}",
                    self.kind.display_name()
                )));
            }
        } else if self.password.as_deref().is_some_and(|p| !p.is_empty()) && self.username().is_none() {
            return Err(Error::config("Password given without a username"));
        }

        if let Some(charset) = &self.options.charset {
            if !CHARSET_PATTERN.is_match(charset) {
                return Err(Error::config(format!("Invalid charset: '{}'", charset)));
            }
        }
        if let Some(pool_size) = self.options.pool_size {
            if pool_size == 0 || pool_size > 1000 {
                return Err(Error::config(format!(
                    "Pool size must be between 1 and 1000, got {}",
                    pool_size
                )));
            }
        }
        if let Some(auth_source) = &self.options.auth_source {
            if !DATABASE_NAME_PATTERN.is_match(auth_source) {
                return Err(Error::config(format!("Invalid authSource: '{}'", auth_source)));
            }
        }

        Ok(())
    }

    /// Guard then validate, in that order
    pub fn check(&self) -> Result<()> {
        self.check_corruption()?;
        self.validate()
    }
}

fn consumer_email_fragment(value: &str) -> Option<&'static str> {
    CONSUMER_EMAIL_FRAGMENTS
        .iter()
        .copied()
        .find(|fragment| value.contains(fragment))
}

fn strip_brackets(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Loopback check used for `directConnection` and "start the local server" hints
pub fn is_loopback_host(host: &str) -> bool {
    let host = strip_brackets(host.trim());
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(ip) => ip.is_loopback() || ip.is_unspecified(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn mysql_config() -> DatabaseConfig {
        DatabaseConfig::new(BackendKind::Mysql, "db.internal", "shop")
            .with_credentials("app", "s3cret")
    }

    #[test]
    fn test_parse_client_json() {
        let config = DatabaseConfig::from_json(
            r#"{
                "kind": "postgres",
                "host": "localhost",
                "port": 5432,
                "username": "app",
                "password": "pw",
                "databaseName": "shop",
                "options": { "tls": true, "poolSize": 4 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.kind, BackendKind::Postgresql);
        assert_eq!(config.database_name, "shop");
        assert_eq!(config.options.tls, Some(true));
        assert_eq!(config.options.pool_size, Some(4));
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_missing_required_field_is_config_error() {
        let err = DatabaseConfig::from_json(r#"{"kind": "mysql", "host": "h", "port": 1}"#)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Config);

        let mut config = mysql_config();
        config.host = String::new();
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::Config);
    }

    #[test]
    fn test_relational_requires_credentials() {
        let config = DatabaseConfig::new(BackendKind::Mysql, "localhost", "shop");
        assert!(config.validate().is_err());

        let config = DatabaseConfig::new(BackendKind::Mongodb, "localhost", "shop");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_corruption_guard_rejects_email_domains() {
        let mut config = mysql_config();
        config.host = "smtp.Gmail.com".to_string();
        let err = config.check().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CorruptConfig);

        let mut config = mysql_config();
        config.password = Some("jane.doe@hotmail.co.uk".to_string());
        assert_eq!(config.check().unwrap_err().kind(), ErrorKind::CorruptConfig);

        let mut config = mysql_config();
        config.host = "jane@db.internal".to_string();
        assert_eq!(config.check().unwrap_err().kind(), ErrorKind::CorruptConfig);
    }

    #[test]
    fn test_guard_runs_before_structural_checks() {
        // Invalid port and email host: the guard wins
        let mut config = mysql_config();
        config.host = "gmail.com".to_string();
        config.port = 0;
        assert_eq!(config.check().unwrap_err().kind(), ErrorKind::CorruptConfig);
    }

    #[test]
    fn test_rejects_injection_in_names() {
        let mut config = mysql_config();
        config.database_name = "shop`; DROP DATABASE x; --".to_string();
        assert!(config.validate().is_err());

        let mut config = mysql_config();
        config.options.charset = Some("utf8mb4; DROP".to_string());
        assert!(config.validate().is_err());

        let mut config = mysql_config();
        config.host = "db.internal/evil".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", mysql_config());
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("***"));
    }

    #[test]
    fn test_loopback_detection() {
        assert!(is_loopback_host("localhost"));
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.8.0.2"));
        assert!(is_loopback_host("[::1]"));
        assert!(is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("cluster0.abcd.mongodb.net"));
        assert!(!is_loopback_host("10.0.0.5"));
    }

    #[test]
    fn test_ipv6_host_forms() {
        for host in ["::1", "[::1]"] {
            let config = DatabaseConfig::new(BackendKind::Mongodb, host, "shop");
            config.check().unwrap();
            assert!(config.is_loopback());
            assert_eq!(config.bare_host(), "::1");
            assert_eq!(config.uri_host(), "[::1]");
        }

        let named = DatabaseConfig::new(BackendKind::Mongodb, "db.internal", "shop");
        assert_eq!(named.bare_host(), "db.internal");
        assert_eq!(named.uri_host(), "db.internal");
    }

    #[test]
    fn test_kind_parse_aliases() {
        assert_eq!(BackendKind::parse("MariaDB").unwrap(), BackendKind::Mysql);
        assert_eq!(BackendKind::parse("pg").unwrap(), BackendKind::Postgresql);
        assert_eq!(BackendKind::parse("document").unwrap(), BackendKind::Mongodb);
        assert!(BackendKind::parse("oracle").is_err());
    }

    #[test]
    fn test_json_round_trip_keeps_shape() {
        let config = mysql_config().with_options(ConnectionOptions {
            charset: Some("utf8mb4".to_string()),
            ..ConnectionOptions::default()
        });
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["databaseName"], "shop");
        assert_eq!(json["kind"], "mysql");
        assert_eq!(json["options"]["charset"], "utf8mb4");
        assert!(json["options"].get("tls").is_none());

        let back: DatabaseConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, config);
    }
}
