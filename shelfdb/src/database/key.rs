//! Canonical registry keys

use crate::database::config::{BackendKind, DatabaseConfig};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of one pooled resource in the registry
///
/// The target tuple is `(kind, host, port, database)`. Credentials are only
/// represented by an optional fingerprint, never in clear.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CanonicalKey {
    pub kind: BackendKind,
    pub host: String,
    pub port: u16,
    pub database: String,
    pub credential_fingerprint: Option<String>,
}

impl CanonicalKey {
    /// Build the key; `include_credentials` appends a credential fingerprint
    pub fn from_config(config: &DatabaseConfig, include_credentials: bool) -> Self {
        let credential_fingerprint = if include_credentials {
            Some(credential_fingerprint(
                config.username().unwrap_or_default(),
                config.password().unwrap_or_default(),
            ))
        } else {
            None
        };

        Self {
            kind: config.kind,
            host: config.bare_host().to_lowercase(),
            port: config.port,
            database: config.database_name.clone(),
            credential_fingerprint,
        }
    }

    /// Same target, ignoring credentials
    pub fn same_target(&self, other: &CanonicalKey) -> bool {
        self.kind == other.kind
            && self.host == other.host
            && self.port == other.port
            && self.database == other.database
    }
}

impl fmt::Display for CanonicalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}/{}", self.kind, self.host, self.port, self.database)?;
        if let Some(fingerprint) = &self.credential_fingerprint {
            write!(f, "#{}", fingerprint)?;
        }
        Ok(())
    }
}

/// Short, non-reversible fingerprint of a username/password pair
fn credential_fingerprint(username: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(username.as_bytes());
    hasher.update([0u8]);
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::config::ConnectionOptions;

    fn config(user: &str, password: &str) -> DatabaseConfig {
        DatabaseConfig::new(BackendKind::Postgresql, "DB.internal", "shop")
            .with_credentials(user, password)
    }

    #[test]
    fn test_target_only_key_ignores_credentials_and_options() {
        let a = config("app", "one");
        let b = config("admin", "two").with_options(ConnectionOptions {
            pool_size: Some(3),
            tls: Some(true),
            ..ConnectionOptions::default()
        });

        assert_eq!(
            CanonicalKey::from_config(&a, false),
            CanonicalKey::from_config(&b, false)
        );
    }

    #[test]
    fn test_fingerprinted_key_separates_credentials() {
        let a = CanonicalKey::from_config(&config("app", "one"), true);
        let b = CanonicalKey::from_config(&config("app", "two"), true);
        let a_again = CanonicalKey::from_config(&config("app", "one"), true);

        assert_ne!(a, b);
        assert!(a.same_target(&b));
        assert_eq!(a, a_again);
    }

    #[test]
    fn test_display_never_contains_password() {
        let key = CanonicalKey::from_config(&config("app", "hunter2"), true);
        let rendered = key.to_string();
        assert!(rendered.starts_with("postgresql://db.internal:5432/shop#"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_user_password_boundary_is_unambiguous() {
        assert_ne!(credential_fingerprint("ab", "c"), credential_fingerprint("a", "bc"));
    }
}
