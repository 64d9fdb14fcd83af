//! shelfdb - multi-backend database connection and lifecycle manager
//!
//! shelfdb presents one contract over MySQL/MariaDB, PostgreSQL and MongoDB:
//! - Lazily dialed, pooled connections cached by canonical config key
//! - Idempotent schema creation and in-place forward migration
//! - Per-tenant collection naming on the document store
//! - Sanity guards on client-supplied configuration before any network I/O

// Enforce error handling best practices
#![cfg_attr(
    not(test),
    warn(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::panic,
        clippy::unimplemented,
        clippy::todo,
    )
)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used,))]

pub mod config;
pub mod database;
pub mod error;
pub mod manager;

pub use config::ManagerSettings;
pub use database::{
    BackendKind, CanonicalKey, ConnectionHandle, ConnectionOptions, DatabaseConfig, HandleState,
    QueryOutput, SchemaReport, Statement,
};
pub use error::{Error, ErrorKind, Result};
pub use manager::{ConfigStore, DatabaseManager, JsonFileStore, MemoryStore};

pub mod prelude {
    pub use crate::database::{BackendAdapter, ConnectionRegistry, RegistryStats};
    pub use crate::*;
    pub use serde_json::json;
}
