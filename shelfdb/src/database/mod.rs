//! Multi-backend connection management
//!
//! Configuration model, per-backend adapters, schema setup, tenant naming and
//! the registry that caches live handles by canonical key.

pub mod adapter;
pub mod adapters;
pub mod config;
pub mod handle;
pub mod key;
pub mod registry;
pub mod schema;
pub mod tenant;

#[cfg(test)]
pub(crate) mod testing;

// Re-export main types for convenience
pub use adapter::{AdapterSet, BackendAdapter, QueryOutput, Statement};
pub use adapters::{MongoAdapter, MongoConnection, MongoTarget, MySqlAdapter, PostgresAdapter};
pub use config::{BackendKind, ConnectionOptions, DatabaseConfig};
pub use handle::{ConnectionHandle, HandleState, RawConnection};
pub use key::CanonicalKey;
pub use registry::{ConnectionRegistry, RegistryStats, Target};
pub use schema::SchemaReport;
pub use tenant::collection_name;
