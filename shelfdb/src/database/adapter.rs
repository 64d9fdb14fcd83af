//! Backend adapter trait for multi-database support
//!
//! Each supported backend implements [`BackendAdapter`] once. The manager
//! resolves the adapter for a config's kind a single time and every later
//! operation (dial, schema, health check, close, execute) dispatches through
//! it, so no backend-specific branching lives outside `adapters/`.

use crate::config::ManagerSettings;
use crate::database::adapters::{MongoAdapter, MySqlAdapter, PostgresAdapter};
use crate::database::config::{BackendKind, DatabaseConfig};
use crate::database::handle::{ConnectionHandle, RawConnection};
use crate::database::key::CanonicalKey;
use crate::database::schema::SchemaReport;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

/// Statement submitted through [`BackendAdapter::execute`]
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Raw SQL for relational backends
    Sql(String),
    /// Database command document for the document store, e.g. `{"count": "products"}`
    Command(JsonValue),
}

impl Statement {
    pub fn sql(sql: impl Into<String>) -> Self {
        Statement::Sql(sql.into())
    }
}

/// Result of an executed statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum QueryOutput {
    /// Row set, one JSON object per row
    Rows(Vec<JsonValue>),
    /// Rows affected by a modifying statement
    Affected(u64),
    /// Command reply from the document store
    Document(JsonValue),
}

/// Unified backend interface
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Registry key for `config`
    fn canonical_key(&self, config: &DatabaseConfig, include_credentials: bool) -> CanonicalKey {
        CanonicalKey::from_config(config, include_credentials)
    }

    /// Open a verified resource for `config`
    ///
    /// Creates the target database first when the backend supports it. The
    /// returned resource has completed at least one round-trip.
    async fn dial(&self, config: &DatabaseConfig, settings: &ManagerSettings)
        -> Result<RawConnection>;

    /// Create missing structures and apply forward migrations
    ///
    /// `tenant` selects per-tenant collections on the document store and is
    /// ignored by relational backends.
    async fn ensure_schema(
        &self,
        handle: &ConnectionHandle,
        tenant: Option<&str>,
    ) -> Result<SchemaReport>;

    /// Cheap round-trip health check
    async fn ping(&self, handle: &ConnectionHandle) -> Result<()>;

    /// Release the resource; never fails
    async fn close(&self, handle: &ConnectionHandle);

    async fn execute(&self, handle: &ConnectionHandle, statement: &Statement)
        -> Result<QueryOutput>;
}

/// Adapters indexed by backend kind
#[derive(Clone, Default)]
pub struct AdapterSet {
    adapters: HashMap<BackendKind, Arc<dyn BackendAdapter>>,
}

impl AdapterSet {
    /// Empty set; register adapters explicitly
    pub fn new() -> Self {
        Self::default()
    }

    /// MySQL/MariaDB, PostgreSQL and MongoDB
    pub fn with_defaults() -> Self {
        let mut set = Self::new();
        set.register(Arc::new(MySqlAdapter::new()));
        set.register(Arc::new(PostgresAdapter::new()));
        set.register(Arc::new(MongoAdapter::new()));
        set
    }

    /// Register an adapter, replacing any existing one for the same kind
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        self.adapters.insert(adapter.kind(), adapter);
    }

    pub fn resolve(&self, kind: BackendKind) -> Result<Arc<dyn BackendAdapter>> {
        self.adapters.get(&kind).cloned().ok_or_else(|| {
            Error::config(format!("No adapter registered for {}", kind.display_name()))
        })
    }

    pub fn kinds(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.adapters.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }
}
