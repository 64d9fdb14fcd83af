//! Database manager facade
//!
//! `DatabaseManager` is the single entry point request handlers use. It
//! resolves each client-supplied config once (guard, validation, adapter,
//! key) and delegates to the registry, so every caller resolving to the same
//! target shares one pooled handle.

use crate::config::ManagerSettings;
use crate::database::adapter::{AdapterSet, QueryOutput, Statement};
use crate::database::config::DatabaseConfig;
use crate::database::handle::{ConnectionHandle, HandleState};
use crate::database::registry::ConnectionRegistry;
use crate::database::schema::SchemaReport;
use crate::error::{Error, ErrorContext, Result};
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Client-supplied persistence for the default target config
///
/// The manager treats the stored value as opaque JSON and only interprets it
/// as a [`DatabaseConfig`] when asked to load or connect.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Stored value, `None` when nothing was saved yet
    async fn load(&self) -> Result<Option<JsonValue>>;

    async fn save(&self, value: &JsonValue) -> Result<()>;
}

/// JSON file on disk; writes go through a temporary file and a rename
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ConfigStore for JsonFileStore {
    async fn load(&self) -> Result<Option<JsonValue>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::store(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        if content.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&content).map(Some).map_err(|e| {
            Error::store(format!("Failed to parse {}: {}", self.path.display(), e))
        })
    }

    async fn save(&self, value: &JsonValue) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::store(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let content = serde_json::to_string_pretty(value)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| Error::store(format!("Failed to write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(|e| {
            Error::store(format!("Failed to replace {}: {}", self.path.display(), e))
        })?;

        log::debug!("Saved default config to {}", self.path.display());
        Ok(())
    }
}

/// In-process store, mostly for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryStore {
    value: RwLock<Option<JsonValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigStore for MemoryStore {
    async fn load(&self) -> Result<Option<JsonValue>> {
        Ok(self.value.read().await.clone())
    }

    async fn save(&self, value: &JsonValue) -> Result<()> {
        *self.value.write().await = Some(value.clone());
        Ok(())
    }
}

pub struct DatabaseManager {
    registry: ConnectionRegistry,
    settings: Arc<ManagerSettings>,
}

impl DatabaseManager {
    /// Manager with the built-in MySQL, PostgreSQL and MongoDB adapters
    pub fn new(settings: ManagerSettings) -> Self {
        Self::with_adapters(AdapterSet::with_defaults(), settings)
    }

    pub fn with_adapters(adapters: AdapterSet, settings: ManagerSettings) -> Self {
        let settings = Arc::new(settings);
        Self {
            registry: ConnectionRegistry::new(adapters, settings.clone()),
            settings,
        }
    }

    /// Manager configured from `shelfdb.toml` / `SHELFDB_*`
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(ManagerSettings::load()?))
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Live handle for `config`, dialing and ensuring the schema on a miss
    pub async fn connect(&self, config: &DatabaseConfig) -> Result<Arc<ConnectionHandle>> {
        let target = self.registry.resolve(config)?;
        self.registry.get_or_create(&target).await
    }

    /// Close the handle for `config`; `Ok(false)` when none was open
    pub async fn disconnect(&self, config: &DatabaseConfig) -> Result<bool> {
        let target = self.registry.resolve(config)?;
        self.registry.disconnect(&target).await
    }

    /// Whether `config` can be connected to; never fails
    ///
    /// A handle already shared by other callers is only pinged. Otherwise
    /// the adapter dials a throwaway connection that never enters the
    /// registry, so a concurrent `connect` cannot be handed a handle this
    /// test is about to close.
    pub async fn test_connection(&self, config: &DatabaseConfig) -> bool {
        let target = match self.registry.resolve(config) {
            Ok(target) => target,
            Err(e) => {
                log::warn!("Connection test rejected config: {}", e);
                return false;
            }
        };

        if let Some(handle) = self.registry.lookup(&target.key).await {
            if handle.is_connected() {
                return match target.adapter.ping(&handle).await {
                    Ok(()) => true,
                    Err(e) => {
                        log::warn!("Connection test failed for {}: {}", target.key, e);
                        handle.mark_stale();
                        false
                    }
                };
            }
        }

        let raw = match target.adapter.dial(&target.config, self.registry.settings()).await {
            Ok(raw) => raw,
            Err(e) => {
                log::warn!("Connection test failed [{}]: {}", e.error_code(), e);
                return false;
            }
        };

        let scratch = ConnectionHandle::new(target.key.clone(), raw);
        let reachable = match target.adapter.ping(&scratch).await {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Connection test failed for {}: {}", target.key, e);
                false
            }
        };
        target.adapter.close(&scratch).await;
        scratch.mark_closed();
        reachable
    }

    /// Connect and run the schema pass again, even on a cached handle
    ///
    /// Returns the report of the pass that ran during this call.
    pub async fn initialize_database(&self, config: &DatabaseConfig) -> Result<SchemaReport> {
        let target = self.registry.resolve(config)?;
        let (handle, created) = self.registry.acquire(&target).await?;

        if created {
            return Ok(handle.last_schema_report().unwrap_or_default());
        }

        let report = target
            .adapter
            .ensure_schema(&handle, None)
            .await
            .with_context(|| format!("Schema pass on {}", target.key))?;
        self.registry.record_schema(&handle, report.clone());
        Ok(report)
    }

    /// Create the tenant-scoped collections and indexes
    pub async fn ensure_tenant(&self, config: &DatabaseConfig, tenant_id: &str) -> Result<SchemaReport> {
        let target = self.registry.resolve(config)?;
        if config.kind.is_relational() {
            return Err(Error::config(format!(
                "Tenant collections are not supported on {}",
                config.kind.display_name()
            )));
        }
        if tenant_id.trim().is_empty() {
            return Err(Error::config("Tenant id is required"));
        }

        let handle = self.registry.get_or_create(&target).await?;
        let report = target
            .adapter
            .ensure_schema(&handle, Some(tenant_id))
            .await
            .with_context(|| format!("Tenant schema pass for '{}' on {}", tenant_id, target.key))?;
        self.registry.record_schema(&handle, report.clone());
        Ok(report)
    }

    /// Run a statement on the shared handle for `config`
    pub async fn execute(&self, config: &DatabaseConfig, statement: &Statement) -> Result<QueryOutput> {
        let target = self.registry.resolve(config)?;
        let handle = self.registry.get_or_create(&target).await?;
        target.adapter.execute(&handle, statement).await
    }

    /// Lifecycle state of the entry for `config`
    pub async fn state(&self, config: &DatabaseConfig) -> Result<HandleState> {
        let target = self.registry.resolve(config)?;
        Ok(self.registry.state(&target.key).await)
    }

    /// Persisted default config, if any
    pub async fn load_default_config(&self, store: &dyn ConfigStore) -> Result<Option<DatabaseConfig>> {
        match store.load().await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| Error::config(format!("Stored default config is malformed: {}", e))),
            None => Ok(None),
        }
    }

    pub async fn save_default_config(&self, store: &dyn ConfigStore, config: &DatabaseConfig) -> Result<()> {
        store.save(&serde_json::to_value(config)?).await
    }

    /// Connect to the persisted default target
    ///
    /// `Ok(None)` when no default is stored; callers then run without a
    /// database.
    pub async fn connect_default(&self, store: &dyn ConfigStore) -> Result<Option<Arc<ConnectionHandle>>> {
        match self.load_default_config(store).await? {
            Some(config) => self.connect(&config).await.map(Some),
            None => {
                log::info!("No default database configured - database operations will be unavailable");
                Ok(None)
            }
        }
    }

    /// Drop every registry entry without closing it
    pub async fn clear_connections(&self) -> usize {
        self.registry.clear_connections().await
    }

    /// Close every live handle
    pub async fn shutdown(&self) -> usize {
        self.registry.close_all().await
    }
}
