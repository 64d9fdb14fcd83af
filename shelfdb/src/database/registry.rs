//! Connection registry
//!
//! Process-wide cache from canonical key to live handle. Each key owns a
//! slot guarded by its own async mutex, so concurrent requests for the same
//! target dial once while requests for different targets never wait on each
//! other. The outer map lock is only held for slot lookup and insertion.

use crate::config::ManagerSettings;
use crate::database::adapter::{AdapterSet, BackendAdapter};
use crate::database::config::DatabaseConfig;
use crate::database::handle::{ConnectionHandle, HandleState};
use crate::database::key::CanonicalKey;
use crate::database::schema::SchemaReport;
use crate::error::{Error, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

type Slot = Arc<Mutex<Option<Arc<ConnectionHandle>>>>;

/// A validated config with its adapter and key resolved
#[derive(Clone)]
pub struct Target {
    pub config: DatabaseConfig,
    pub adapter: Arc<dyn BackendAdapter>,
    pub key: CanonicalKey,
}

/// Registry of live connections keyed by [`CanonicalKey`]
pub struct ConnectionRegistry {
    slots: RwLock<HashMap<CanonicalKey, Slot>>,
    adapters: AdapterSet,
    settings: Arc<ManagerSettings>,
    dials: AtomicU64,
    evictions: AtomicU64,
    schema_failures: AtomicU64,
    leak_risks: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new(adapters: AdapterSet, settings: Arc<ManagerSettings>) -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            adapters,
            settings,
            dials: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            schema_failures: AtomicU64::new(0),
            leak_risks: AtomicU64::new(0),
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Guard, validate and resolve `config`; performs no I/O
    pub fn resolve(&self, config: &DatabaseConfig) -> Result<Target> {
        config.check()?;
        let adapter = self.adapters.resolve(config.kind)?;
        let key = adapter.canonical_key(config, self.settings.key_includes_credentials);
        Ok(Target {
            config: config.clone(),
            adapter,
            key,
        })
    }

    /// Slot for `key`, created empty when missing
    async fn slot(&self, key: &CanonicalKey) -> Slot {
        if let Some(slot) = self.slots.read().await.get(key) {
            return slot.clone();
        }
        self.slots
            .write()
            .await
            .entry(key.clone())
            .or_default()
            .clone()
    }

    async fn is_registered(&self, key: &CanonicalKey, slot: &Slot) -> bool {
        self.slots
            .read()
            .await
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop an empty slot nobody else is waiting on
    async fn release_slot(&self, key: &CanonicalKey, slot: &Slot) {
        let mut slots = self.slots.write().await;
        let ours = slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot));
        // Map entry plus the caller's clone
        if ours && Arc::strong_count(slot) <= 2 {
            slots.remove(key);
        }
    }

    /// Return the live handle for `target`, dialing on a miss
    ///
    /// A cached handle that is flagged stale, or that fails its reuse ping
    /// when `verify_on_reuse` is set, is closed and replaced. A failed dial or
    /// table creation leaves no entry behind.
    pub async fn get_or_create(&self, target: &Target) -> Result<Arc<ConnectionHandle>> {
        self.acquire(target).await.map(|(handle, _)| handle)
    }

    /// [`get_or_create`](Self::get_or_create), also reporting whether this call dialed
    pub(crate) async fn acquire(&self, target: &Target) -> Result<(Arc<ConnectionHandle>, bool)> {
        let key = &target.key;
        let adapter = &target.adapter;

        loop {
            let slot = self.slot(key).await;
            let mut guard = slot.lock().await;

            if let Some(handle) = guard.as_ref() {
                if handle.is_connected() {
                    let handle = handle.clone();
                    if !self.settings.verify_on_reuse {
                        return Ok((handle, false));
                    }

                    // Health check runs unlocked; a failure flags the handle
                    // and the next pass evicts it if it is still cached
                    drop(guard);
                    match adapter.ping(&handle).await {
                        Ok(()) => return Ok((handle, false)),
                        Err(e) => {
                            log::warn!("Cached connection {} failed its health check: {}", key, e);
                            handle.mark_stale();
                            continue;
                        }
                    }
                }
                if let Some(stale) = guard.take() {
                    log::info!("Evicting stale connection {}", key);
                    adapter.close(&stale).await;
                    stale.mark_closed();
                    self.evictions.fetch_add(1, Ordering::Relaxed);
                }
            }

            self.dials.fetch_add(1, Ordering::Relaxed);
            let raw = match adapter.dial(&target.config, &self.settings).await {
                Ok(raw) => raw,
                Err(e) => {
                    drop(guard);
                    self.release_slot(key, &slot).await;
                    log::error!("Failed to connect {}: {}", key, e);
                    return Err(e);
                }
            };

            let handle = Arc::new(ConnectionHandle::new(key.clone(), raw));
            match adapter.ensure_schema(&handle, None).await {
                Ok(report) => self.record_schema(&handle, report),
                Err(e) => {
                    adapter.close(&handle).await;
                    handle.mark_closed();
                    drop(guard);
                    self.release_slot(key, &slot).await;
                    log::error!("Schema setup failed for {}: {}", key, e);
                    return Err(e);
                }
            }

            *guard = Some(handle.clone());
            drop(guard);

            if self.is_registered(key, &slot).await {
                log::info!("Connected {}", key);
                return Ok((handle, true));
            }

            // The slot was dropped from the map while we were dialing
            let err = Error::pool_leak_risk(format!(
                "registry entry for {} was replaced during creation",
                key
            ));
            log::warn!("{}", err);
            self.leak_risks.fetch_add(1, Ordering::Relaxed);

            let mut slots = self.slots.write().await;
            if !slots.contains_key(key) {
                slots.insert(key.clone(), slot.clone());
                return Ok((handle, true));
            }
            drop(slots);

            // Another creator owns the key now; give ours up and use theirs
            slot.lock().await.take();
            adapter.close(&handle).await;
            handle.mark_closed();
        }
    }

    /// Store a schema pass outcome on the handle and count swallowed failures
    pub(crate) fn record_schema(&self, handle: &ConnectionHandle, report: SchemaReport) {
        if report.has_failures() {
            self.schema_failures
                .fetch_add(report.failures.len() as u64, Ordering::Relaxed);
        }
        handle.set_schema_report(report);
    }

    /// Close and remove the entry for `target`
    ///
    /// Returns `false` when there was nothing to close; disconnecting twice
    /// is not an error.
    pub async fn disconnect(&self, target: &Target) -> Result<bool> {
        let slot = match self.slots.read().await.get(&target.key) {
            Some(slot) => slot.clone(),
            None => return Ok(false),
        };

        // Waits for any in-flight dial on the same key
        let handle = slot.lock().await.take();

        let mut slots = self.slots.write().await;
        if slots
            .get(&target.key)
            .is_some_and(|current| Arc::ptr_eq(current, &slot))
        {
            slots.remove(&target.key);
        }
        drop(slots);

        match handle {
            Some(handle) => {
                target.adapter.close(&handle).await;
                handle.mark_closed();
                log::info!("Disconnected {}", target.key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close every live handle and empty the registry
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(CanonicalKey, Slot)> = self.slots.write().await.drain().collect();
        let mut closed = 0;

        for (key, slot) in slots {
            let Some(handle) = slot.lock().await.take() else {
                continue;
            };
            match self.adapters.resolve(key.kind) {
                Ok(adapter) => adapter.close(&handle).await,
                Err(e) => log::warn!("Cannot close {}: {}", key, e),
            }
            handle.mark_closed();
            closed += 1;
        }

        if closed > 0 {
            log::info!("Closed {} connection(s)", closed);
        }
        closed
    }

    /// Drop every entry without closing it
    ///
    /// Administrative escape hatch: handles still held by callers stay open
    /// and are the callers' responsibility.
    pub async fn clear_connections(&self) -> usize {
        let mut slots = self.slots.write().await;
        let dropped = slots.len();
        slots.clear();
        if dropped > 0 {
            log::warn!("Cleared {} registry entries without closing them", dropped);
        }
        dropped
    }

    /// Cached handle for `key`, without dialing or health checks
    pub async fn lookup(&self, key: &CanonicalKey) -> Option<Arc<ConnectionHandle>> {
        let slot = self.slots.read().await.get(key).cloned()?;
        let handle = slot.lock().await.clone();
        handle
    }

    /// Lifecycle state for `key`
    pub async fn state(&self, key: &CanonicalKey) -> HandleState {
        let Some(slot) = self.slots.read().await.get(key).cloned() else {
            return HandleState::Uninitialized;
        };
        let state = match slot.try_lock() {
            Ok(guard) => guard
                .as_ref()
                .map(|handle| handle.state())
                .unwrap_or(HandleState::Uninitialized),
            Err(_) => HandleState::Connecting,
        };
        state
    }

    /// Keys that currently hold a handle
    pub async fn keys(&self) -> Vec<CanonicalKey> {
        let slots: Vec<(CanonicalKey, Slot)> = self
            .slots
            .read()
            .await
            .iter()
            .map(|(key, slot)| (key.clone(), slot.clone()))
            .collect();

        let mut keys = Vec::new();
        for (key, slot) in slots {
            if slot.lock().await.is_some() {
                keys.push(key);
            }
        }
        keys
    }

    pub async fn len(&self) -> usize {
        self.keys().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn stats(&self) -> RegistryStats {
        RegistryStats {
            live: self.len().await,
            dials: self.dials.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            schema_failures: self.schema_failures.load(Ordering::Relaxed),
            leak_risks: self.leak_risks.load(Ordering::Relaxed),
        }
    }
}

/// Counters exposed for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Entries currently holding a handle
    pub live: usize,
    pub dials: u64,
    pub evictions: u64,
    /// Migration and index failures swallowed during schema passes
    pub schema_failures: u64,
    /// Creations that found their entry replaced mid-flight
    pub leak_risks: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::config::BackendKind;
    use crate::database::testing::FakeAdapter;
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    fn registry_with(adapter: Arc<FakeAdapter>, settings: ManagerSettings) -> ConnectionRegistry {
        let mut adapters = AdapterSet::new();
        adapters.register(adapter);
        ConnectionRegistry::new(adapters, Arc::new(settings))
    }

    fn config(database: &str) -> DatabaseConfig {
        DatabaseConfig::new(BackendKind::Postgresql, "db.internal", database)
            .with_credentials("app", "pw")
    }

    #[tokio::test]
    async fn test_second_request_reuses_handle() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let first = registry.get_or_create(&target).await.unwrap();
        let second = registry.get_or_create(&target).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(FakeAdapter::count(&fake.dials), 1);
        assert_eq!(FakeAdapter::count(&fake.ensures), 1);
        assert_eq!(FakeAdapter::count(&fake.pings), 1);
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_requests_dial_once() {
        let fake = FakeAdapter::with_delay(BackendKind::Postgresql, Duration::from_millis(50));
        let registry = Arc::new(registry_with(fake.clone(), ManagerSettings::default()));
        let target = registry.resolve(&config("shop")).unwrap();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            let target = target.clone();
            tasks.push(tokio::spawn(async move {
                registry.get_or_create(&target).await
            }));
        }

        let mut handles = Vec::new();
        for task in tasks {
            handles.push(task.await.unwrap().unwrap());
        }

        assert_eq!(FakeAdapter::count(&fake.dials), 1);
        assert!(handles.iter().all(|h| Arc::ptr_eq(h, &handles[0])));
        assert_eq!(registry.stats().await.leak_risks, 0);
    }

    #[tokio::test]
    async fn test_distinct_targets_get_distinct_handles() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());

        let a = registry.resolve(&config("shop")).unwrap();
        let b = registry.resolve(&config("archive")).unwrap();
        let ha = registry.get_or_create(&a).await.unwrap();
        let hb = registry.get_or_create(&b).await.unwrap();

        assert!(!Arc::ptr_eq(&ha, &hb));
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn test_failed_dial_leaves_no_entry() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        fake.fail_dial.store(true, Ordering::SeqCst);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let err = registry.get_or_create(&target).await.unwrap_err();
        assert_eq!(err.error_code(), "E_CONNECT");
        assert!(registry.lookup(&target.key).await.is_none());
        assert_eq!(registry.state(&target.key).await, HandleState::Uninitialized);
        assert!(registry.slots.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_stale_handle_is_replaced() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let first = registry.get_or_create(&target).await.unwrap();
        first.mark_stale();
        let second = registry.get_or_create(&target).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(first.state(), HandleState::Closed);
        assert_eq!(FakeAdapter::count(&fake.dials), 2);
        assert_eq!(FakeAdapter::count(&fake.closes), 1);
        assert_eq!(registry.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_failed_reuse_ping_evicts() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let first = registry.get_or_create(&target).await.unwrap();
        fake.fail_ping.store(true, Ordering::SeqCst);
        let second = registry.get_or_create(&target).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(FakeAdapter::count(&fake.dials), 2);
        assert_eq!(first.state(), HandleState::Closed);
        assert_eq!(registry.stats().await.evictions, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reuse_pings_run_concurrently() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        fake.set_ping_delay(Duration::from_millis(100));
        let registry = Arc::new(registry_with(fake.clone(), ManagerSettings::default()));
        let target = registry.resolve(&config("shop")).unwrap();
        let first = registry.get_or_create(&target).await.unwrap();

        let started = tokio::time::Instant::now();
        let tasks: Vec<_> = (0..4)
            .map(|_| {
                let registry = registry.clone();
                let target = target.clone();
                tokio::spawn(async move { registry.get_or_create(&target).await })
            })
            .collect();
        for task in tasks {
            assert!(Arc::ptr_eq(&task.await.unwrap().unwrap(), &first));
        }

        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(FakeAdapter::count(&fake.dials), 1);
    }

    #[tokio::test]
    async fn test_reuse_without_verification_skips_ping() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let settings = ManagerSettings {
            verify_on_reuse: false,
            ..ManagerSettings::default()
        };
        let registry = registry_with(fake.clone(), settings);
        let target = registry.resolve(&config("shop")).unwrap();

        registry.get_or_create(&target).await.unwrap();
        registry.get_or_create(&target).await.unwrap();
        assert_eq!(FakeAdapter::count(&fake.pings), 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let handle = registry.get_or_create(&target).await.unwrap();
        assert!(registry.disconnect(&target).await.unwrap());
        assert!(!registry.disconnect(&target).await.unwrap());

        assert_eq!(handle.state(), HandleState::Closed);
        assert_eq!(FakeAdapter::count(&fake.closes), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear_connections_does_not_close() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let handle = registry.get_or_create(&target).await.unwrap();
        assert_eq!(registry.clear_connections().await, 1);

        assert!(registry.is_empty().await);
        assert!(handle.is_connected());
        assert_eq!(FakeAdapter::count(&fake.closes), 0);
    }

    #[tokio::test]
    async fn test_close_all() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        for db in ["a", "b", "c"] {
            let target = registry.resolve(&config(db)).unwrap();
            registry.get_or_create(&target).await.unwrap();
        }

        assert_eq!(registry.close_all().await, 3);
        assert_eq!(FakeAdapter::count(&fake.closes), 3);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_cleared_during_dial_reinstalls_entry() {
        let fake = FakeAdapter::with_delay(BackendKind::Postgresql, Duration::from_millis(100));
        let registry = Arc::new(registry_with(fake.clone(), ManagerSettings::default()));
        let target = registry.resolve(&config("shop")).unwrap();

        let creator = {
            let registry = registry.clone();
            let target = target.clone();
            tokio::spawn(async move { registry.get_or_create(&target).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.state(&target.key).await, HandleState::Connecting);
        registry.clear_connections().await;

        let handle = creator.await.unwrap().unwrap();
        let cached = registry.lookup(&target.key).await.unwrap();
        assert!(Arc::ptr_eq(&handle, &cached));
        assert_eq!(registry.stats().await.leak_risks, 1);
    }

    #[tokio::test]
    async fn test_schema_failures_are_counted_not_fatal() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        fake.failing_migration.store(true, Ordering::SeqCst);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let target = registry.resolve(&config("shop")).unwrap();

        let handle = registry.get_or_create(&target).await.unwrap();
        assert!(handle.is_connected());
        assert!(handle.last_schema_report().unwrap().has_failures());
        assert_eq!(registry.stats().await.schema_failures, 1);
    }

    #[tokio::test]
    async fn test_resolve_rejects_corrupt_config_before_io() {
        let fake = FakeAdapter::new(BackendKind::Postgresql);
        let registry = registry_with(fake.clone(), ManagerSettings::default());
        let corrupt = DatabaseConfig::new(BackendKind::Postgresql, "someone@gmail.com", "shop")
            .with_credentials("app", "pw");

        let err = registry.resolve(&corrupt).err().unwrap();
        assert_eq!(err.error_code(), "E_CORRUPT_CONFIG");
        assert_eq!(FakeAdapter::count(&fake.dials), 0);
    }
}
