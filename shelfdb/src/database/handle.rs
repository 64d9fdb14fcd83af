//! Live connection handles
//!
//! A handle wraps whatever the backend dialed (a sqlx pool, a MongoDB
//! client) behind `Arc<dyn Any>` so the registry can hold every backend in
//! one map. Callers that know the backend downcast through the typed
//! accessors.

use crate::database::adapters::MongoConnection;
use crate::database::config::BackendKind;
use crate::database::key::CanonicalKey;
use crate::database::schema::SchemaReport;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{MySqlPool, PgPool};
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, RwLock};

/// Type-erased resource produced by a backend dial
pub type RawConnection = Arc<dyn Any + Send + Sync>;

/// Lifecycle of a registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HandleState {
    /// No entry for the key
    Uninitialized,
    /// A dial is in flight for the key
    Connecting,
    Connected,
    /// Failed a health check; replaced on the next request
    Stale,
    Closed,
}

impl HandleState {
    fn from_u8(value: u8) -> Self {
        match value {
            STATE_CONNECTED => HandleState::Connected,
            STATE_STALE => HandleState::Stale,
            _ => HandleState::Closed,
        }
    }
}

const STATE_CONNECTED: u8 = 0;
const STATE_STALE: u8 = 1;
const STATE_CLOSED: u8 = 2;

pub struct ConnectionHandle {
    kind: BackendKind,
    key: CanonicalKey,
    raw: RawConnection,
    state: AtomicU8,
    opened_at: DateTime<Utc>,
    schema_report: RwLock<Option<SchemaReport>>,
}

impl ConnectionHandle {
    pub fn new(key: CanonicalKey, raw: RawConnection) -> Self {
        Self {
            kind: key.kind,
            key,
            raw,
            state: AtomicU8::new(STATE_CONNECTED),
            opened_at: Utc::now(),
            schema_report: RwLock::new(None),
        }
    }

    pub fn kind(&self) -> BackendKind {
        self.kind
    }

    pub fn key(&self) -> &CanonicalKey {
        &self.key
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    pub fn state(&self) -> HandleState {
        HandleState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Connected and not flagged by a failed health check
    pub fn is_connected(&self) -> bool {
        self.state() == HandleState::Connected
    }

    /// Flag the handle so the registry replaces it on the next request
    pub fn mark_stale(&self) {
        let _ = self.state.compare_exchange(
            STATE_CONNECTED,
            STATE_STALE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    pub(crate) fn mark_closed(&self) {
        self.state.store(STATE_CLOSED, Ordering::Release);
    }

    /// Underlying resource, for backends that need the erased form
    pub fn raw(&self) -> &RawConnection {
        &self.raw
    }

    /// Downcast the underlying resource
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.raw.downcast_ref::<T>()
    }

    pub fn mysql_pool(&self) -> Option<&MySqlPool> {
        self.downcast::<MySqlPool>()
    }

    pub fn pg_pool(&self) -> Option<&PgPool> {
        self.downcast::<PgPool>()
    }

    pub fn mongo(&self) -> Option<&MongoConnection> {
        self.downcast::<MongoConnection>()
    }

    /// Outcome of the most recent schema pass on this handle
    pub fn last_schema_report(&self) -> Option<SchemaReport> {
        self.schema_report
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub(crate) fn set_schema_report(&self, report: SchemaReport) {
        *self
            .schema_report
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(report);
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("key", &self.key.to_string())
            .field("state", &self.state())
            .field("opened_at", &self.opened_at)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::config::DatabaseConfig;

    fn handle() -> ConnectionHandle {
        let config = DatabaseConfig::new(BackendKind::Mongodb, "localhost", "shop");
        ConnectionHandle::new(CanonicalKey::from_config(&config, false), Arc::new(7u32))
    }

    #[test]
    fn test_state_transitions() {
        let handle = handle();
        assert!(handle.is_connected());

        handle.mark_stale();
        assert_eq!(handle.state(), HandleState::Stale);

        handle.mark_closed();
        handle.mark_stale();
        assert_eq!(handle.state(), HandleState::Closed);
    }

    #[test]
    fn test_typed_accessors() {
        let handle = handle();
        assert_eq!(handle.downcast::<u32>(), Some(&7));
        assert!(handle.mysql_pool().is_none());
        assert!(handle.mongo().is_none());
        assert_eq!(handle.kind(), BackendKind::Mongodb);
    }

    #[test]
    fn test_schema_report_slot() {
        let handle = handle();
        assert!(handle.last_schema_report().is_none());

        let report = SchemaReport {
            created: vec!["products".to_string()],
            ..SchemaReport::default()
        };
        handle.set_schema_report(report.clone());
        assert_eq!(handle.last_schema_report(), Some(report));
    }
}
