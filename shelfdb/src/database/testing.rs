//! In-memory adapter for registry and manager tests

use crate::config::ManagerSettings;
use crate::database::adapter::{BackendAdapter, QueryOutput, Statement};
use crate::database::config::{BackendKind, DatabaseConfig};
use crate::database::handle::{ConnectionHandle, RawConnection};
use crate::database::schema::{SchemaReport, TABLES};
use crate::database::tenant::collection_name;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Resource handed out by [`FakeAdapter::dial`]
#[derive(Debug)]
pub struct FakeConnection {
    pub serial: usize,
}

/// Counts calls and simulates server-side schema state
pub struct FakeAdapter {
    kind: BackendKind,
    pub dials: AtomicUsize,
    pub closes: AtomicUsize,
    pub pings: AtomicUsize,
    pub ensures: AtomicUsize,
    pub fail_dial: AtomicBool,
    pub fail_ping: AtomicBool,
    pub failing_migration: AtomicBool,
    dial_delay: Duration,
    ping_delay: Mutex<Duration>,
    structures: Mutex<HashSet<String>>,
}

impl FakeAdapter {
    pub fn new(kind: BackendKind) -> Arc<Self> {
        Self::with_delay(kind, Duration::ZERO)
    }

    pub fn with_delay(kind: BackendKind, dial_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            kind,
            dials: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            ensures: AtomicUsize::new(0),
            fail_dial: AtomicBool::new(false),
            fail_ping: AtomicBool::new(false),
            failing_migration: AtomicBool::new(false),
            dial_delay,
            ping_delay: Mutex::new(Duration::ZERO),
            structures: Mutex::new(HashSet::new()),
        })
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap_or_else(|p| p.into_inner()) = delay;
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendAdapter for FakeAdapter {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn dial(&self, config: &DatabaseConfig, _settings: &ManagerSettings) -> Result<RawConnection> {
        let serial = self.dials.fetch_add(1, Ordering::SeqCst);
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if self.fail_dial.load(Ordering::SeqCst) {
            return Err(Error::connect(format!("refused by {}", config.host)));
        }
        Ok(Arc::new(FakeConnection { serial }))
    }

    async fn ensure_schema(
        &self,
        _handle: &ConnectionHandle,
        tenant: Option<&str>,
    ) -> Result<SchemaReport> {
        self.ensures.fetch_add(1, Ordering::SeqCst);
        let mut report = SchemaReport::default();
        let mut structures = self.structures.lock().unwrap_or_else(|p| p.into_inner());

        for base in TABLES {
            let name = collection_name(base, tenant);
            if structures.insert(name.clone()) {
                report.created.push(name);
            }
        }
        if self.failing_migration.load(Ordering::SeqCst) {
            report.record_failure("migrate products.description", "permission denied");
        }
        Ok(report)
    }

    async fn ping(&self, _handle: &ConnectionHandle) -> Result<()> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap_or_else(|p| p.into_inner());
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.fail_ping.load(Ordering::SeqCst) {
            return Err(Error::connect("ping failed"));
        }
        Ok(())
    }

    async fn close(&self, _handle: &ConnectionHandle) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }

    async fn execute(&self, _handle: &ConnectionHandle, statement: &Statement) -> Result<QueryOutput> {
        match statement {
            Statement::Sql(_) => Ok(QueryOutput::Affected(1)),
            Statement::Command(command) => Ok(QueryOutput::Document(command.clone())),
        }
    }
}
