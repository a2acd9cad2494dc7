//! Run progress counters and observers.
//!
//! Units of work bump atomic counters as they finish; the observer receives
//! a snapshot for display. Counters are display-only and never steer the
//! workflows.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::{debug, info};

use crate::report::{TenantReport, Workflow};
use crate::types::{Account, TenantId};

/// Point-in-time view of the current tenant's progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// 1-based position of the tenant in the run
    pub tenant_index: usize,
    pub tenant_count: usize,
    pub units_done: usize,
    pub units_total: usize,
}

/// Receives progress events. Called from many tasks at once.
pub trait ProgressObserver: Send + Sync {
    /// The governing account was read and tenants are about to start
    fn run_started(&self, _workflow: Workflow, _account: &Account, _tenant_count: usize) {}

    fn tenant_started(&self, _tenant: &TenantId, _snapshot: ProgressSnapshot) {}

    /// The tenant's units are known and about to be launched
    fn units_planned(&self, _tenant: &TenantId, _snapshot: ProgressSnapshot) {}

    fn unit_done(&self, _tenant: &TenantId, _snapshot: ProgressSnapshot) {}

    fn tenant_finished(&self, _report: &TenantReport) {}
}

/// Ignores every event
#[derive(Debug, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Logs progress through `tracing`
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn tenant_started(&self, tenant: &TenantId, s: ProgressSnapshot) {
        info!(tenant = %tenant, "tenant {}/{} started", s.tenant_index, s.tenant_count);
    }

    fn unit_done(&self, tenant: &TenantId, s: ProgressSnapshot) {
        debug!(tenant = %tenant, "folder {}/{}", s.units_done, s.units_total);
    }

    fn tenant_finished(&self, report: &TenantReport) {
        info!(
            tenant = %report.tenant,
            status = ?report.status,
            units = report.units_total,
            errors = report.unit_errors.len(),
            findings = report.findings.len(),
            "tenant finished"
        );
    }
}

/// Process-scoped counters for one run
#[derive(Clone)]
pub struct RunProgress {
    inner: Arc<Counters>,
    observer: Arc<dyn ProgressObserver>,
}

struct Counters {
    tenant_count: usize,
    tenant_index: AtomicUsize,
    units_done: AtomicUsize,
    units_total: AtomicUsize,
}

impl RunProgress {
    pub fn new(tenant_count: usize, observer: Arc<dyn ProgressObserver>) -> Self {
        Self {
            inner: Arc::new(Counters {
                tenant_count,
                tenant_index: AtomicUsize::new(0),
                units_done: AtomicUsize::new(0),
                units_total: AtomicUsize::new(0),
            }),
            observer,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            tenant_index: self.inner.tenant_index.load(Ordering::SeqCst),
            tenant_count: self.inner.tenant_count,
            units_done: self.inner.units_done.load(Ordering::SeqCst),
            units_total: self.inner.units_total.load(Ordering::SeqCst),
        }
    }

    /// Reset per-tenant counters for the tenant at 1-based `index`
    pub fn start_tenant(&self, index: usize, tenant: &TenantId) {
        self.inner.tenant_index.store(index, Ordering::SeqCst);
        self.inner.units_done.store(0, Ordering::SeqCst);
        self.inner.units_total.store(0, Ordering::SeqCst);
        self.observer.tenant_started(tenant, self.snapshot());
    }

    /// Add `count` units to the current tenant's total
    pub fn plan_units(&self, tenant: &TenantId, count: usize) {
        self.inner.units_total.fetch_add(count, Ordering::SeqCst);
        self.observer.units_planned(tenant, self.snapshot());
    }

    /// Record one finished unit and notify the observer
    pub fn unit_done(&self, tenant: &TenantId) -> usize {
        let done = self.inner.units_done.fetch_add(1, Ordering::SeqCst) + 1;
        let mut snapshot = self.snapshot();
        snapshot.units_done = done;
        self.observer.unit_done(tenant, snapshot);
        done
    }

    pub fn finish_tenant(&self, report: &TenantReport) {
        self.observer.tenant_finished(report);
    }
}

impl std::fmt::Debug for RunProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunProgress")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}
