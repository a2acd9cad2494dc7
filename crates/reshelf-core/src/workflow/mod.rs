//! Per-tenant workers.
//!
//! Both workflows share the same shape: a short sequential preamble against
//! the tenant root, then one concurrent unit per folder joined with a single
//! barrier.

use std::sync::Arc;

use crate::client::ResourceClient;
use crate::error::Error;
use crate::gated::GatedClient;
use crate::progress::RunProgress;
use crate::report::{RunAbort, TenantReport, TenantStatus};
use crate::types::{Settings, TenantId};

pub mod reorganize;
pub mod verify;

pub use reorganize::reorganize_tenant;
pub use verify::verify_tenant;

/// Everything a worker needs for one tenant
#[derive(Clone)]
pub struct TenantContext<C> {
    /// Session acting as the tenant
    pub client: GatedClient<C>,
    pub tenant: TenantId,
    pub settings: Arc<Settings>,
    pub progress: RunProgress,
}

impl<C: ResourceClient> TenantContext<C> {
    pub fn new(
        client: GatedClient<C>,
        tenant: TenantId,
        settings: Arc<Settings>,
        progress: RunProgress,
    ) -> Self {
        Self {
            client,
            tenant,
            settings,
            progress,
        }
    }

    pub fn search_tenant_id(&self) -> &str {
        self.settings.search_tenant.as_str()
    }
}

/// What the orchestrator should do after a tenant
#[derive(Debug)]
pub enum TenantOutcome {
    /// Move on to the next tenant
    Continue(TenantReport),
    /// Stop the run
    Halt(TenantReport, RunAbort),
}

impl TenantOutcome {
    pub fn report(&self) -> &TenantReport {
        match self {
            TenantOutcome::Continue(r) | TenantOutcome::Halt(r, _) => r,
        }
    }
}

/// Status for a tenant whose preamble failed with `err`
pub(crate) fn failure_status(err: &Error, fatal: bool) -> TenantStatus {
    match err {
        Error::Cancelled => TenantStatus::Cancelled,
        _ if fatal => TenantStatus::Fatal {
            reason: err.to_string(),
        },
        _ => TenantStatus::Failed {
            reason: err.to_string(),
        },
    }
}
