//! Per-tenant and per-run outcome reports.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, StructuralViolation};
use crate::types::{Account, TenantId};

/// Which workflow a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Workflow {
    Reorganize,
    Verify,
}

impl std::fmt::Display for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Workflow::Reorganize => f.write_str("reorganize"),
            Workflow::Verify => f.write_str("verify"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TenantStatus {
    /// Every unit ran; some may still have failed or produced findings
    Completed,
    /// Skipped as the search tenant
    Skipped,
    /// Tenant-level failure; the run moved on
    Failed { reason: String },
    /// Tenant-level failure that halted the whole run
    Fatal { reason: String },
    /// The run was cancelled while this tenant was active
    Cancelled,
}

/// A failed unit of work, with enough context to find the node by hand
#[derive(Debug, Clone, Serialize)]
pub struct UnitError {
    pub node_id: String,
    pub node_name: String,
    pub message: String,
}

impl UnitError {
    pub fn new(node_id: impl Into<String>, node_name: impl Into<String>, err: &Error) -> Self {
        Self {
            node_id: node_id.into(),
            node_name: node_name.into(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TenantReport {
    pub tenant: TenantId,
    pub status: TenantStatus,
    /// Units launched for this tenant
    pub units_total: usize,
    /// Units that finished without error (findings included)
    pub units_ok: usize,
    pub unit_errors: Vec<UnitError>,
    /// Data-quality findings (verify only)
    pub findings: Vec<StructuralViolation>,
}

impl TenantReport {
    pub fn new(tenant: TenantId) -> Self {
        Self {
            tenant,
            status: TenantStatus::Completed,
            units_total: 0,
            units_ok: 0,
            unit_errors: Vec::new(),
            findings: Vec::new(),
        }
    }

    pub fn skipped(tenant: TenantId) -> Self {
        Self {
            status: TenantStatus::Skipped,
            ..Self::new(tenant)
        }
    }

    pub fn with_status(mut self, status: TenantStatus) -> Self {
        self.status = status;
        self
    }

    pub fn mismatch_count(&self) -> usize {
        self.findings.iter().filter(|f| f.is_grant_mismatch()).count()
    }

    pub fn is_clean(&self) -> bool {
        matches!(self.status, TenantStatus::Completed | TenantStatus::Skipped)
            && self.unit_errors.is_empty()
            && self.findings.is_empty()
    }
}

/// Why a run stopped before the tenant list was exhausted
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cause", rename_all = "snake_case")]
pub enum RunAbort {
    Structural { violation: StructuralViolation },
    /// A tenant precondition could not be read
    TenantFailed { tenant: TenantId, reason: String },
    Cancelled,
}

impl std::fmt::Display for RunAbort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunAbort::Structural { violation } => write!(f, "{}", violation),
            RunAbort::TenantFailed { tenant, reason } => {
                write!(f, "tenant {}: {}", tenant, reason)
            }
            RunAbort::Cancelled => f.write_str("cancelled"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Also attached to every log line of the run
    pub run_id: Uuid,
    pub workflow: Workflow,
    /// Governing account the run acted through
    pub account: Account,
    pub started_at: DateTime<Utc>,
    #[serde(with = "duration_ms")]
    pub elapsed: Duration,
    pub tenants: Vec<TenantReport>,
    pub aborted: Option<RunAbort>,
}

impl RunReport {
    pub fn units_total(&self) -> usize {
        self.tenants.iter().map(|t| t.units_total).sum()
    }

    pub fn error_count(&self) -> usize {
        self.tenants.iter().map(|t| t.unit_errors.len()).sum::<usize>()
            + self
                .tenants
                .iter()
                .filter(|t| {
                    matches!(
                        t.status,
                        TenantStatus::Failed { .. } | TenantStatus::Fatal { .. }
                    )
                })
                .count()
    }

    pub fn finding_count(&self) -> usize {
        self.tenants.iter().map(|t| t.findings.len()).sum()
    }

    pub fn mismatch_count(&self) -> usize {
        self.tenants.iter().map(|t| t.mismatch_count()).sum()
    }

    /// Finished every tenant with no errors and no findings
    pub fn is_success(&self) -> bool {
        self.aborted.is_none() && self.tenants.iter().all(|t| t.is_clean())
    }
}

mod duration_ms {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}
