//! reshelf-core - Tenant folder reorganization engine
//!
//! This crate holds everything the reshelf CLI runs against a remote
//! storage service:
//!
//! - **client**: remote resource contract, HTTP and in-memory implementations
//! - **rate_gate**: process-wide sliding-window call admission
//! - **gated**: client wrapper that gates, retries and cancels every call
//! - **workflow**: per-tenant reorganize and verify workers
//! - **orchestrator**: sequential tenant driver
//! - **report**: per-tenant and per-run outcomes

pub mod client;
pub mod error;
pub mod fanout;
pub mod gated;
pub mod orchestrator;
pub mod progress;
pub mod rate_gate;
pub mod report;
pub mod retry;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use client::{AccountAdmin, ResourceClient};
pub use error::{Error, Result, StructuralViolation};
pub use gated::GatedClient;
pub use orchestrator::Orchestrator;
pub use progress::{NoopObserver, ProgressObserver, ProgressSnapshot, RunProgress, TracingObserver};
pub use rate_gate::RateGate;
pub use report::{RunAbort, RunReport, TenantReport, TenantStatus, UnitError, Workflow};
pub use retry::RetryPolicy;
pub use types::{Account, ROOT_NODE_ID, ResourceNode, Role, Settings, SharingGrant, TenantId};
