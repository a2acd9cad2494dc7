//! Error types for reshelf-core.

use std::time::Duration;

use thiserror::Error;

use crate::types::{ResourceNode, TenantId};

/// Result type alias using reshelf-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for remote operations and workflow findings
#[derive(Error, Debug)]
pub enum Error {
    // Expected conflicts (recovered by callers)
    #[error("'{}' already exists under this parent (id {})", existing.name, existing.id)]
    Conflict { existing: ResourceNode },

    #[error("{grantee_id} already holds a grant on node {node_id}")]
    AlreadyGrantee { node_id: String, grantee_id: String },

    // Domain findings
    #[error("structural violation: {0}")]
    Structural(#[from] StructuralViolation),

    // Remote failures
    #[error("transient remote failure: {0}")]
    Transient(String),

    #[error("rate limited by remote service")]
    RateLimited { retry_after: Option<Duration> },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("remote error {status}: {message}")]
    Remote { status: u16, message: String },

    #[error("operation cancelled")]
    Cancelled,

    // Local errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create a remote (non-retriable) error
    pub fn remote(status: u16, message: impl Into<String>) -> Self {
        Self::Remote {
            status,
            message: message.into(),
        }
    }

    /// Whether a retry of the same call may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Mismatch between the expected and observed shape of a tenant's tree.
///
/// Every variant carries the tenant and enough of the offending resource
/// to locate it by hand.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralViolation {
    #[error(
        "tenant {tenant}: expected exactly one root folder named '{expected}', \
         found {found:?}"
    )]
    RootShape {
        tenant: TenantId,
        expected: String,
        found: Vec<String>,
    },

    #[error("tenant {tenant}: creating top folder returned a conflict without the existing folder")]
    TopFolderUnresolved { tenant: TenantId },

    #[error("tenant {tenant}: top folder {folder_id} has no grant to the search tenant")]
    MissingTopGrant { tenant: TenantId, folder_id: String },

    #[error(
        "tenant {tenant}: top folder {folder_id} has {count} grants to the search tenant, \
         expected 1"
    )]
    DuplicateTopGrant {
        tenant: TenantId,
        folder_id: String,
        count: usize,
    },

    #[error(
        "tenant {tenant}: folder {folder_id} ('{folder_name}') has {count} grants \
         to the search tenant, expected 1"
    )]
    SubfolderGrantCount {
        tenant: TenantId,
        folder_id: String,
        folder_name: String,
        count: usize,
    },

    #[error(
        "tenant {tenant}: folder {folder_id} ('{folder_name}') carries grant {found}, \
         top folder carries {expected}"
    )]
    GrantMismatch {
        tenant: TenantId,
        folder_id: String,
        folder_name: String,
        expected: String,
        found: String,
    },
}

impl StructuralViolation {
    pub fn tenant(&self) -> &TenantId {
        match self {
            Self::RootShape { tenant, .. }
            | Self::TopFolderUnresolved { tenant }
            | Self::MissingTopGrant { tenant, .. }
            | Self::DuplicateTopGrant { tenant, .. }
            | Self::SubfolderGrantCount { tenant, .. }
            | Self::GrantMismatch { tenant, .. } => tenant,
        }
    }

    /// Identity mismatches are counted separately from missing/duplicate grants
    pub fn is_grant_mismatch(&self) -> bool {
        matches!(self, Self::GrantMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(Error::transient("reset").is_transient());
        assert!(Error::RateLimited { retry_after: None }.is_transient());
        assert!(!Error::remote(403, "forbidden").is_transient());
        assert!(!Error::Cancelled.is_transient());
        assert!(!Error::NotFound("x".into()).is_transient());
    }

    #[test]
    fn test_violation_message_names_tenant_and_folder() {
        let v = StructuralViolation::GrantMismatch {
            tenant: TenantId::from("t-1"),
            folder_id: "f-9".into(),
            folder_name: "North".into(),
            expected: "G1".into(),
            found: "G2".into(),
        };
        let msg = v.to_string();
        assert!(msg.contains("t-1"));
        assert!(msg.contains("f-9"));
        assert!(msg.contains("G2"));
        assert!(v.is_grant_mismatch());
        assert_eq!(v.tenant().as_str(), "t-1");
    }

    #[test]
    fn test_structural_converts_into_error() {
        let err: Error = StructuralViolation::TopFolderUnresolved {
            tenant: TenantId::from("t"),
        }
        .into();
        assert!(matches!(err, Error::Structural(_)));
    }
}
