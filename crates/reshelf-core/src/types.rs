//! Shared types for reshelf-core.
//!
//! These types are used by the client implementations, the workflows and the
//! run reports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Id of every tenant's root container
pub const ROOT_NODE_ID: &str = "0";

// ─────────────────────────────────────────────────────────────────────────────
// Identifiers
// ─────────────────────────────────────────────────────────────────────────────

/// Opaque id of one tenant account
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entity Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Folder,
    #[serde(other)]
    Other,
}

/// A folder-like entity in a tenant's tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub kind: NodeKind,
}

impl ResourceNode {
    pub fn is_folder(&self) -> bool {
        self.kind == NodeKind::Folder
    }
}

/// A record that an account may access a node at a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharingGrant {
    pub id: String,
    pub grantee_id: String,
    pub node_id: String,
    pub role: Role,
}

/// Collaboration roles, spelled the way the service spells them.
///
/// `Owner` and `Unknown` only come back from listings; neither can be
/// granted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "editor")]
    Editor,
    #[serde(rename = "viewer")]
    Viewer,
    #[serde(rename = "previewer")]
    Previewer,
    #[serde(rename = "uploader")]
    Uploader,
    #[serde(rename = "previewer uploader")]
    PreviewerUploader,
    #[serde(rename = "viewer uploader")]
    ViewerUploader,
    #[serde(rename = "co-owner")]
    CoOwner,
    #[serde(rename = "owner")]
    Owner,
    #[serde(rename = "unknown", other)]
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Editor => "editor",
            Role::Viewer => "viewer",
            Role::Previewer => "previewer",
            Role::Uploader => "uploader",
            Role::PreviewerUploader => "previewer uploader",
            Role::ViewerUploader => "viewer uploader",
            Role::CoOwner => "co-owner",
            Role::Owner => "owner",
            Role::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', " ").as_str() {
            "editor" => Ok(Role::Editor),
            "viewer" => Ok(Role::Viewer),
            "previewer" => Ok(Role::Previewer),
            "uploader" => Ok(Role::Uploader),
            "previewer uploader" => Ok(Role::PreviewerUploader),
            "viewer uploader" => Ok(Role::ViewerUploader),
            "co-owner" | "co owner" => Ok(Role::CoOwner),
            other => Err(Error::Config(format!("unknown sharing role '{}'", other))),
        }
    }
}

/// Identity of the account a session acts as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    pub login: String,
    pub name: String,
}

/// One page of a paginated listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub entries: Vec<T>,
    pub total_count: usize,
}

// ─────────────────────────────────────────────────────────────────────────────
// Run Settings
// ─────────────────────────────────────────────────────────────────────────────

/// Plain values the workflows consume; loading them is the caller's job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Name of the per-tenant consolidation folder
    pub top_folder_name: String,
    /// Account every tenant's content is shared with; never a work target
    pub search_tenant: TenantId,
    /// Role granted to the search tenant on the top folder
    pub search_role: Role,
    /// Tenants to process, in order
    pub tenants: Vec<TenantId>,
    /// Page size for listing tenant roots during reorganize
    pub root_page_size: usize,
    /// Page size for the root shape check during verify
    pub verify_root_page_size: usize,
    /// Page size for listing second-level folders
    pub child_page_size: usize,
}

impl Settings {
    pub fn new(
        top_folder_name: impl Into<String>,
        search_tenant: TenantId,
        tenants: Vec<TenantId>,
    ) -> Self {
        Self {
            top_folder_name: top_folder_name.into(),
            search_tenant,
            search_role: Role::Editor,
            tenants,
            root_page_size: 1000,
            verify_root_page_size: 100,
            child_page_size: 1000,
        }
    }

    pub fn is_search_tenant(&self, tenant: &TenantId) -> bool {
        &self.search_tenant == tenant
    }
}
