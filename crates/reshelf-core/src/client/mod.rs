//! Remote storage service contract.
//!
//! `ResourceClient` is the typed surface the workflows need: accounts,
//! folders and sharing grants. Transport and authentication belong to the
//! implementations:
//!
//! - [`http::HttpClient`] talks to the service's REST API (feature `http`)
//! - [`memory::MemoryService`] keeps the whole tree in process, for tests
//!   and rehearsals
//!
//! Workflows never call a `ResourceClient` directly; they go through
//! [`crate::gated::GatedClient`], which applies the rate gate and retry
//! policy to every call.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Account, Page, ResourceNode, Role, SharingGrant, TenantId};

#[cfg(feature = "http")]
pub mod http;
pub mod memory;

/// Typed operations against one session of the storage service.
#[async_trait]
pub trait ResourceClient: Clone + Send + Sync + 'static {
    /// Session acting on behalf of `tenant`
    fn as_tenant(&self, tenant: &TenantId) -> Self;

    /// Identity of the account this session acts as
    async fn current_account(&self) -> Result<Account>;

    /// One page of `node_id`'s children
    async fn list_children(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<ResourceNode>>;

    async fn get_node(&self, node_id: &str) -> Result<ResourceNode>;

    /// Create a folder; fails with `Error::Conflict` carrying the existing
    /// sibling when the name is taken.
    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<ResourceNode>;

    /// Re-parent a node
    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<ResourceNode>;

    async fn list_grants(&self, node_id: &str) -> Result<Vec<SharingGrant>>;

    /// Grant `grantee_id` access to a node; fails with
    /// `Error::AlreadyGrantee` when the grantee already holds one.
    async fn add_grant(&self, node_id: &str, grantee_id: &str, role: Role)
    -> Result<SharingGrant>;

    async fn remove_grant(&self, grant_id: &str) -> Result<()>;
}

/// Account management used by the fixture commands.
#[async_trait]
pub trait AccountAdmin: Send + Sync {
    /// Create a platform-only account with `name`
    async fn create_account(&self, name: &str) -> Result<Account>;

    async fn list_accounts(&self, limit: usize) -> Result<Vec<Account>>;

    /// Move everything `from_id` owns into `to_id`'s root
    async fn transfer_content(&self, from_id: &str, to_id: &str) -> Result<ResourceNode>;

    async fn delete_account(&self, account_id: &str, force: bool) -> Result<()>;

    /// Delete a folder and its contents
    async fn delete_folder(&self, node_id: &str, recursive: bool) -> Result<()>;
}
