//! Rate-gated, cancellable wrapper around a [`ResourceClient`].
//!
//! Each attempt of each call passes the shared [`RateGate`] exactly once.
//! Reads and the two conflict-checked creates are retried under the
//! [`RetryPolicy`]; `move_node` and `remove_grant` are attempted once, since
//! repeating them blindly after a lost response is not safe. Their
//! `_checked` variants re-read the remote state before every retry.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::client::{AccountAdmin, ResourceClient};
use crate::error::{Error, Result};
use crate::rate_gate::RateGate;
use crate::retry::RetryPolicy;
use crate::types::{Account, Page, ResourceNode, Role, SharingGrant, TenantId};

#[derive(Debug, Clone)]
pub struct GatedClient<C> {
    inner: C,
    gate: RateGate,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<C: ResourceClient> GatedClient<C> {
    pub fn new(inner: C, gate: RateGate, retry: RetryPolicy, cancel: CancellationToken) -> Self {
        Self {
            inner,
            gate,
            retry,
            cancel,
        }
    }

    /// Gated session acting as `tenant`, sharing this client's gate and token
    pub fn for_tenant(&self, tenant: &TenantId) -> Self {
        Self {
            inner: self.inner.as_tenant(tenant),
            gate: self.gate.clone(),
            retry: self.retry.clone(),
            cancel: self.cancel.clone(),
        }
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for admission; fails fast once cancelled
    async fn admit(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        self.gate.acquire(&self.cancel).await
    }

    pub async fn current_account(&self) -> Result<Account> {
        self.retry
            .run("current_account", &self.cancel, || async move {
                self.admit().await?;
                self.inner.current_account().await
            })
            .await
    }

    pub async fn list_children(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<ResourceNode>> {
        self.retry
            .run("list_children", &self.cancel, || async move {
                self.admit().await?;
                self.inner.list_children(node_id, limit, offset).await
            })
            .await
    }

    /// Every child of `node_id`, paging until `offset >= total_count`
    ///
    /// The offset advances by what the service returned, since it may cap
    /// the page below `page_size`.
    pub async fn list_all_children(
        &self,
        node_id: &str,
        page_size: usize,
    ) -> Result<Vec<ResourceNode>> {
        let page_size = page_size.max(1);
        let mut nodes = Vec::new();
        let mut offset = 0;

        loop {
            let page = self.list_children(node_id, page_size, offset).await?;
            let received = page.entries.len();
            nodes.extend(page.entries);
            offset += received;

            if offset >= page.total_count || received == 0 {
                break;
            }
        }

        Ok(nodes)
    }

    pub async fn get_node(&self, node_id: &str) -> Result<ResourceNode> {
        self.retry
            .run("get_node", &self.cancel, || async move {
                self.admit().await?;
                self.inner.get_node(node_id).await
            })
            .await
    }

    /// Retrying is safe: a create that landed before a lost response comes
    /// back as `Error::Conflict` on the next attempt.
    pub async fn create_folder(&self, name: &str, parent_id: &str) -> Result<ResourceNode> {
        self.retry
            .run("create_folder", &self.cancel, || async move {
                self.admit().await?;
                self.inner.create_folder(name, parent_id).await
            })
            .await
    }

    pub async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<ResourceNode> {
        self.admit().await?;
        self.inner.move_node(node_id, new_parent_id).await
    }

    pub async fn list_grants(&self, node_id: &str) -> Result<Vec<SharingGrant>> {
        self.retry
            .run("list_grants", &self.cancel, || async move {
                self.admit().await?;
                self.inner.list_grants(node_id).await
            })
            .await
    }

    /// Retrying is safe: a grant that landed before a lost response comes
    /// back as `Error::AlreadyGrantee` on the next attempt.
    pub async fn add_grant(
        &self,
        node_id: &str,
        grantee_id: &str,
        role: Role,
    ) -> Result<SharingGrant> {
        self.retry
            .run("add_grant", &self.cancel, || async move {
                self.admit().await?;
                self.inner.add_grant(node_id, grantee_id, role).await
            })
            .await
    }

    pub async fn remove_grant(&self, grant_id: &str) -> Result<()> {
        self.admit().await?;
        self.inner.remove_grant(grant_id).await
    }

    /// Move `node_id`, retrying a failed attempt only if the node is not
    /// already under `new_parent_id`.
    pub async fn move_node_checked(
        &self,
        node_id: &str,
        new_parent_id: &str,
    ) -> Result<ResourceNode> {
        let attempted = &AtomicBool::new(false);
        self.retry
            .run("move_node", &self.cancel, || async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    let current = self.get_node(node_id).await?;
                    if current.parent_id.as_deref() == Some(new_parent_id) {
                        debug!(node_id, "move already applied");
                        return Ok(current);
                    }
                }
                self.move_node(node_id, new_parent_id).await
            })
            .await
    }

    /// Remove `grant_id` from `node_id`, retrying a failed attempt only if
    /// the grant is still listed. A grant that is already gone counts as
    /// removed.
    pub async fn remove_grant_checked(&self, node_id: &str, grant_id: &str) -> Result<()> {
        let attempted = &AtomicBool::new(false);
        self.retry
            .run("remove_grant", &self.cancel, || async move {
                if attempted.swap(true, Ordering::SeqCst) {
                    let grants = self.list_grants(node_id).await?;
                    if !grants.iter().any(|g| g.id == grant_id) {
                        debug!(node_id, grant_id, "grant removal already applied");
                        return Ok(());
                    }
                }
                match self.remove_grant(grant_id).await {
                    Err(Error::NotFound(_)) => Ok(()),
                    other => other,
                }
            })
            .await
    }
}

/// Account management, gated the same way. Only the listing is retried;
/// the mutations are attempted once.
impl<C: ResourceClient + AccountAdmin> GatedClient<C> {
    pub async fn create_account(&self, name: &str) -> Result<Account> {
        self.admit().await?;
        self.inner.create_account(name).await
    }

    pub async fn list_accounts(&self, limit: usize) -> Result<Vec<Account>> {
        self.retry
            .run("list_accounts", &self.cancel, || async move {
                self.admit().await?;
                self.inner.list_accounts(limit).await
            })
            .await
    }

    pub async fn transfer_content(&self, from_id: &str, to_id: &str) -> Result<ResourceNode> {
        self.admit().await?;
        self.inner.transfer_content(from_id, to_id).await
    }

    pub async fn delete_account(&self, account_id: &str, force: bool) -> Result<()> {
        self.admit().await?;
        self.inner.delete_account(account_id, force).await
    }

    pub async fn delete_folder(&self, node_id: &str, recursive: bool) -> Result<()> {
        self.admit().await?;
        self.inner.delete_folder(node_id, recursive).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{Fault, MemoryClient, MemoryService, Op};
    use std::sync::Arc;
    use crate::types::ROOT_NODE_ID;
    use std::num::NonZeroU32;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn gated(service: &Arc<MemoryService>, limit: u32) -> GatedClient<MemoryClient> {
        GatedClient::new(
            service.admin_client(),
            RateGate::per_second(NonZeroU32::new(limit).unwrap()),
            RetryPolicy::default(),
            CancellationToken::new(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_children_pages_through() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        for i in 0..7 {
            service.seed_folder(&tenant, &format!("F{}", i), ROOT_NODE_ID);
        }
        let client = gated(&service, 16).for_tenant(&tenant);

        let all = client.list_all_children(ROOT_NODE_ID, 3).await.unwrap();
        assert_eq!(all.len(), 7);
        assert_eq!(service.calls(Op::ListChildren), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_all_children_follows_short_pages() {
        let service = MemoryService::with_page_cap(2);
        let tenant = service.seed_tenant("t");
        for i in 0..7 {
            service.seed_folder(&tenant, &format!("F{}", i), ROOT_NODE_ID);
        }
        let client = gated(&service, 16).for_tenant(&tenant);

        let all = assert_ok!(client.list_all_children(ROOT_NODE_ID, 5).await);
        let mut names: Vec<String> = all.into_iter().map(|n| n.name).collect();
        names.sort();
        assert_eq!(names, (0..7).map(|i| format!("F{}", i)).collect::<Vec<_>>());
        assert_eq!(service.calls(Op::ListChildren), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reads_retry_transient_failures() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        service.inject(Op::ListChildren, Fault::Transient, 2);
        let client = gated(&service, 16).for_tenant(&tenant);

        let page = client.list_children(ROOT_NODE_ID, 10, 0).await.unwrap();
        assert_eq!(page.total_count, 0);
        assert_eq!(service.calls(Op::ListChildren), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_are_not_retried() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        let top = service.seed_folder(&tenant, "TOP", ROOT_NODE_ID);
        let child = service.seed_folder(&tenant, "A", ROOT_NODE_ID);
        service.inject(Op::MoveNode, Fault::Transient, 1);
        let client = gated(&service, 16).for_tenant(&tenant);

        assert!(assert_err!(client.move_node(&child.id, &top.id).await).is_transient());
        assert_eq!(service.calls(Op::MoveNode), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_call_is_gated() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        let client = gated(&service, 2).for_tenant(&tenant);
        let start = tokio::time::Instant::now();

        for _ in 0..5 {
            client.list_children(ROOT_NODE_ID, 10, 0).await.unwrap();
        }

        // 2 per second: admissions at 0, 0, 1, 1, 2
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checked_move_rechecks_after_lost_response() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        let top = service.seed_folder(&tenant, "TOP", ROOT_NODE_ID);
        let child = service.seed_folder(&tenant, "A", ROOT_NODE_ID);
        service.inject(Op::MoveNode, Fault::LostResponse, 1);
        let client = gated(&service, 16).for_tenant(&tenant);

        let moved = assert_ok!(client.move_node_checked(&child.id, &top.id).await);
        assert_eq!(moved.parent_id.as_deref(), Some(top.id.as_str()));
        assert_eq!(service.calls(Op::MoveNode), 1);
        assert_eq!(service.calls(Op::GetNode), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_checked_move_retries_when_not_applied() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        let top = service.seed_folder(&tenant, "TOP", ROOT_NODE_ID);
        let child = service.seed_folder(&tenant, "A", ROOT_NODE_ID);
        service.inject(Op::MoveNode, Fault::Transient, 1);
        let client = gated(&service, 16).for_tenant(&tenant);

        client.move_node_checked(&child.id, &top.id).await.unwrap();
        assert_eq!(service.calls(Op::MoveNode), 2);
        assert_eq!(service.node(&child.id).unwrap().parent_id, Some(top.id));
    }

    #[tokio::test(start_paused = true)]
    async fn test_checked_remove_treats_vanished_grant_as_removed() {
        let service = MemoryService::new();
        let tenant = service.seed_tenant("t");
        let search = service.seed_tenant("search");
        let folder = service.seed_folder(&tenant, "A", ROOT_NODE_ID);
        let grant = service.seed_grant(&folder.id, &search, crate::types::Role::Editor);
        service.inject(Op::RemoveGrant, Fault::LostResponse, 1);
        let client = gated(&service, 16).for_tenant(&tenant);

        assert_ok!(client.remove_grant_checked(&folder.id, &grant.id).await);
        assert!(service.grants_on(&folder.id).is_empty());
        assert_eq!(service.calls(Op::RemoveGrant), 1);
        assert_eq!(service.calls(Op::ListGrants), 1);
    }

    #[tokio::test]
    async fn test_cancelled_client_makes_no_calls() {
        let service = MemoryService::new();
        let client = gated(&service, 16);
        client.cancel_token().cancel();

        assert!(client.current_account().await.unwrap_err().is_cancelled());
        assert_eq!(service.total_calls(), 0);
    }
}
