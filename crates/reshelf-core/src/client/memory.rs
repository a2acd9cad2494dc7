//! In-process storage service.
//!
//! `MemoryService` holds accounts, folders and grants behind one mutex and
//! hands out `MemoryClient` sessions that act as a given account. It keeps
//! the remote service's observable rules:
//!
//! - every account has its own root (`"0"`)
//! - creating or moving into a taken name fails with `Error::Conflict`
//! - grants on a folder are inherited by its descendants under the same
//!   grant id, unless the descendant carries its own grant for that grantee
//! - granting an account that already holds a grant fails with
//!   `Error::AlreadyGrantee`
//!
//! Failures can be scripted per operation, either before the call takes
//! effect or after (a lost response), and every call is counted.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::{AccountAdmin, ResourceClient};
use crate::error::{Error, Result};
use crate::types::{
    Account, NodeKind, Page, ROOT_NODE_ID, ResourceNode, Role, SharingGrant, TenantId,
};

/// Operations that can be counted and scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    CurrentAccount,
    ListChildren,
    GetNode,
    CreateFolder,
    MoveNode,
    ListGrants,
    AddGrant,
    RemoveGrant,
    CreateAccount,
    ListAccounts,
    TransferContent,
    DeleteAccount,
    DeleteFolder,
}

/// A scripted failure
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// Fails with a transient error before the call takes effect
    Transient,
    /// Fails with a rate-limit response before the call takes effect
    RateLimited,
    /// Fails with a permanent remote error before the call takes effect
    Remote(u16),
    /// The call takes effect, then the response is lost
    LostResponse,
}

impl Fault {
    fn into_error(self, op: Op) -> Error {
        match self {
            Fault::Transient | Fault::LostResponse => {
                Error::transient(format!("injected failure in {:?}", op))
            }
            Fault::RateLimited => Error::RateLimited { retry_after: None },
            Fault::Remote(status) => Error::remote(status, format!("injected failure in {:?}", op)),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredNode {
    node: ResourceNode,
    owner: String,
}

#[derive(Debug, Default)]
struct State {
    next_id: u64,
    accounts: BTreeMap<u64, Account>,
    nodes: BTreeMap<u64, StoredNode>,
    grants: BTreeMap<u64, SharingGrant>,
    calls: HashMap<Op, usize>,
    faults: HashMap<Op, VecDeque<Option<Fault>>>,
}

impl State {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn account(&self, id: &str) -> Result<&Account> {
        parse_id(id)
            .and_then(|key| self.accounts.get(&key))
            .ok_or_else(|| Error::NotFound(format!("account {}", id)))
    }

    fn node(&self, id: &str) -> Result<&StoredNode> {
        parse_id(id)
            .and_then(|key| self.nodes.get(&key))
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    fn node_mut(&mut self, id: &str) -> Result<&mut StoredNode> {
        parse_id(id)
            .and_then(|key| self.nodes.get_mut(&key))
            .ok_or_else(|| Error::NotFound(format!("node {}", id)))
    }

    /// Children of `parent_id`; the root is scoped to `owner`
    fn children(&self, owner: &str, parent_id: &str) -> Vec<ResourceNode> {
        self.nodes
            .values()
            .filter(|s| s.node.parent_id.as_deref() == Some(parent_id))
            .filter(|s| parent_id != ROOT_NODE_ID || s.owner == owner)
            .map(|s| s.node.clone())
            .collect()
    }

    fn sibling_named(&self, owner: &str, parent_id: &str, name: &str) -> Option<ResourceNode> {
        self.children(owner, parent_id)
            .into_iter()
            .find(|n| n.name == name)
    }

    fn owner_of_parent(&self, acting_as: &str, parent_id: &str) -> Result<String> {
        if parent_id == ROOT_NODE_ID {
            Ok(acting_as.to_string())
        } else {
            Ok(self.node(parent_id)?.owner.clone())
        }
    }

    /// Grants that apply to a node: its own, plus ancestors' grants for
    /// grantees it does not grant itself.
    fn effective_grants(&self, node_id: &str) -> Vec<SharingGrant> {
        let mut result: Vec<SharingGrant> = Vec::new();
        let mut current = Some(node_id.to_string());

        while let Some(id) = current {
            if id == ROOT_NODE_ID {
                break;
            }
            let direct: Vec<&SharingGrant> =
                self.grants.values().filter(|g| g.node_id == id).collect();
            let shadowed: Vec<String> = result.iter().map(|g| g.grantee_id.clone()).collect();
            result.extend(
                direct
                    .into_iter()
                    .filter(|g| !shadowed.contains(&g.grantee_id))
                    .cloned(),
            );
            current = self
                .node(&id)
                .ok()
                .and_then(|s| s.node.parent_id.clone());
        }

        result
    }

    fn descendants(&self, node_id: &str) -> Vec<u64> {
        let mut out = Vec::new();
        let mut stack = vec![node_id.to_string()];
        while let Some(id) = stack.pop() {
            for (key, s) in &self.nodes {
                if s.node.parent_id.as_deref() == Some(id.as_str()) {
                    out.push(*key);
                    stack.push(s.node.id.clone());
                }
            }
        }
        out
    }

    fn insert_account(&mut self, name: &str) -> Account {
        let id = self.next_id();
        let account = Account {
            id: id.to_string(),
            login: format!("AppUser_{}@reshelf", id),
            name: name.to_string(),
        };
        self.accounts.insert(id, account.clone());
        account
    }

    fn remove_nodes(&mut self, keys: &[u64]) {
        for key in keys {
            if let Some(s) = self.nodes.remove(key) {
                self.grants.retain(|_, g| g.node_id != s.node.id);
            }
        }
    }
}

fn parse_id(id: &str) -> Option<u64> {
    id.parse().ok()
}

/// Shared in-process service state
#[derive(Debug)]
pub struct MemoryService {
    state: Mutex<State>,
    admin: Account,
    latency: Option<Duration>,
    page_cap: Option<usize>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MemoryService {
    /// New service with one governing (admin) account
    pub fn new() -> Arc<Self> {
        Self::build(None, None)
    }

    /// New service whose calls each take `latency` to complete
    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Self::build(Some(latency), None)
    }

    /// New service that returns at most `cap` entries per listing page,
    /// whatever limit the caller asks for
    pub fn with_page_cap(cap: usize) -> Arc<Self> {
        Self::build(None, Some(cap))
    }

    fn build(latency: Option<Duration>, page_cap: Option<usize>) -> Arc<Self> {
        let mut state = State::default();
        let id = state.next_id();
        let admin = Account {
            id: id.to_string(),
            login: "service-account@reshelf".to_string(),
            name: "Service Account".to_string(),
        };
        state.accounts.insert(id, admin.clone());

        Arc::new(Self {
            state: Mutex::new(state),
            admin,
            latency,
            page_cap,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn admin(&self) -> &Account {
        &self.admin
    }

    /// Session acting as the governing account
    pub fn admin_client(self: &Arc<Self>) -> MemoryClient {
        MemoryClient {
            service: Arc::clone(self),
            acting_as: self.admin.id.clone(),
        }
    }

    /// Session acting as `tenant`
    pub fn client_for(self: &Arc<Self>, tenant: &TenantId) -> MemoryClient {
        MemoryClient {
            service: Arc::clone(self),
            acting_as: tenant.as_str().to_string(),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Seeding and inspection (no faults, no accounting)
    // ─────────────────────────────────────────────────────────────────────────

    /// Create an account and return its tenant id
    pub fn seed_tenant(&self, name: &str) -> TenantId {
        TenantId::new(self.lock().insert_account(name).id)
    }

    /// Insert a folder owned by `owner`, ignoring name conflicts
    pub fn seed_folder(&self, owner: &TenantId, name: &str, parent_id: &str) -> ResourceNode {
        self.seed_node(owner, name, parent_id, NodeKind::Folder)
    }

    pub fn seed_node(
        &self,
        owner: &TenantId,
        name: &str,
        parent_id: &str,
        kind: NodeKind,
    ) -> ResourceNode {
        let mut state = self.lock();
        let id = state.next_id();
        let node = ResourceNode {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: Some(parent_id.to_string()),
            kind,
        };
        state.nodes.insert(
            id,
            StoredNode {
                node: node.clone(),
                owner: owner.as_str().to_string(),
            },
        );
        node
    }

    /// Insert a grant directly on a node, ignoring duplicates
    pub fn seed_grant(&self, node_id: &str, grantee: &TenantId, role: Role) -> SharingGrant {
        let mut state = self.lock();
        let id = state.next_id();
        let grant = SharingGrant {
            id: id.to_string(),
            grantee_id: grantee.as_str().to_string(),
            node_id: node_id.to_string(),
            role,
        };
        state.grants.insert(id, grant.clone());
        grant
    }

    pub fn node(&self, node_id: &str) -> Option<ResourceNode> {
        self.lock().node(node_id).ok().map(|s| s.node.clone())
    }

    /// Children of `parent_id` as seen by `owner`
    pub fn children_of(&self, owner: &TenantId, parent_id: &str) -> Vec<ResourceNode> {
        self.lock().children(owner.as_str(), parent_id)
    }

    /// Effective grants on a node
    pub fn grants_on(&self, node_id: &str) -> Vec<SharingGrant> {
        self.lock().effective_grants(node_id)
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.lock().accounts.values().cloned().collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fault injection and accounting
    // ─────────────────────────────────────────────────────────────────────────

    /// Make the next `times` calls of `op` fail with `fault`
    pub fn inject(&self, op: Op, fault: Fault, times: usize) {
        self.inject_after(op, 0, fault, times);
    }

    /// Let `skip` further calls of `op` through, then fail `times` with `fault`
    pub fn inject_after(&self, op: Op, skip: usize, fault: Fault, times: usize) {
        let mut state = self.lock();
        let queue = state.faults.entry(op).or_default();
        queue.extend(std::iter::repeat_n(None, skip));
        queue.extend(std::iter::repeat_n(Some(fault), times));
    }

    pub fn calls(&self, op: Op) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.lock().calls.values().sum()
    }

    /// Highest number of calls observed in flight at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Count the call, wait out the latency, and apply `f` subject to any
    /// scripted fault.
    async fn call<T>(&self, op: Op, f: impl FnOnce(&mut State) -> Result<T>) -> Result<T> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let result = {
            let mut state = self.lock();
            *state.calls.entry(op).or_default() += 1;
            let fault = state.faults.get_mut(&op).and_then(|q| q.pop_front()).flatten();
            trace!(?op, ?fault, "memory service call");

            match fault {
                Some(Fault::LostResponse) => {
                    f(&mut state).and(Err(Fault::LostResponse.into_error(op)))
                }
                Some(fault) => Err(fault.into_error(op)),
                None => f(&mut state),
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// A session acting as one account
#[derive(Debug, Clone)]
pub struct MemoryClient {
    service: Arc<MemoryService>,
    acting_as: String,
}

#[async_trait]
impl ResourceClient for MemoryClient {
    fn as_tenant(&self, tenant: &TenantId) -> Self {
        self.service.client_for(tenant)
    }

    async fn current_account(&self) -> Result<Account> {
        let me = self.acting_as.clone();
        self.service
            .call(Op::CurrentAccount, move |s| s.account(&me).cloned())
            .await
    }

    async fn list_children(
        &self,
        node_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Page<ResourceNode>> {
        let me = self.acting_as.clone();
        let limit = self.service.page_cap.map_or(limit, |cap| limit.min(cap));
        self.service
            .call(Op::ListChildren, move |s| {
                s.account(&me)?;
                if node_id != ROOT_NODE_ID {
                    s.node(node_id)?;
                }
                let all = s.children(&me, node_id);
                let total_count = all.len();
                let entries = all.into_iter().skip(offset).take(limit).collect();
                Ok(Page {
                    entries,
                    total_count,
                })
            })
            .await
    }

    async fn get_node(&self, node_id: &str) -> Result<ResourceNode> {
        self.service
            .call(Op::GetNode, move |s| s.node(node_id).map(|n| n.node.clone()))
            .await
    }

    async fn create_folder(&self, name: &str, parent_id: &str) -> Result<ResourceNode> {
        let me = self.acting_as.clone();
        self.service
            .call(Op::CreateFolder, move |s| {
                s.account(&me)?;
                let owner = s.owner_of_parent(&me, parent_id)?;
                if let Some(existing) = s.sibling_named(&owner, parent_id, name) {
                    return Err(Error::Conflict { existing });
                }
                let id = s.next_id();
                let node = ResourceNode {
                    id: id.to_string(),
                    name: name.to_string(),
                    parent_id: Some(parent_id.to_string()),
                    kind: NodeKind::Folder,
                };
                s.nodes.insert(
                    id,
                    StoredNode {
                        node: node.clone(),
                        owner,
                    },
                );
                Ok(node)
            })
            .await
    }

    async fn move_node(&self, node_id: &str, new_parent_id: &str) -> Result<ResourceNode> {
        let me = self.acting_as.clone();
        self.service
            .call(Op::MoveNode, move |s| {
                let name = s.node(node_id)?.node.name.clone();
                let owner = s.owner_of_parent(&me, new_parent_id)?;
                if let Some(existing) = s.sibling_named(&owner, new_parent_id, &name) {
                    if existing.id != node_id {
                        return Err(Error::Conflict { existing });
                    }
                }
                let stored = s.node_mut(node_id)?;
                stored.node.parent_id = Some(new_parent_id.to_string());
                stored.owner = owner;
                Ok(stored.node.clone())
            })
            .await
    }

    async fn list_grants(&self, node_id: &str) -> Result<Vec<SharingGrant>> {
        self.service
            .call(Op::ListGrants, move |s| {
                s.node(node_id)?;
                Ok(s.effective_grants(node_id))
            })
            .await
    }

    async fn add_grant(
        &self,
        node_id: &str,
        grantee_id: &str,
        role: Role,
    ) -> Result<SharingGrant> {
        self.service
            .call(Op::AddGrant, move |s| {
                s.node(node_id)?;
                s.account(grantee_id)?;
                if s
                    .effective_grants(node_id)
                    .iter()
                    .any(|g| g.grantee_id == grantee_id)
                {
                    return Err(Error::AlreadyGrantee {
                        node_id: node_id.to_string(),
                        grantee_id: grantee_id.to_string(),
                    });
                }
                let id = s.next_id();
                let grant = SharingGrant {
                    id: id.to_string(),
                    grantee_id: grantee_id.to_string(),
                    node_id: node_id.to_string(),
                    role,
                };
                s.grants.insert(id, grant.clone());
                Ok(grant)
            })
            .await
    }

    async fn remove_grant(&self, grant_id: &str) -> Result<()> {
        self.service
            .call(Op::RemoveGrant, move |s| {
                parse_id(grant_id)
                    .and_then(|key| s.grants.remove(&key))
                    .map(|_| ())
                    .ok_or_else(|| Error::NotFound(format!("grant {}", grant_id)))
            })
            .await
    }
}

#[async_trait]
impl AccountAdmin for MemoryClient {
    async fn create_account(&self, name: &str) -> Result<Account> {
        self.service
            .call(Op::CreateAccount, move |s| Ok(s.insert_account(name)))
            .await
    }

    async fn list_accounts(&self, limit: usize) -> Result<Vec<Account>> {
        self.service
            .call(Op::ListAccounts, move |s| {
                Ok(s.accounts.values().take(limit).cloned().collect())
            })
            .await
    }

    async fn transfer_content(&self, from_id: &str, to_id: &str) -> Result<ResourceNode> {
        self.service
            .call(Op::TransferContent, move |s| {
                let from = s.account(from_id)?.clone();
                s.account(to_id)?;

                let id = s.next_id();
                let holder = ResourceNode {
                    id: id.to_string(),
                    name: format!("{} ({}) Files and Folders", from.name, from.login),
                    parent_id: Some(ROOT_NODE_ID.to_string()),
                    kind: NodeKind::Folder,
                };
                s.nodes.insert(
                    id,
                    StoredNode {
                        node: holder.clone(),
                        owner: to_id.to_string(),
                    },
                );

                let top: Vec<String> = s
                    .children(from_id, ROOT_NODE_ID)
                    .into_iter()
                    .map(|n| n.id)
                    .collect();
                let mut moved: Vec<u64> = Vec::new();
                for node_id in &top {
                    moved.extend(parse_id(node_id));
                    moved.extend(s.descendants(node_id));
                }
                for key in moved {
                    if let Some(stored) = s.nodes.get_mut(&key) {
                        stored.owner = to_id.to_string();
                        if stored.node.parent_id.as_deref() == Some(ROOT_NODE_ID) {
                            stored.node.parent_id = Some(holder.id.clone());
                        }
                    }
                }

                Ok(holder)
            })
            .await
    }

    async fn delete_account(&self, account_id: &str, force: bool) -> Result<()> {
        self.service
            .call(Op::DeleteAccount, move |s| {
                let key = parse_id(account_id)
                    .filter(|k| s.accounts.contains_key(k))
                    .ok_or_else(|| Error::NotFound(format!("account {}", account_id)))?;

                let owned: Vec<u64> = s
                    .nodes
                    .iter()
                    .filter(|(_, n)| n.owner == account_id)
                    .map(|(k, _)| *k)
                    .collect();
                if !owned.is_empty() && !force {
                    return Err(Error::remote(409, "account still owns content"));
                }

                s.remove_nodes(&owned);
                s.grants.retain(|_, g| g.grantee_id != account_id);
                s.accounts.remove(&key);
                Ok(())
            })
            .await
    }

    async fn delete_folder(&self, node_id: &str, recursive: bool) -> Result<()> {
        self.service
            .call(Op::DeleteFolder, move |s| {
                let key = parse_id(node_id)
                    .filter(|k| s.nodes.contains_key(k))
                    .ok_or_else(|| Error::NotFound(format!("node {}", node_id)))?;

                let mut doomed = s.descendants(node_id);
                if !doomed.is_empty() && !recursive {
                    return Err(Error::remote(400, "folder not empty"));
                }
                doomed.push(key);
                s.remove_nodes(&doomed);
                Ok(())
            })
            .await
    }
}
