//! Reorganize: collect every root folder of a tenant under one top folder.
//!
//! The search tenant loses its direct grant on each moved folder and keeps a
//! single grant on the top folder, which the moved folders then inherit.
//! Every step tolerates a previous partial run, so the workflow can be
//! repeated until it reports no errors.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::{TenantContext, failure_status};
use crate::client::ResourceClient;
use crate::error::{Error, Result, StructuralViolation};
use crate::fanout::FanOut;
use crate::gated::GatedClient;
use crate::report::{TenantReport, TenantStatus, UnitError};
use crate::types::{ROOT_NODE_ID, ResourceNode, Role, SharingGrant, TenantId};

/// Create the top folder at the tenant root, or adopt the one already there
pub async fn ensure_top_folder<C: ResourceClient>(
    client: &GatedClient<C>,
    tenant: &TenantId,
    name: &str,
) -> Result<ResourceNode> {
    match client.create_folder(name, ROOT_NODE_ID).await {
        Ok(folder) => {
            info!(tenant = %tenant, folder_id = %folder.id, "created top folder");
            Ok(folder)
        }
        Err(Error::Conflict { existing }) if existing.is_folder() => {
            debug!(tenant = %tenant, folder_id = %existing.id, "adopting existing top folder");
            Ok(existing)
        }
        Err(Error::Conflict { .. }) | Err(Error::Remote { status: 409, .. }) => {
            Err(StructuralViolation::TopFolderUnresolved {
                tenant: tenant.clone(),
            }
            .into())
        }
        Err(e) => Err(e),
    }
}

/// Grant `grantee` access to `node_id` unless it already has it.
///
/// Returns the new grant, or `None` when one was already in place.
pub async fn ensure_search_grant<C: ResourceClient>(
    client: &GatedClient<C>,
    node_id: &str,
    grantee: &TenantId,
    role: Role,
) -> Result<Option<SharingGrant>> {
    match client.add_grant(node_id, grantee.as_str(), role).await {
        Ok(grant) => {
            info!(node_id, grant_id = %grant.id, role = %role, "granted search tenant");
            Ok(Some(grant))
        }
        Err(Error::AlreadyGrantee { .. }) => {
            info!(node_id, grantee = %grantee, "search tenant already has access");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Drop the search tenant's grants on `node` and move it under `top_id`
pub async fn migrate_node<C: ResourceClient>(
    client: &GatedClient<C>,
    node: &ResourceNode,
    top_id: &str,
    search: &TenantId,
) -> Result<ResourceNode> {
    let grants = client.list_grants(&node.id).await?;
    for grant in grants.iter().filter(|g| g.grantee_id == search.as_str()) {
        client.remove_grant_checked(&node.id, &grant.id).await?;
        debug!(node_id = %node.id, grant_id = %grant.id, "removed search grant");
    }

    let moved = client.move_node_checked(&node.id, top_id).await?;
    debug!(node_id = %node.id, name = %node.name, "moved under top folder");
    Ok(moved)
}

/// Run the reorganize workflow for one tenant.
///
/// Preamble failures end the tenant with `Failed`; the caller moves on to
/// the next tenant. Unit failures are collected without disturbing siblings.
pub async fn reorganize_tenant<C: ResourceClient>(ctx: &TenantContext<C>) -> TenantReport {
    let tenant = &ctx.tenant;
    if ctx.settings.is_search_tenant(tenant) {
        return TenantReport::skipped(tenant.clone());
    }

    let (top, roots) = match prepare(ctx).await {
        Ok(prepared) => prepared,
        Err(e) => {
            warn!(tenant = %tenant, error = %e, "reorganize preamble failed");
            return TenantReport::new(tenant.clone()).with_status(failure_status(&e, false));
        }
    };

    let mut names = HashMap::with_capacity(roots.len());
    let mut units = FanOut::new();
    ctx.progress.plan_units(tenant, roots.len());

    for node in roots {
        names.insert(node.id.clone(), node.name.clone());

        let client = ctx.client.clone();
        let progress = ctx.progress.clone();
        let tenant = tenant.clone();
        let search = ctx.settings.search_tenant.clone();
        let top_id = top.id.clone();

        units.spawn(node.id.clone(), async move {
            let result = migrate_node(&client, &node, &top_id, &search).await;
            progress.unit_done(&tenant);
            result.map(|_| ())
        });
    }

    let mut report = TenantReport::new(tenant.clone());
    report.units_total = units.len();

    for unit in units.join_all().await {
        match unit.result {
            Ok(()) => report.units_ok += 1,
            Err(e) => {
                let name = names.get(&unit.label).map(String::as_str).unwrap_or("");
                warn!(
                    tenant = %tenant,
                    node_id = %unit.label,
                    name,
                    error = %e,
                    "folder migration failed"
                );
                report.unit_errors.push(UnitError::new(unit.label, name, &e));
            }
        }
    }

    if ctx.client.is_cancelled() {
        report.status = TenantStatus::Cancelled;
    }
    report
}

/// Top folder with the search grant in place, plus the root folders to move
async fn prepare<C: ResourceClient>(
    ctx: &TenantContext<C>,
) -> Result<(ResourceNode, Vec<ResourceNode>)> {
    let settings = &ctx.settings;
    let top = ensure_top_folder(&ctx.client, &ctx.tenant, &settings.top_folder_name).await?;
    ensure_search_grant(&ctx.client, &top.id, &settings.search_tenant, settings.search_role)
        .await?;

    // Listed in full before anything moves, so paging offsets stay stable
    let roots: Vec<ResourceNode> = ctx
        .client
        .list_all_children(ROOT_NODE_ID, settings.root_page_size)
        .await?
        .into_iter()
        .filter(|n| n.is_folder() && n.id != top.id)
        .collect();

    info!(tenant = %ctx.tenant, top_id = %top.id, folders = roots.len(), "moving root folders");
    Ok((top, roots))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::memory::{Fault, Op};
    use crate::types::NodeKind;
    use crate::client::memory::MemoryService;
    use crate::workflow::testkit::{TOP, admin, context, world, world_on};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_ensure_top_folder_is_idempotent() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        let client = admin(&service).for_tenant(tenant);

        let first = ensure_top_folder(&client, tenant, TOP).await.unwrap();
        let second = ensure_top_folder(&client, tenant, TOP).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(service.children_of(tenant, ROOT_NODE_ID).len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_top_folder_name_taken_by_file_is_structural() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        service.seed_node(tenant, TOP, ROOT_NODE_ID, NodeKind::Other);
        let client = admin(&service).for_tenant(tenant);

        let err = ensure_top_folder(&client, tenant, TOP).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Structural(StructuralViolation::TopFolderUnresolved { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ensure_search_grant_is_idempotent() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        let top = service.seed_folder(tenant, TOP, ROOT_NODE_ID);
        let client = admin(&service).for_tenant(tenant);

        let first = ensure_search_grant(&client, &top.id, &settings.search_tenant, Role::Editor)
            .await
            .unwrap();
        let second = ensure_search_grant(&client, &top.id, &settings.search_tenant, Role::Editor)
            .await
            .unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
        let grants = service.grants_on(&top.id);
        assert_eq!(grants.len(), 1);
        assert_eq!(grants[0].grantee_id, settings.search_tenant.as_str());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorganize_moves_folders_and_strips_their_grants() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        let search = &settings.search_tenant;
        let top = service.seed_folder(tenant, TOP, ROOT_NODE_ID);
        let top_grant = service.seed_grant(&top.id, search, Role::Editor);
        let a = service.seed_folder(tenant, "A", ROOT_NODE_ID);
        let b = service.seed_folder(tenant, "B", ROOT_NODE_ID);
        service.seed_grant(&a.id, search, Role::Editor);
        service.seed_grant(&b.id, search, Role::Viewer);

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert_eq!(report.status, TenantStatus::Completed);
        assert_eq!(report.units_total, 2);
        assert_eq!(report.units_ok, 2);
        assert!(report.unit_errors.is_empty());

        for folder in [&a, &b] {
            let moved = service.node(&folder.id).unwrap();
            assert_eq!(moved.parent_id.as_deref(), Some(top.id.as_str()));
            // Only the inherited top grant remains
            let grants = service.grants_on(&folder.id);
            assert_eq!(grants.len(), 1);
            assert_eq!(grants[0].id, top_grant.id);
        }
        assert_eq!(service.grants_on(&top.id), vec![top_grant]);
        assert_eq!(service.children_of(tenant, ROOT_NODE_ID), vec![service.node(&top.id).unwrap()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_folders_are_migrated_concurrently() {
        let service = MemoryService::with_latency(Duration::from_millis(500));
        let (service, settings) = world_on(service, 1);
        let tenant = &settings.tenants[0];
        for i in 0..10 {
            let folder = service.seed_folder(tenant, &format!("F{}", i), ROOT_NODE_ID);
            service.seed_grant(&folder.id, &settings.search_tenant, Role::Editor);
        }

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert_eq!(report.units_ok, 10);
        assert!(service.max_in_flight() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reorganize_leaves_files_at_root() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        service.seed_node(tenant, "notes.txt", ROOT_NODE_ID, NodeKind::Other);
        service.seed_folder(tenant, "A", ROOT_NODE_ID);

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert_eq!(report.units_total, 1);
        assert_eq!(service.children_of(tenant, ROOT_NODE_ID).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_is_a_no_op() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        for name in ["A", "B", "C"] {
            service.seed_folder(tenant, name, ROOT_NODE_ID);
        }
        let ctx = context(&service, &settings, tenant);

        let first = reorganize_tenant(&ctx).await;
        let second = reorganize_tenant(&ctx).await;

        assert_eq!(first.units_ok, 3);
        assert_eq!(second.units_total, 0);
        assert_eq!(second.status, TenantStatus::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unit_failure_does_not_disturb_siblings() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        let top = service.seed_folder(tenant, TOP, ROOT_NODE_ID);
        for name in ["A", "B", "C"] {
            service.seed_folder(tenant, name, ROOT_NODE_ID);
        }
        service.inject(Op::MoveNode, Fault::Remote(403), 1);

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert_eq!(report.status, TenantStatus::Completed);
        assert_eq!(report.units_total, 3);
        assert_eq!(report.units_ok, 2);
        assert_eq!(report.unit_errors.len(), 1);
        assert!(report.unit_errors[0].message.contains("403"));
        assert!(!report.unit_errors[0].node_name.is_empty());
        assert_eq!(service.children_of(tenant, &top.id).len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_move_response_is_not_repeated() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        let a = service.seed_folder(tenant, "A", ROOT_NODE_ID);
        service.inject(Op::MoveNode, Fault::LostResponse, 1);

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert_eq!(report.units_ok, 1);
        assert_eq!(service.calls(Op::MoveNode), 1);
        assert_ne!(service.node(&a.id).unwrap().parent_id.as_deref(), Some(ROOT_NODE_ID));
    }

    #[tokio::test(start_paused = true)]
    async fn test_preamble_failure_marks_tenant_failed() {
        let (service, settings) = world(1);
        let tenant = &settings.tenants[0];
        service.seed_folder(tenant, "A", ROOT_NODE_ID);
        service.inject(Op::CreateFolder, Fault::Remote(403), 1);

        let report = reorganize_tenant(&context(&service, &settings, tenant)).await;

        assert!(matches!(report.status, TenantStatus::Failed { .. }));
        assert_eq!(report.units_total, 0);
        assert_eq!(service.calls(Op::MoveNode), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_search_tenant_is_skipped() {
        let (service, settings) = world(1);
        let search = settings.search_tenant.clone();

        let report = reorganize_tenant(&context(&service, &settings, &search)).await;

        assert_eq!(report.status, TenantStatus::Skipped);
        assert_eq!(service.total_calls(), 0);
    }
}
