//! Verify: read-only check that a reorganized tenant has the expected shape.
//!
//! A malformed root or a top folder without exactly one search grant halts
//! the run. Subfolder grant problems are recorded as findings and the check
//! moves on.

use std::collections::HashMap;

use tracing::{debug, error, info, warn};

use super::{TenantContext, TenantOutcome, failure_status};
use crate::client::ResourceClient;
use crate::error::{Error, Result, StructuralViolation};
use crate::fanout::FanOut;
use crate::gated::GatedClient;
use crate::report::{RunAbort, TenantReport, TenantStatus, UnitError};
use crate::types::{ROOT_NODE_ID, ResourceNode, SharingGrant, TenantId};

/// The single root folder, if the root has the expected shape
pub async fn check_root_shape<C: ResourceClient>(
    client: &GatedClient<C>,
    tenant: &TenantId,
    top_folder_name: &str,
    page_size: usize,
) -> Result<ResourceNode> {
    let mut folders: Vec<ResourceNode> = client
        .list_all_children(ROOT_NODE_ID, page_size)
        .await?
        .into_iter()
        .filter(ResourceNode::is_folder)
        .collect();

    match folders.pop() {
        Some(top) if folders.is_empty() && top.name == top_folder_name => Ok(top),
        last => {
            let found = folders.into_iter().chain(last).map(|n| n.name).collect();
            Err(StructuralViolation::RootShape {
                tenant: tenant.clone(),
                expected: top_folder_name.to_string(),
                found,
            }
            .into())
        }
    }
}

/// The top folder's one grant to the search tenant
pub async fn top_search_grant<C: ResourceClient>(
    client: &GatedClient<C>,
    tenant: &TenantId,
    top: &ResourceNode,
    search: &TenantId,
) -> Result<SharingGrant> {
    let mut grants = search_grants(client.list_grants(&top.id).await?, search);

    match grants.len() {
        1 => Ok(grants.remove(0)),
        0 => Err(StructuralViolation::MissingTopGrant {
            tenant: tenant.clone(),
            folder_id: top.id.clone(),
        }
        .into()),
        count => Err(StructuralViolation::DuplicateTopGrant {
            tenant: tenant.clone(),
            folder_id: top.id.clone(),
            count,
        }
        .into()),
    }
}

/// Check one second-level folder against the top grant
pub async fn check_subfolder<C: ResourceClient>(
    client: &GatedClient<C>,
    tenant: &TenantId,
    folder: &ResourceNode,
    search: &TenantId,
    top_grant: &SharingGrant,
) -> Result<Option<StructuralViolation>> {
    let grants = search_grants(client.list_grants(&folder.id).await?, search);

    let finding = match grants.as_slice() {
        [grant] if grant.id == top_grant.id => None,
        [grant] => Some(StructuralViolation::GrantMismatch {
            tenant: tenant.clone(),
            folder_id: folder.id.clone(),
            folder_name: folder.name.clone(),
            expected: top_grant.id.clone(),
            found: grant.id.clone(),
        }),
        other => Some(StructuralViolation::SubfolderGrantCount {
            tenant: tenant.clone(),
            folder_id: folder.id.clone(),
            folder_name: folder.name.clone(),
            count: other.len(),
        }),
    };
    Ok(finding)
}

fn search_grants(grants: Vec<SharingGrant>, search: &TenantId) -> Vec<SharingGrant> {
    grants
        .into_iter()
        .filter(|g| g.grantee_id == search.as_str())
        .collect()
}

/// Run the verify workflow for one tenant
pub async fn verify_tenant<C: ResourceClient>(ctx: &TenantContext<C>) -> TenantOutcome {
    let tenant = &ctx.tenant;
    if ctx.settings.is_search_tenant(tenant) {
        return TenantOutcome::Continue(TenantReport::skipped(tenant.clone()));
    }

    let (top, top_grant, folders) = match prepare(ctx).await {
        Ok(prepared) => prepared,
        Err(e) => return halt(tenant, e),
    };

    let mut names = HashMap::with_capacity(folders.len());
    let mut units = FanOut::new();
    ctx.progress.plan_units(tenant, folders.len());

    for folder in folders {
        names.insert(folder.id.clone(), folder.name.clone());

        let client = ctx.client.clone();
        let progress = ctx.progress.clone();
        let tenant = tenant.clone();
        let search = ctx.settings.search_tenant.clone();
        let top_grant = top_grant.clone();

        units.spawn(folder.id.clone(), async move {
            let result = check_subfolder(&client, &tenant, &folder, &search, &top_grant).await;
            progress.unit_done(&tenant);
            result
        });
    }

    let mut report = TenantReport::new(tenant.clone());
    report.units_total = units.len();

    for unit in units.join_all().await {
        match unit.result {
            Ok(None) => report.units_ok += 1,
            Ok(Some(finding)) => {
                warn!(tenant = %tenant, folder_id = %unit.label, "{}", finding);
                report.units_ok += 1;
                report.findings.push(finding);
            }
            Err(e) => {
                let name = names.get(&unit.label).map(String::as_str).unwrap_or("");
                warn!(
                    tenant = %tenant,
                    folder_id = %unit.label,
                    name,
                    error = %e,
                    "folder check failed"
                );
                report.unit_errors.push(UnitError::new(unit.label, name, &e));
            }
        }
    }

    debug!(
        tenant = %tenant,
        top_id = %top.id,
        checked = report.units_total,
        findings = report.findings.len(),
        "tenant verified"
    );

    if ctx.client.is_cancelled() {
        report.status = TenantStatus::Cancelled;
        return TenantOutcome::Halt(report, RunAbort::Cancelled);
    }
    TenantOutcome::Continue(report)
}

async fn prepare<C: ResourceClient>(
    ctx: &TenantContext<C>,
) -> Result<(ResourceNode, SharingGrant, Vec<ResourceNode>)> {
    let settings = &ctx.settings;
    let top = check_root_shape(
        &ctx.client,
        &ctx.tenant,
        &settings.top_folder_name,
        settings.verify_root_page_size,
    )
    .await?;
    let top_grant =
        top_search_grant(&ctx.client, &ctx.tenant, &top, &settings.search_tenant).await?;

    let folders: Vec<ResourceNode> = ctx
        .client
        .list_all_children(&top.id, settings.child_page_size)
        .await?
        .into_iter()
        .filter(ResourceNode::is_folder)
        .collect();

    info!(
        tenant = %ctx.tenant,
        top_id = %top.id,
        grant_id = %top_grant.id,
        folders = folders.len(),
        "checking folders"
    );
    Ok((top, top_grant, folders))
}

/// Every preamble failure stops the run
fn halt(tenant: &TenantId, err: Error) -> TenantOutcome {
    let report = TenantReport::new(tenant.clone()).with_status(failure_status(&err, true));
    let abort = match err {
        Error::Structural(violation) => {
            error!(tenant = %tenant, "{}", violation);
            RunAbort::Structural { violation }
        }
        Error::Cancelled => RunAbort::Cancelled,
        other => {
            error!(tenant = %tenant, error = %other, "verify preamble failed");
            RunAbort::TenantFailed {
                tenant: tenant.clone(),
                reason: other.to_string(),
            }
        }
    };
    TenantOutcome::Halt(report, abort)
}
