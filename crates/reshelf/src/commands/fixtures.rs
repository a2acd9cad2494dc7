//! Test tenant management commands.
//!
//! Provisioned account ids are kept in a JSON array (search account last)
//! so `delete` can find them again; `discover` rebuilds that file from the
//! account listing.

use std::path::Path;

use anyhow::{Context, Result, bail};
use colored::Colorize;
use dialoguer::Confirm;
use reshelf_core::fanout::FanOut;
use reshelf_core::{
    Account, AccountAdmin, Error, GatedClient, ROOT_NODE_ID, ResourceClient, Role, TenantId,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::connect;
use crate::cli::{FixturesAction, FixturesCommand};
use crate::config::{Config, FixturesConfig};
use crate::error::{ReshelfError, ReshelfResult};

/// Login prefix the service gives platform-only accounts
const APP_USER_LOGIN_PREFIX: &str = "AppUser_";

/// Account listing limit for `discover`
const DISCOVER_LIMIT: usize = 1000;

pub async fn execute(
    cmd: FixturesCommand,
    config: &Config,
    cancel: CancellationToken,
) -> Result<()> {
    let admin = GatedClient::new(
        connect(config)?,
        config.rate_gate(None)?,
        config.retry_policy(),
        cancel,
    );
    let account = admin.current_account().await?;
    println!(
        "{} governing account {} ({}, {})",
        "▶".cyan(),
        account.id,
        account.login,
        account.name
    );

    let fixtures = &config.fixtures;
    match cmd.action {
        FixturesAction::Provision { tenants, folders } => {
            let role: Role = config.run.search_role.parse()?;
            let plan = Plan {
                tenants: tenants.unwrap_or(fixtures.tenant_count),
                folders: folders.unwrap_or(fixtures.folders_per_tenant),
                role,
            };
            let ids = provision(&admin, fixtures, &plan).await?;
            write_ids(&fixtures.ids_file, &ids)?;
            println!(
                "{} {} account id(s) written to {}",
                "✓".green(),
                ids.len(),
                fixtures.ids_file.display()
            );
        }
        FixturesAction::Delete { yes } => {
            let ids = read_ids(&fixtures.ids_file)?;
            if !yes {
                let confirmed = Confirm::new()
                    .with_prompt(format!("Delete {} account(s) and their content?", ids.len()))
                    .default(false)
                    .interact()
                    .context("Failed to read confirmation")?;
                if !confirmed {
                    println!("{}", "Cancelled.".yellow());
                    return Ok(());
                }
            }
            let outcome = delete(&admin, &account, fixtures, &ids).await?;
            println!(
                "{} deleted {} account(s) and {} folder(s)",
                "✓".green(),
                outcome.accounts,
                outcome.folders
            );
            if outcome.failures > 0 {
                bail!("{} deletion(s) failed", outcome.failures);
            }
        }
        FixturesAction::Discover => {
            let found = discover(&admin, &fixtures.account_prefix).await?;
            if let Some(search) = &found.search {
                println!("  search account: {}", search.cyan());
            }
            let ids = found.ids();
            write_ids(&fixtures.ids_file, &ids)?;
            println!(
                "{} found {} account(s), written to {}",
                "✓".green(),
                ids.len(),
                fixtures.ids_file.display()
            );
        }
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Ids File
// ─────────────────────────────────────────────────────────────────────────────

pub fn write_ids(path: &Path, ids: &[String]) -> ReshelfResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string(ids)?)?;
    Ok(())
}

pub fn read_ids(path: &Path) -> ReshelfResult<Vec<String>> {
    if !path.exists() {
        return Err(ReshelfError::IdsFile(format!("{} does not exist", path.display())));
    }
    let content = std::fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|e| ReshelfError::IdsFile(format!("{}: {}", path.display(), e)))
}

// ─────────────────────────────────────────────────────────────────────────────
// Provision
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub tenants: usize,
    pub folders: usize,
    pub role: Role,
}

/// Create the tenant accounts and the search account, then give each tenant
/// `plan.folders` root folders granted to the search account.
///
/// Returns every created account id with the search account last.
pub async fn provision<C>(
    admin: &GatedClient<C>,
    fixtures: &FixturesConfig,
    plan: &Plan,
) -> Result<Vec<String>>
where
    C: ResourceClient + AccountAdmin,
{
    let mut creates = FanOut::new();
    for n in 0..plan.tenants {
        let admin = admin.clone();
        let name = format!("{}{}", fixtures.account_prefix, n);
        creates.spawn(name.clone(), async move { admin.create_account(&name).await });
    }

    let mut tenants: Vec<Account> = Vec::with_capacity(plan.tenants);
    for unit in creates.join_all().await {
        let account = unit
            .result
            .with_context(|| format!("Failed to create account {}", unit.label))?;
        info!(account_id = %account.id, name = %account.name, "created account");
        tenants.push(account);
    }
    // Completion order is arbitrary; keep the file in name order
    tenants.sort_by_key(|a| account_number(&a.name, &fixtures.account_prefix));
    println!("  created {} tenant account(s)", tenants.len());

    let search = admin
        .create_account(&format!("{}SEARCH", fixtures.account_prefix))
        .await
        .context("Failed to create search account")?;
    let search_id = TenantId::new(search.id.as_str());
    println!("  created search account {}", search.id.cyan());

    let total = tenants.len();
    for (i, tenant) in tenants.iter().enumerate() {
        let client = admin.for_tenant(&TenantId::new(tenant.id.as_str()));
        let mut units = FanOut::new();
        for j in 1..=plan.folders {
            let client = client.clone();
            let search = search_id.clone();
            let name = format!("{}{}", fixtures.folder_prefix, j);
            let role = plan.role;
            units.spawn(name.clone(), async move {
                let folder = match client.create_folder(&name, ROOT_NODE_ID).await {
                    Ok(folder) => folder,
                    Err(Error::Conflict { existing }) => existing,
                    Err(e) => return Err(e),
                };
                match client.add_grant(&folder.id, search.as_str(), role).await {
                    Ok(_) | Err(Error::AlreadyGrantee { .. }) => Ok(()),
                    Err(e) => Err(e),
                }
            });
        }

        let mut failed = 0;
        for unit in units.join_all().await {
            if let Err(e) = unit.result {
                warn!(tenant = %tenant.id, folder = %unit.label, error = %e, "folder setup failed");
                failed += 1;
            }
        }
        if failed > 0 {
            bail!("{} folder(s) failed for tenant {}", failed, tenant.id);
        }
        println!("  tenant {}/{}: {} folder(s) ready", i + 1, total, plan.folders);
    }

    let mut ids: Vec<String> = tenants.into_iter().map(|a| a.id).collect();
    ids.push(search.id);
    Ok(ids)
}

fn account_number(name: &str, prefix: &str) -> usize {
    name.strip_prefix(prefix)
        .and_then(|n| n.parse().ok())
        .unwrap_or(usize::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Delete
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    pub accounts: usize,
    pub folders: usize,
    pub failures: usize,
}

/// Move each account's content to the governing account, force-delete the
/// account, then remove the moved content from the governing account's root.
pub async fn delete<C>(
    admin: &GatedClient<C>,
    governing: &Account,
    fixtures: &FixturesConfig,
    ids: &[String],
) -> Result<DeleteOutcome>
where
    C: ResourceClient + AccountAdmin,
{
    let mut outcome = DeleteOutcome::default();
    let total = ids.len();

    let mut units = FanOut::new();
    for id in ids {
        let admin = admin.clone();
        let id = id.clone();
        let to = governing.id.clone();
        units.spawn(id.clone(), async move {
            admin.transfer_content(&id, &to).await?;
            admin.delete_account(&id, true).await
        });
    }
    for unit in units.join_all().await {
        match unit.result {
            Ok(()) => {
                outcome.accounts += 1;
                println!("  deleted account {} ({}/{})", unit.label, outcome.accounts, total);
            }
            Err(e) => {
                warn!(account_id = %unit.label, error = %e, "account deletion failed");
                outcome.failures += 1;
            }
        }
    }

    let leftovers: Vec<_> = admin
        .list_all_children(ROOT_NODE_ID, 1000)
        .await?
        .into_iter()
        .filter(|n| n.is_folder() && n.name.contains(&fixtures.account_prefix))
        .collect();

    let mut units = FanOut::new();
    for folder in leftovers {
        let admin = admin.clone();
        units.spawn(folder.name.clone(), async move {
            admin.delete_folder(&folder.id, true).await
        });
    }
    for unit in units.join_all().await {
        match unit.result {
            Ok(()) => {
                outcome.folders += 1;
                info!(name = %unit.label, "deleted folder");
            }
            Err(e) => {
                warn!(name = %unit.label, error = %e, "folder deletion failed");
                outcome.failures += 1;
            }
        }
    }

    Ok(outcome)
}

// ─────────────────────────────────────────────────────────────────────────────
// Discover
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct Discovered {
    pub tenants: Vec<String>,
    pub search: Option<String>,
}

impl Discovered {
    /// Ids in ids-file order, search account last
    pub fn ids(&self) -> Vec<String> {
        self.tenants.iter().cloned().chain(self.search.clone()).collect()
    }
}

/// Find platform-only accounts whose name starts with `prefix`
pub async fn discover<C>(admin: &GatedClient<C>, prefix: &str) -> Result<Discovered>
where
    C: ResourceClient + AccountAdmin,
{
    let accounts = admin.list_accounts(DISCOVER_LIMIT).await?;
    let search_name = format!("{}SEARCH", prefix);
    let mut found = Discovered::default();

    for account in accounts {
        if !account.name.starts_with(prefix) || !account.login.starts_with(APP_USER_LOGIN_PREFIX) {
            continue;
        }
        if account.name == search_name {
            found.search = Some(account.id);
        } else {
            found.tenants.push(account.id);
        }
    }

    Ok(found)
}
