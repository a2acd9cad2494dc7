//! Reorganize and verify commands.

use std::sync::Arc;

use anyhow::{Result, bail};
use colored::Colorize;
use reshelf_core::{Orchestrator, ProgressObserver, RunAbort, RunReport, Workflow};
use tokio_util::sync::CancellationToken;

use super::connect;
use crate::cli::RunArgs;
use crate::config::Config;
use crate::progress::BarObserver;

pub async fn execute(
    workflow: Workflow,
    args: RunArgs,
    config: &Config,
    cancel: CancellationToken,
) -> Result<()> {
    let settings = config.settings(&args.tenants)?;
    let observer: Arc<dyn ProgressObserver> = if args.json {
        Arc::new(BarObserver::hidden())
    } else {
        Arc::new(BarObserver::new())
    };

    let orchestrator = Orchestrator::new(
        connect(config)?,
        settings,
        config.rate_gate(args.rate_limit)?,
        config.retry_policy(),
        cancel,
    )
    .with_observer(observer);

    let report = orchestrator.run(workflow).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if !report.is_success() {
        bail!("{} finished with problems", workflow);
    }
    Ok(())
}

pub fn print_summary(report: &RunReport) {
    println!();
    println!("{}", format!("{} summary", report.workflow).cyan().bold());
    println!("{}", "─".repeat(50));
    println!("  Tenants:  {}", report.tenants.len());
    println!("  Folders:  {}", report.units_total());
    println!("  Errors:   {}", report.error_count());
    if report.workflow == Workflow::Verify {
        println!(
            "  Findings: {} ({} grant mismatch(es))",
            report.finding_count(),
            report.mismatch_count()
        );
    }
    println!("  Elapsed:  {:.1}s", report.elapsed.as_secs_f64());

    for tenant in &report.tenants {
        for err in &tenant.unit_errors {
            println!(
                "  {} tenant {} folder {} ('{}'): {}",
                "✗".red(),
                tenant.tenant,
                err.node_id,
                err.node_name,
                err.message
            );
        }
        for finding in &tenant.findings {
            println!("  {} {}", "!".yellow(), finding);
        }
    }

    println!();
    match &report.aborted {
        Some(RunAbort::Cancelled) => println!("{}", "○ Run cancelled".yellow().bold()),
        Some(abort) => println!("{}", format!("✗ Run halted: {}", abort).red().bold()),
        None if report.is_success() => println!("{}", "✓ All tenants done".green().bold()),
        None => println!(
            "{}",
            format!("✗ Finished with {} error(s)", report.error_count() + report.finding_count())
                .red()
                .bold()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reshelf_core::client::memory::{MemoryService, Op};
    use reshelf_core::{RateGate, RetryPolicy, Role, ROOT_NODE_ID, Settings};
    use std::num::NonZeroU32;

    #[tokio::test(start_paused = true)]
    async fn test_reorganize_then_verify_is_clean() {
        let service = MemoryService::new();
        let search = service.seed_tenant("ST_APP_USER_SEARCH");
        let tenant = service.seed_tenant("ST_APP_USER_0");
        for name in ["A", "B", "C"] {
            let folder = service.seed_folder(&tenant, name, ROOT_NODE_ID);
            service.seed_grant(&folder.id, &search, Role::Editor);
        }
        let settings = Settings::new("HOUSE_LIST", search, vec![tenant]);
        let orchestrator = Orchestrator::new(
            service.admin_client(),
            settings,
            RateGate::per_second(NonZeroU32::new(16).unwrap()),
            RetryPolicy::default(),
            CancellationToken::new(),
        )
        .with_observer(Arc::new(BarObserver::hidden()));

        let reorganized = orchestrator.run(Workflow::Reorganize).await.unwrap();
        assert!(reorganized.is_success());
        assert_eq!(reorganized.units_total(), 3);

        let verified = orchestrator.run(Workflow::Verify).await.unwrap();
        assert!(verified.is_success());
        assert_eq!(verified.units_total(), 3);
        assert_eq!(verified.mismatch_count(), 0);
        assert_eq!(service.calls(Op::CurrentAccount), 2);
    }
}
