//! Terminal progress display for workflow runs.

use std::sync::Mutex;

use colored::Colorize;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use reshelf_core::{
    Account, ProgressObserver, ProgressSnapshot, TenantId, TenantReport, TenantStatus, Workflow,
};

/// One progress bar per tenant, replaced by a status line when the tenant finishes
pub struct BarObserver {
    bar: Mutex<Option<ProgressBar>>,
    hidden: bool,
}

impl BarObserver {
    pub fn new() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: false,
        }
    }

    /// Observer that draws nothing (for `--json` output)
    pub fn hidden() -> Self {
        Self {
            bar: Mutex::new(None),
            hidden: true,
        }
    }

    fn with_bar(&self, f: impl FnOnce(&mut Option<ProgressBar>)) {
        let mut guard = self.bar.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut guard);
    }

    fn style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{prefix:.cyan} [{bar:40.cyan/blue}] {pos}/{len} folders {msg}",
        )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ")
    }
}

impl Default for BarObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for BarObserver {
    fn run_started(&self, workflow: Workflow, account: &Account, tenant_count: usize) {
        if !self.hidden {
            println!("{}", run_line(workflow, account, tenant_count));
        }
    }

    fn tenant_started(&self, tenant: &TenantId, s: ProgressSnapshot) {
        let hidden = self.hidden;
        self.with_bar(|slot| {
            let bar = if hidden {
                ProgressBar::with_draw_target(Some(0), ProgressDrawTarget::hidden())
            } else {
                ProgressBar::new(0)
            };
            bar.set_style(Self::style());
            bar.set_prefix(format!("tenant {} ({}/{})", tenant, s.tenant_index, s.tenant_count));
            *slot = Some(bar);
        });
    }

    fn units_planned(&self, _tenant: &TenantId, s: ProgressSnapshot) {
        self.with_bar(|slot| {
            if let Some(bar) = slot {
                bar.set_length(s.units_total as u64);
            }
        });
    }

    fn unit_done(&self, _tenant: &TenantId, s: ProgressSnapshot) {
        self.with_bar(|slot| {
            if let Some(bar) = slot {
                bar.set_position(s.units_done as u64);
            }
        });
    }

    fn tenant_finished(&self, report: &TenantReport) {
        let hidden = self.hidden;
        self.with_bar(|slot| {
            if let Some(bar) = slot.take() {
                bar.finish_and_clear();
            }
            if !hidden {
                println!("{}", status_line(report));
            }
        });
    }
}

/// Header naming the workflow and the governing account
pub fn run_line(workflow: Workflow, account: &Account, tenant_count: usize) -> String {
    format!(
        "{} {} as {} ({}), {} tenant(s)",
        "▶".cyan(),
        workflow.to_string().bold(),
        account.login,
        account.id,
        tenant_count
    )
}

/// One colored line describing a finished tenant
pub fn status_line(report: &TenantReport) -> String {
    let tenant = report.tenant.as_str();
    match &report.status {
        TenantStatus::Skipped => {
            format!("  {} {} (search tenant, skipped)", "○".yellow(), tenant)
        }
        TenantStatus::Cancelled => format!("  {} {} cancelled", "○".yellow(), tenant),
        TenantStatus::Failed { reason } | TenantStatus::Fatal { reason } => {
            format!("  {} {} {}", "✗".red(), tenant, reason.red())
        }
        TenantStatus::Completed if report.is_clean() => format!(
            "  {} {} {}/{} folders",
            "✓".green(),
            tenant,
            report.units_ok,
            report.units_total
        ),
        TenantStatus::Completed => format!(
            "  {} {} {}/{} folders, {} error(s), {} finding(s)",
            "!".yellow(),
            tenant,
            report.units_ok,
            report.units_total,
            report.unit_errors.len(),
            report.findings.len()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_line_counts() {
        colored::control::set_override(false);

        let mut report = TenantReport::new(TenantId::from("42"));
        report.units_total = 3;
        report.units_ok = 3;
        assert_eq!(status_line(&report), "  ✓ 42 3/3 folders");

        report.units_ok = 2;
        report.unit_errors.push(reshelf_core::UnitError {
            node_id: "7".into(),
            node_name: "A".into(),
            message: "remote error 403".into(),
        });
        assert!(status_line(&report).contains("1 error(s)"));

        let failed = TenantReport::new(TenantId::from("43")).with_status(TenantStatus::Failed {
            reason: "boom".into(),
        });
        assert!(status_line(&failed).contains("boom"));
    }

    #[test]
    fn test_run_line_names_account() {
        colored::control::set_override(false);

        let account = Account {
            id: "1".into(),
            login: "service@example.com".into(),
            name: "Service".into(),
        };
        assert_eq!(
            run_line(Workflow::Verify, &account, 5),
            "▶ verify as service@example.com (1), 5 tenant(s)"
        );
    }

    #[test]
    fn test_hidden_observer_tracks_tenants() {
        let observer = BarObserver::hidden();
        let tenant = TenantId::from("1");
        let snapshot = ProgressSnapshot {
            tenant_index: 1,
            tenant_count: 1,
            units_done: 0,
            units_total: 2,
        };
        observer.tenant_started(&tenant, snapshot);
        observer.units_planned(&tenant, snapshot);
        observer.unit_done(&tenant, ProgressSnapshot { units_done: 1, ..snapshot });
        assert!(observer.bar.lock().unwrap().is_some());

        observer.tenant_finished(&TenantReport::new(tenant));
        assert!(observer.bar.lock().unwrap().is_none());
    }
}
