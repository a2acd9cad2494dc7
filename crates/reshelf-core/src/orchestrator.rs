//! Sequential tenant driver.
//!
//! Tenants are processed one at a time in configured order. Each run works
//! under a child of the caller's cancellation token, so a verify halt stops
//! in-flight calls of the run without cancelling the caller.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use crate::client::ResourceClient;
use crate::error::Result;
use crate::gated::GatedClient;
use crate::progress::{ProgressObserver, RunProgress, TracingObserver};
use crate::rate_gate::RateGate;
use crate::report::{RunAbort, RunReport, TenantReport, TenantStatus, Workflow};
use crate::retry::RetryPolicy;
use crate::types::Settings;
use crate::workflow::{TenantContext, TenantOutcome, reorganize_tenant, verify_tenant};

pub struct Orchestrator<C> {
    client: C,
    settings: Arc<Settings>,
    gate: RateGate,
    retry: RetryPolicy,
    cancel: CancellationToken,
    observer: Arc<dyn ProgressObserver>,
}

impl<C: ResourceClient> Orchestrator<C> {
    /// `client` must act as the governing account
    pub fn new(
        client: C,
        settings: Settings,
        gate: RateGate,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            settings: Arc::new(settings),
            gate,
            retry,
            cancel,
            observer: Arc::new(TracingObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    fn gated(&self, cancel: CancellationToken) -> GatedClient<C> {
        GatedClient::new(
            self.client.clone(),
            self.gate.clone(),
            self.retry.clone(),
            cancel,
        )
    }

    /// Run `workflow` over every configured tenant.
    ///
    /// Fails only if the governing account cannot be read; everything after
    /// that is recorded in the report.
    pub async fn run(&self, workflow: Workflow) -> Result<RunReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("run", %run_id, %workflow);
        self.run_tenants(run_id, workflow).instrument(span).await
    }

    async fn run_tenants(&self, run_id: Uuid, workflow: Workflow) -> Result<RunReport> {
        let started_at = Utc::now();
        let start = Instant::now();
        let run_token = self.cancel.child_token();
        let client = self.gated(run_token.clone());

        let account = client.current_account().await?;
        info!(
            workflow = %workflow,
            account_id = %account.id,
            login = %account.login,
            tenants = self.settings.tenants.len(),
            "run started"
        );
        self.observer
            .run_started(workflow, &account, self.settings.tenants.len());

        let progress = RunProgress::new(self.settings.tenants.len(), self.observer.clone());
        let mut tenants = Vec::with_capacity(self.settings.tenants.len());
        let mut aborted = None;

        for (index, tenant) in self.settings.tenants.iter().enumerate() {
            if run_token.is_cancelled() {
                aborted = Some(RunAbort::Cancelled);
                break;
            }
            if self.settings.is_search_tenant(tenant) {
                info!(tenant = %tenant, "skipping search tenant");
                let report = TenantReport::skipped(tenant.clone());
                progress.finish_tenant(&report);
                tenants.push(report);
                continue;
            }

            progress.start_tenant(index + 1, tenant);
            let ctx = TenantContext::new(
                client.for_tenant(tenant),
                tenant.clone(),
                self.settings.clone(),
                progress.clone(),
            );

            let (report, abort) = match workflow {
                Workflow::Reorganize => {
                    let report = reorganize_tenant(&ctx).await;
                    let abort = (report.status == TenantStatus::Cancelled)
                        .then_some(RunAbort::Cancelled);
                    (report, abort)
                }
                Workflow::Verify => match verify_tenant(&ctx).await {
                    TenantOutcome::Continue(report) => (report, None),
                    TenantOutcome::Halt(report, abort) => (report, Some(abort)),
                },
            };

            progress.finish_tenant(&report);
            tenants.push(report);

            if let Some(abort) = abort {
                warn!(tenant = %tenant, "run halted: {}", abort);
                run_token.cancel();
                aborted = Some(abort);
                break;
            }
        }

        let report = RunReport {
            run_id,
            workflow,
            account,
            started_at,
            elapsed: start.elapsed(),
            tenants,
            aborted,
        };

        info!(
            workflow = %workflow,
            tenants = report.tenants.len(),
            units = report.units_total(),
            errors = report.error_count(),
            findings = report.finding_count(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }
}
