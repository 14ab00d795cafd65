//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Per-VPN failover saga with per-step retry budgets."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Role transition for one VPN.
//!
//! Steps run strictly in order: demote the active side, wait for the
//! replication queue to drain, confirm the standby side is standby, promote
//! it, then validate both sides. Demote and drain are skipped when the task
//! has no active side. A failed step ends the saga; nothing already applied
//! is undone, and the error records how far the transition got.
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use kits_broker::{BrokerApi, BrokerError};
use kits_common::FailoverPolicies;
use kits_metrics::DrMetrics;
use kits_model::{BasicAuth, Endpoint, FailoverTask, MateResult, ReplicationRole};
use kits_resilience::{retry, RetryError, RetryOutcome, RetryPolicy};
use serde::Serialize;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// One step of the role transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStep {
    /// Set the active side of the VPN to standby.
    DemoteActive,
    /// Wait until the replication data queue stops transmitting.
    DrainWait,
    /// Confirm the standby side still holds the standby role.
    VerifyStandbyIsStandby,
    /// Set the standby side of the VPN to active.
    PromoteStandby,
    /// Confirm the old active is standby and the new active is active.
    ValidateFinal,
}

impl SagaStep {
    /// Label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            SagaStep::DemoteActive => "demote_active",
            SagaStep::DrainWait => "drain_wait",
            SagaStep::VerifyStandbyIsStandby => "verify_standby_is_standby",
            SagaStep::PromoteStandby => "promote_standby",
            SagaStep::ValidateFinal => "validate_final",
        }
    }
}

impl fmt::Display for SagaStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How far a failed saga got before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialState {
    /// No role was changed.
    Untouched,
    /// The old active side was demoted and nothing was promoted.
    NeitherSideActive,
    /// The standby side was promoted but the final state was not confirmed.
    Unvalidated,
}

impl PartialState {
    /// Label used in logs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            PartialState::Untouched => "untouched",
            PartialState::NeitherSideActive => "neither_side_active",
            PartialState::Unvalidated => "unvalidated",
        }
    }
}

impl fmt::Display for PartialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A completed step and the attempts it took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// Step executed.
    pub step: SagaStep,
    /// Attempts consumed, including the successful one.
    pub attempts: u32,
}

/// Summary of a successful failover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SagaReport {
    /// Kit the VPN belongs to.
    pub kit: String,
    /// VPN that was failed over.
    pub vpn: String,
    /// Whether the demote and drain steps were skipped.
    pub degraded: bool,
    /// Broker now holding the VPN active.
    pub promoted: MateResult,
    /// Executed steps in order.
    pub steps: Vec<StepRecord>,
}

impl SagaReport {
    /// Steps in execution order, without attempt counts.
    pub fn step_names(&self) -> Vec<SagaStep> {
        self.steps.iter().map(|record| record.step).collect()
    }
}

/// Terminal failure of a saga.
#[derive(Debug, Error)]
#[error("failover of vpn {vpn} (kit {kit}) failed at {step} on {target} after {attempts} attempt(s), state {partial}: {source}")]
pub struct SagaError {
    /// Kit the VPN belongs to.
    pub kit: String,
    /// VPN being failed over.
    pub vpn: String,
    /// Step that failed.
    pub step: SagaStep,
    /// Broker the failing step talked to.
    pub target: MateResult,
    /// Attempts consumed by the failing step.
    pub attempts: u32,
    /// Role state left behind.
    pub partial: PartialState,
    /// Steps that completed before the failure.
    pub completed: Vec<StepRecord>,
    /// Final step error.
    #[source]
    pub source: RetryError<BrokerError>,
}

/// Executes the role transition of a [`FailoverTask`].
#[derive(Clone)]
pub struct FailoverSaga {
    broker: Arc<dyn BrokerApi>,
    policies: FailoverPolicies,
    metrics: Option<DrMetrics>,
}

impl fmt::Debug for FailoverSaga {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailoverSaga")
            .field("policies", &self.policies)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

impl FailoverSaga {
    /// Saga driving `broker` with the given step policies.
    pub fn new(broker: Arc<dyn BrokerApi>, policies: FailoverPolicies) -> Self {
        Self {
            broker,
            policies,
            metrics: None,
        }
    }

    /// Record step and failover outcomes in `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Step policies in use.
    pub fn policies(&self) -> &FailoverPolicies {
        &self.policies
    }

    /// Run every step of `task` once, in order.
    pub async fn run(&self, task: &FailoverTask, auth: &BasicAuth) -> Result<SagaReport, SagaError> {
        let mode = if task.is_degraded() { "degraded" } else { "normal" };
        info!(
            kit = task.kit(),
            vpn = %task.vpn,
            mode,
            standby = %task.standby_side,
            "failover saga started"
        );
        let result = self.execute(task, auth).await;
        if let Some(metrics) = &self.metrics {
            let outcome = if result.is_ok() { "succeeded" } else { "failed" };
            metrics.record_failover(task.kit(), mode, outcome);
        }
        match &result {
            Ok(report) => info!(
                kit = task.kit(),
                vpn = %task.vpn,
                mode,
                promoted = %report.promoted,
                "failover saga completed"
            ),
            Err(err) => error!(
                kit = task.kit(),
                vpn = %task.vpn,
                mode,
                step = err.step.as_str(),
                partial = err.partial.as_str(),
                target = %err.target,
                error = %err,
                "failover saga failed"
            ),
        }
        result
    }

    async fn execute(&self, task: &FailoverTask, auth: &BasicAuth) -> Result<SagaReport, SagaError> {
        let vpn = task.vpn.as_str();
        let standby = &task.standby_side;
        let mut completed = Vec::new();
        let mut partial = PartialState::Untouched;

        match &task.active_side {
            Some(active) => {
                self.track(
                    task,
                    SagaStep::DemoteActive,
                    active,
                    partial,
                    &mut completed,
                    self.set_role(
                        &self.policies.demote,
                        SagaStep::DemoteActive,
                        active,
                        vpn,
                        ReplicationRole::Standby,
                        auth,
                    ),
                )
                .await?;
                partial = PartialState::NeitherSideActive;

                self.track(
                    task,
                    SagaStep::DrainWait,
                    active,
                    partial,
                    &mut completed,
                    self.drain(active, vpn, auth),
                )
                .await?;
            }
            None => warn!(
                kit = task.kit(),
                vpn,
                standby = %standby,
                "no reachable active side; promoting without demote or drain confirmation"
            ),
        }

        self.track(
            task,
            SagaStep::VerifyStandbyIsStandby,
            standby,
            partial,
            &mut completed,
            self.expect_role(
                &self.policies.verify_standby,
                SagaStep::VerifyStandbyIsStandby,
                standby,
                vpn,
                ReplicationRole::Standby,
                auth,
            ),
        )
        .await?;

        self.track(
            task,
            SagaStep::PromoteStandby,
            standby,
            partial,
            &mut completed,
            self.set_role(
                &self.policies.promote,
                SagaStep::PromoteStandby,
                standby,
                vpn,
                ReplicationRole::Active,
                auth,
            ),
        )
        .await?;
        partial = PartialState::Unvalidated;

        // Old active first, so a failure names the side that did not settle.
        let validate_target = task.active_side.as_ref().unwrap_or(standby);
        self.track(
            task,
            SagaStep::ValidateFinal,
            validate_target,
            partial,
            &mut completed,
            self.validate(task.active_side.as_ref(), standby, vpn, auth),
        )
        .await?;

        Ok(SagaReport {
            kit: task.kit().to_owned(),
            vpn: task.vpn.clone(),
            degraded: task.is_degraded(),
            promoted: standby.clone(),
            steps: completed,
        })
    }

    async fn track<Fut>(
        &self,
        task: &FailoverTask,
        step: SagaStep,
        target: &MateResult,
        partial: PartialState,
        completed: &mut Vec<StepRecord>,
        operation: Fut,
    ) -> Result<(), SagaError>
    where
        Fut: Future<Output = Result<RetryOutcome<()>, RetryError<BrokerError>>>,
    {
        let started = Instant::now();
        let result = operation.await;
        let elapsed = started.elapsed().as_secs_f64();
        match result {
            Ok(outcome) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_saga_step(step.as_str(), "succeeded", elapsed);
                }
                info!(
                    kit = task.kit(),
                    vpn = %task.vpn,
                    step = step.as_str(),
                    dc = %target.dc,
                    mate = %target.mate,
                    host = %target.host,
                    attempts = outcome.attempts,
                    "saga step succeeded"
                );
                completed.push(StepRecord {
                    step,
                    attempts: outcome.attempts,
                });
                Ok(())
            }
            Err(source) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_saga_step(step.as_str(), "failed", elapsed);
                }
                Err(SagaError {
                    kit: task.kit().to_owned(),
                    vpn: task.vpn.clone(),
                    step,
                    target: target.clone(),
                    attempts: source.attempts(),
                    partial,
                    completed: completed.clone(),
                    source,
                })
            }
        }
    }

    async fn set_role(
        &self,
        policy: &RetryPolicy,
        step: SagaStep,
        target: &MateResult,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<RetryOutcome<()>, RetryError<BrokerError>> {
        let broker = &self.broker;
        let endpoint = &target.endpoint();
        retry(policy, step.as_str(), move |_| async move {
            broker.set_role(endpoint, vpn, role, auth).await
        })
        .await
    }

    async fn drain(
        &self,
        target: &MateResult,
        vpn: &str,
        auth: &BasicAuth,
    ) -> Result<RetryOutcome<()>, RetryError<BrokerError>> {
        let broker = &self.broker;
        let endpoint = &target.endpoint();
        retry(&self.policies.drain, SagaStep::DrainWait.as_str(), move |_| async move {
            let backlog = broker.replication_backlog(endpoint, vpn, auth).await?;
            if backlog.is_empty() {
                Ok(())
            } else {
                Err(BrokerError::ReplicationInProgress {
                    vpn: vpn.to_owned(),
                    host: endpoint.host.clone(),
                    queues: backlog.len(),
                })
            }
        })
        .await
    }

    async fn expect_role(
        &self,
        policy: &RetryPolicy,
        step: SagaStep,
        target: &MateResult,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<RetryOutcome<()>, RetryError<BrokerError>> {
        let broker = &self.broker;
        let endpoint = &target.endpoint();
        retry(policy, step.as_str(), move |_| async move {
            check_role(broker.as_ref(), endpoint, vpn, role, auth).await
        })
        .await
    }

    async fn validate(
        &self,
        old_active: Option<&MateResult>,
        new_active: &MateResult,
        vpn: &str,
        auth: &BasicAuth,
    ) -> Result<RetryOutcome<()>, RetryError<BrokerError>> {
        let broker = &self.broker;
        let old_endpoint = &old_active.map(MateResult::endpoint);
        let new_endpoint = &new_active.endpoint();
        retry(
            &self.policies.validate,
            SagaStep::ValidateFinal.as_str(),
            move |_| async move {
                if let Some(old) = old_endpoint {
                    check_role(broker.as_ref(), old, vpn, ReplicationRole::Standby, auth).await?;
                }
                check_role(broker.as_ref(), new_endpoint, vpn, ReplicationRole::Active, auth).await
            },
        )
        .await
    }
}

async fn check_role(
    broker: &dyn BrokerApi,
    endpoint: &Endpoint,
    vpn: &str,
    role: ReplicationRole,
    auth: &BasicAuth,
) -> Result<(), BrokerError> {
    if broker.has_role(endpoint, vpn, role, auth).await? {
        Ok(())
    } else {
        Err(BrokerError::RoleMismatch {
            vpn: vpn.to_owned(),
            role,
            host: endpoint.host.clone(),
        })
    }
}
