//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Debounced DNS cutover detection per VPN."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! DNS cutover detection.
//!
//! Each watched name is the VPN name followed by a configured suffix. A name
//! has changed when it resolves to something other than its baseline; the
//! first successful poll only establishes the baselines. The detector fires
//! once enough names have changed, runs the saga, and ends.
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use kits_common::{BaselinePolicy, DnsConfig};
use kits_dns::{DnsError, DnsResolver};
use kits_metrics::DrMetrics;
use kits_model::{BasicAuth, FailoverTask};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use crate::saga::{FailoverSaga, SagaError, SagaReport};

/// Result of comparing one poll against the baselines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First successful poll; baselines recorded.
    Established,
    /// Fewer names than required changed.
    Steady {
        /// Names differing from their baseline.
        changed: usize,
    },
    /// Enough names changed to fire.
    Triggered {
        /// Names differing from their baseline.
        changed: usize,
    },
}

/// Per-name baselines owned by one detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsWatchState {
    vpn: String,
    names: Vec<String>,
    baselines: Vec<Option<IpAddr>>,
    required_changes: usize,
    policy: BaselinePolicy,
}

impl DnsWatchState {
    /// Watch `vpn` followed by each suffix.
    ///
    /// `required_changes` is clamped to `1..=suffixes.len()`.
    pub fn new(
        vpn: impl Into<String>,
        suffixes: &[String],
        required_changes: usize,
        policy: BaselinePolicy,
    ) -> Self {
        let vpn = vpn.into();
        let names: Vec<String> = suffixes
            .iter()
            .map(|suffix| format!("{vpn}{suffix}"))
            .collect();
        let required_changes = required_changes.clamp(1, names.len().max(1));
        Self {
            baselines: vec![None; names.len()],
            vpn,
            names,
            required_changes,
            policy,
        }
    }

    /// State configured by the `[dns]` section.
    pub fn from_config(vpn: impl Into<String>, config: &DnsConfig) -> Self {
        Self::new(
            vpn,
            &config.suffixes,
            config.required_changes(),
            config.baseline_policy,
        )
    }

    /// VPN being watched.
    pub fn vpn(&self) -> &str {
        &self.vpn
    }

    /// Fully-qualified watched names, primary first.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Current baseline per watched name.
    pub fn baselines(&self) -> &[Option<IpAddr>] {
        &self.baselines
    }

    /// Changed names needed to fire.
    pub fn required_changes(&self) -> usize {
        self.required_changes
    }

    /// Compare `current` (one address per watched name) against the baselines.
    ///
    /// Baselines are left as they were when the observation triggers.
    pub fn observe(&mut self, current: &[IpAddr]) -> Observation {
        debug_assert_eq!(current.len(), self.names.len());
        if self.baselines.iter().all(Option::is_none) {
            self.baselines = current.iter().copied().map(Some).collect();
            return Observation::Established;
        }

        let changed_flags: Vec<bool> = self
            .baselines
            .iter()
            .zip(current)
            .map(|(baseline, now)| matches!(baseline, Some(previous) if previous != now))
            .collect();
        let changed = changed_flags.iter().filter(|flag| **flag).count();
        if changed >= self.required_changes {
            return Observation::Triggered { changed };
        }

        for ((baseline, now), changed) in self.baselines.iter_mut().zip(current).zip(changed_flags) {
            match self.policy {
                BaselinePolicy::Rolling => *baseline = Some(*now),
                BaselinePolicy::Latched if !changed => *baseline = Some(*now),
                BaselinePolicy::Latched => {}
            }
        }
        Observation::Steady { changed }
    }
}

/// How a detector ended without error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    /// A cutover was detected and the saga succeeded.
    FailedOver(SagaReport),
    /// The stop signal fired before any cutover.
    Stopped,
}

/// Terminal detector failure.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// The saga triggered by a cutover failed.
    #[error(transparent)]
    Failover(#[from] SagaError),
}

/// Polls the watched names of one VPN and runs the saga on cutover.
#[derive(Clone)]
pub struct DnsChangeDetector {
    resolver: Arc<dyn DnsResolver>,
    saga: Arc<FailoverSaga>,
    config: DnsConfig,
    metrics: Option<DrMetrics>,
}

impl fmt::Debug for DnsChangeDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DnsChangeDetector")
            .field("config", &self.config)
            .field("saga", &self.saga)
            .finish()
    }
}

impl DnsChangeDetector {
    /// Detector resolving through `resolver` and failing over with `saga`.
    pub fn new(resolver: Arc<dyn DnsResolver>, saga: Arc<FailoverSaga>, config: DnsConfig) -> Self {
        Self {
            resolver,
            saga,
            config,
            metrics: None,
        }
    }

    /// Count observed name changes in `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Watch settings in use.
    pub fn config(&self) -> &DnsConfig {
        &self.config
    }

    /// Poll until a cutover fires the saga or `stop` becomes true.
    ///
    /// A running saga is not interrupted by the stop signal.
    pub async fn run(
        &self,
        task: FailoverTask,
        auth: BasicAuth,
        mut stop: watch::Receiver<bool>,
    ) -> Result<WatchOutcome, DetectorError> {
        let mut state = DnsWatchState::from_config(task.vpn.clone(), &self.config);
        let kit = task.kit().to_owned();
        info!(
            kit = %kit,
            vpn = %task.vpn,
            names = ?state.names(),
            required = state.required_changes(),
            interval_secs = self.config.poll_interval.as_secs(),
            "dns watch started"
        );

        loop {
            if *stop.borrow() {
                info!(kit = %kit, vpn = %task.vpn, "dns watch stopped");
                return Ok(WatchOutcome::Stopped);
            }

            match self.resolve_all(state.names()).await {
                Ok(current) => match state.observe(&current) {
                    Observation::Established => info!(
                        kit = %kit,
                        vpn = %task.vpn,
                        addresses = ?current,
                        "dns baseline established"
                    ),
                    Observation::Steady { changed: 0 } => {
                        debug!(kit = %kit, vpn = %task.vpn, "dns unchanged")
                    }
                    Observation::Steady { changed } => {
                        self.record_changes(&kit, changed);
                        info!(
                            kit = %kit,
                            vpn = %task.vpn,
                            changed,
                            required = state.required_changes(),
                            baselines = ?state.baselines(),
                            current = ?current,
                            "partial dns change; waiting for remaining names"
                        );
                    }
                    Observation::Triggered { changed } => {
                        self.record_changes(&kit, changed);
                        warn!(
                            kit = %kit,
                            vpn = %task.vpn,
                            changed,
                            baselines = ?state.baselines(),
                            current = ?current,
                            "dns cutover detected; starting failover"
                        );
                        let report = self.saga.run(&task, &auth).await?;
                        return Ok(WatchOutcome::FailedOver(report));
                    }
                },
                Err(err) => warn!(
                    kit = %kit,
                    vpn = %task.vpn,
                    error = %err,
                    "dns resolution failed; baselines unchanged"
                ),
            }

            if pause(&mut stop, self.config.poll_interval).await {
                info!(kit = %kit, vpn = %task.vpn, "dns watch stopped");
                return Ok(WatchOutcome::Stopped);
            }
        }
    }

    async fn resolve_all(&self, names: &[String]) -> Result<Vec<IpAddr>, DnsError> {
        let bound = self.config.resolve_timeout;
        try_join_all(names.iter().map(|name| async move {
            match timeout(bound, self.resolver.resolve(name)).await {
                Ok(result) => result,
                Err(_) => Err(DnsError::Timeout {
                    name: name.clone(),
                    after: bound,
                }),
            }
        }))
        .await
    }

    fn record_changes(&self, kit: &str, changed: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.record_dns_changes(kit, changed);
        }
    }
}

/// Sleep for `interval`. Returns true when the stop signal fires first.
async fn pause(stop: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    let deadline = sleep(interval);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => return false,
            changed = stop.changed() => match changed {
                Ok(()) if !*stop.borrow() => continue,
                _ => return true,
            },
        }
    }
}
