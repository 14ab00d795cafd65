//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Fleet-wide fan-out of kit controllers."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use kits_model::{BasicAuth, Kit, MateResult};
use kits_resilience::{retry, RetryError, RetryPolicy};
use kits_topology::{TopologyError, TopologyProvider};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::controller::{KitDrController, KitError, KitOutcome};

/// Fleet-level failures.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The topology could not be loaded.
    #[error("failed to load topology: {0}")]
    Topology(#[source] RetryError<TopologyError>),
    /// A kit failed and the run is fail-fast.
    #[error(transparent)]
    Kit(#[from] KitError),
    /// No kit has the requested name.
    #[error("kit {0} not found in topology")]
    KitNotFound(String),
}

/// A kit that failed in a run that is not fail-fast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KitFailure {
    /// Kit name.
    pub kit: String,
    /// Error message.
    pub error: String,
}

/// Summary of one fleet evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FleetReport {
    /// Per-kit outcomes in topology order.
    pub kits: Vec<KitOutcome>,
    /// Active mates of every successful kit, concatenated.
    pub active: Vec<MateResult>,
    /// Kits that failed, when failures do not abort the run.
    pub failures: Vec<KitFailure>,
}

impl FleetReport {
    /// Detectors registered across all kits.
    pub fn watched(&self) -> usize {
        self.kits.iter().map(|kit| kit.watched.len()).sum()
    }
}

/// Loads the topology and runs one controller per kit.
#[derive(Clone)]
pub struct FleetOrchestrator {
    topology: Arc<dyn TopologyProvider>,
    controller: Arc<KitDrController>,
    topology_retry: RetryPolicy,
    fail_fast: bool,
}

impl fmt::Debug for FleetOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FleetOrchestrator")
            .field("controller", &self.controller)
            .field("topology_retry", &self.topology_retry)
            .field("fail_fast", &self.fail_fast)
            .finish()
    }
}

impl FleetOrchestrator {
    /// Fail-fast orchestrator.
    pub fn new(
        topology: Arc<dyn TopologyProvider>,
        controller: Arc<KitDrController>,
        topology_retry: RetryPolicy,
    ) -> Self {
        Self {
            topology,
            controller,
            topology_retry,
            fail_fast: true,
        }
    }

    /// Choose between aborting on the first kit failure and collecting failures.
    pub fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Controller used for each kit.
    pub fn controller(&self) -> &KitDrController {
        &self.controller
    }

    /// Load the kits whose name contains `filter`, retrying transient failures.
    pub async fn load_kits(&self, filter: Option<&str>) -> Result<Vec<Kit>, FleetError> {
        let topology = &self.topology;
        let kits = retry(&self.topology_retry, "load_topology", move |_| async move {
            topology.load_kits(filter).await
        })
        .await
        .map_err(FleetError::Topology)?
        .value;
        info!(filter = filter.unwrap_or(""), kits = kits.len(), "topology loaded");
        Ok(kits)
    }

    /// Evaluate every kit matching `filter`.
    pub async fn run(&self, filter: Option<&str>, auth: &BasicAuth) -> Result<FleetReport, FleetError> {
        let kits = self.load_kits(filter).await?;
        if kits.is_empty() {
            warn!(filter = filter.unwrap_or(""), "no kits matched; nothing to watch");
            return Ok(FleetReport::default());
        }
        if self.fail_fast {
            self.run_fail_fast(&kits, auth).await
        } else {
            Ok(self.run_collecting(&kits, auth).await)
        }
    }

    /// Evaluate the kit named exactly `name`.
    pub async fn run_single_kit(&self, name: &str, auth: &BasicAuth) -> Result<KitOutcome, FleetError> {
        let kits = self.load_kits(Some(name)).await?;
        let kit = kits
            .into_iter()
            .find(|kit| kit.name == name)
            .ok_or_else(|| FleetError::KitNotFound(name.to_owned()))?;
        Ok(self.controller.run(&kit, auth).await?)
    }

    async fn run_fail_fast(&self, kits: &[Kit], auth: &BasicAuth) -> Result<FleetReport, FleetError> {
        let runs = kits.iter().map(|kit| self.controller.run(kit, auth));
        match try_join_all(runs).await {
            Ok(outcomes) => Ok(summarize(outcomes, Vec::new())),
            Err(err) => {
                let stopped: usize = kits
                    .iter()
                    .map(|kit| self.controller.registry().stop_kit(&kit.name))
                    .sum();
                error!(
                    kit = err.kit(),
                    error = %err,
                    stopped,
                    "kit failed; aborting fleet run and stopping its watches"
                );
                Err(FleetError::Kit(err))
            }
        }
    }

    async fn run_collecting(&self, kits: &[Kit], auth: &BasicAuth) -> FleetReport {
        let runs = kits.iter().map(|kit| self.controller.run(kit, auth));
        let mut outcomes = Vec::new();
        let mut failures = Vec::new();
        for result in join_all(runs).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(err) => {
                    error!(kit = err.kit(), error = %err, "kit failed; continuing fleet run");
                    failures.push(KitFailure {
                        kit: err.kit().to_owned(),
                        error: err.to_string(),
                    });
                }
            }
        }
        summarize(outcomes, failures)
    }
}

fn summarize(kits: Vec<KitOutcome>, failures: Vec<KitFailure>) -> FleetReport {
    let active = kits.iter().flat_map(|kit| kit.active.iter().cloned()).collect();
    let report = FleetReport {
        kits,
        active,
        failures,
    };
    info!(
        kits = report.kits.len(),
        failed = report.failures.len(),
        active = report.active.len(),
        watched = report.watched(),
        "fleet evaluation complete"
    );
    report
}
