//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Per-kit health aggregation and detector fan-out."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! One evaluation of one kit.
//!
//! All four mates are probed once, concurrently. The active mates found are
//! classified into [`MateHealth`]; healthy and degraded kits have their VPNs
//! discovered on the active mates, and one detector per VPN is registered in
//! the [`WatchRegistry`]. The controller returns without waiting for them.
use std::fmt;
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use kits_broker::{BrokerApi, BrokerError};
use kits_metrics::DrMetrics;
use kits_model::{
    BasicAuth, Datacenter, FailoverTask, Kit, MateId, MateResult, ReplicationRole, RoleMap,
    RoleMapBuilder, RoleMapError,
};
use kits_resilience::health::active_datacenters;
use kits_resilience::{retry, MateHealth, RetryError, RetryPolicy};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::detector::DnsChangeDetector;
use crate::watch::{WatchError, WatchKey, WatchRegistry};

/// Reasons a kit cannot be watched.
#[derive(Debug, Error)]
pub enum KitError {
    /// No mate reported itself active.
    #[error("kit {kit}: no active mates")]
    NoActiveMates {
        /// Kit name.
        kit: String,
    },
    /// The active set is not one mate per datacenter or a single mate.
    #[error("kit {kit}: ambiguous active set {active:?} across {datacenters:?}")]
    AmbiguousActiveSet {
        /// Kit name.
        kit: String,
        /// Active mates found.
        active: Vec<String>,
        /// Datacenters hosting them.
        datacenters: Vec<Datacenter>,
    },
    /// A VPN listing failed on an active mate.
    #[error("kit {kit}: vpn discovery for role {role} failed on {dc}/{mate} ({host}): {source}")]
    Discovery {
        /// Kit name.
        kit: String,
        /// Datacenter of the mate queried.
        dc: Datacenter,
        /// Mate queried.
        mate: MateId,
        /// Host queried.
        host: String,
        /// Role listed.
        role: ReplicationRole,
        /// Final listing error.
        #[source]
        source: RetryError<BrokerError>,
    },
    /// Two mates claimed the same VPN in the same role.
    #[error("kit {kit}: {source}")]
    RoleMap {
        /// Kit name.
        kit: String,
        /// Conflict.
        #[source]
        source: RoleMapError,
    },
}

impl KitError {
    /// Kit the error belongs to.
    pub fn kit(&self) -> &str {
        match self {
            KitError::NoActiveMates { kit }
            | KitError::AmbiguousActiveSet { kit, .. }
            | KitError::Discovery { kit, .. }
            | KitError::RoleMap { kit, .. } => kit,
        }
    }
}

/// Failover tasks derived for one kit, before any detector starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KitPlan {
    /// Kit name.
    pub kit: String,
    /// Classification of the probe results.
    #[serde(serialize_with = "serialize_health")]
    pub health: MateHealth,
    /// Mates that reported Active.
    pub active: Vec<MateResult>,
    /// One task per VPN to watch, ordered by VPN name.
    pub tasks: Vec<FailoverTask>,
    /// VPNs found active with no standby owner.
    pub skipped: Vec<String>,
}

/// Result of running the controller for one kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KitOutcome {
    /// Kit name.
    pub kit: String,
    /// Classification of the probe results.
    #[serde(serialize_with = "serialize_health")]
    pub health: MateHealth,
    /// Mates that reported Active.
    pub active: Vec<MateResult>,
    /// Detectors registered by this run.
    pub watched: Vec<WatchKey>,
}

fn serialize_health<S>(health: &MateHealth, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(health.as_str())
}

/// Evaluates kits and registers their detectors.
#[derive(Clone)]
pub struct KitDrController {
    broker: Arc<dyn BrokerApi>,
    detector: Arc<DnsChangeDetector>,
    registry: WatchRegistry,
    discovery: RetryPolicy,
    metrics: Option<DrMetrics>,
}

impl fmt::Debug for KitDrController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KitDrController")
            .field("discovery", &self.discovery)
            .field("watches", &self.registry.len())
            .finish()
    }
}

impl KitDrController {
    /// Controller probing through `broker` and registering detectors in `registry`.
    pub fn new(
        broker: Arc<dyn BrokerApi>,
        detector: Arc<DnsChangeDetector>,
        registry: WatchRegistry,
        discovery: RetryPolicy,
    ) -> Self {
        Self {
            broker,
            detector,
            registry,
            discovery,
            metrics: None,
        }
    }

    /// Record probe results and kit health in `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Registry receiving the detectors.
    pub fn registry(&self) -> &WatchRegistry {
        &self.registry
    }

    /// Probe all four mates of `kit` once each. Failed probes are logged and left out.
    pub async fn probe_mates(&self, kit: &Kit, auth: &BasicAuth) -> Vec<MateResult> {
        let mates = kit.mates();
        let probes = mates.iter().map(|mate| async move {
            let result = self.broker.probe(&mate.endpoint, auth).await;
            (mate, result)
        });

        let mut results = Vec::with_capacity(4);
        for (mate, outcome) in join_all(probes).await {
            match outcome {
                Ok(status) => {
                    info!(
                        kit = %kit.name,
                        dc = %mate.dc,
                        mate = %mate.mate,
                        host = %mate.endpoint.host,
                        port = mate.endpoint.port,
                        status = status.as_str(),
                        "mate probed"
                    );
                    self.record_probe(kit, mate.dc, mate.mate, &status.as_str().to_lowercase());
                    results.push(MateResult::new(kit.name.clone(), mate, status));
                }
                Err(err) => {
                    warn!(
                        kit = %kit.name,
                        dc = %mate.dc,
                        mate = %mate.mate,
                        host = %mate.endpoint.host,
                        port = mate.endpoint.port,
                        error = %err,
                        "mate probe failed; excluding from evaluation"
                    );
                    self.record_probe(kit, mate.dc, mate.mate, "unreachable");
                }
            }
        }
        results
    }

    /// Probe, classify and discover, without starting any detector.
    pub async fn plan(&self, kit: &Kit, auth: &BasicAuth) -> Result<KitPlan, KitError> {
        let results = self.probe_mates(kit, auth).await;
        let active: Vec<MateResult> = results.into_iter().filter(MateResult::is_active).collect();
        let health = MateHealth::classify(&active);
        if let Some(metrics) = &self.metrics {
            metrics.record_kit_health(&kit.name, health.as_str());
        }
        info!(
            kit = %kit.name,
            health = health.as_str(),
            active = active.len(),
            "kit classified"
        );

        if !health.is_actionable() {
            return Err(match health {
                MateHealth::NoActive => KitError::NoActiveMates {
                    kit: kit.name.clone(),
                },
                _ => KitError::AmbiguousActiveSet {
                    kit: kit.name.clone(),
                    active: active.iter().map(ToString::to_string).collect(),
                    datacenters: active_datacenters(&active),
                },
            });
        }

        let roles = self.discover(kit, &active, auth).await?;
        let mut tasks = Vec::new();
        let mut skipped = Vec::new();

        if health == MateHealth::Degraded {
            if roles.is_empty(ReplicationRole::Standby) {
                warn!(
                    kit = %kit.name,
                    active = %active[0],
                    "degraded kit has no standby vpns; nothing to watch"
                );
            } else {
                warn!(
                    kit = %kit.name,
                    active = %active[0],
                    vpns = roles.len(ReplicationRole::Standby),
                    "degraded kit; watching standby vpns without an active side"
                );
            }
            for (vpn, owner) in roles.iter(ReplicationRole::Standby) {
                tasks.push(FailoverTask::degraded(vpn, owner.clone()));
            }
        } else {
            for (vpn, owner) in roles.iter(ReplicationRole::Active) {
                match roles.owner(ReplicationRole::Standby, vpn) {
                    Some(standby) => {
                        tasks.push(FailoverTask::new(vpn, owner.clone(), standby.clone()))
                    }
                    None => {
                        warn!(
                            kit = %kit.name,
                            vpn,
                            active = %owner,
                            "vpn has no standby owner; not watching"
                        );
                        skipped.push(vpn.to_owned());
                    }
                }
            }
        }

        Ok(KitPlan {
            kit: kit.name.clone(),
            health,
            active,
            tasks,
            skipped,
        })
    }

    /// Evaluate `kit` and register one detector per planned VPN.
    pub async fn run(&self, kit: &Kit, auth: &BasicAuth) -> Result<KitOutcome, KitError> {
        let plan = self.plan(kit, auth).await?;
        let mut watched = Vec::with_capacity(plan.tasks.len());
        for task in plan.tasks {
            let vpn = task.vpn.clone();
            match self.registry.spawn(self.detector.clone(), task, auth.clone()) {
                Ok(key) => watched.push(key),
                Err(WatchError::AlreadyWatching(key)) => {
                    info!(kit = %kit.name, vpn = %vpn, watch = %key, "vpn already watched; keeping existing watch")
                }
                Err(err) => warn!(kit = %kit.name, vpn = %vpn, error = %err, "failed to register watch"),
            }
        }
        info!(
            kit = %kit.name,
            health = plan.health.as_str(),
            watched = watched.len(),
            skipped = plan.skipped.len(),
            "kit watches registered"
        );
        Ok(KitOutcome {
            kit: plan.kit,
            health: plan.health,
            active: plan.active,
            watched,
        })
    }

    async fn discover(
        &self,
        kit: &Kit,
        active: &[MateResult],
        auth: &BasicAuth,
    ) -> Result<RoleMap, KitError> {
        let queries = active.iter().map(|owner| async move {
            let active_vpns = self.list(kit, owner, ReplicationRole::Active, auth).await?;
            let standby_vpns = self.list(kit, owner, ReplicationRole::Standby, auth).await?;
            Ok::<_, KitError>((owner, active_vpns, standby_vpns))
        });
        let answers = try_join_all(queries).await?;

        let mut builder = RoleMapBuilder::new();
        for (owner, active_vpns, standby_vpns) in answers {
            info!(
                kit = %kit.name,
                dc = %owner.dc,
                mate = %owner.mate,
                host = %owner.host,
                active = ?active_vpns,
                standby = ?standby_vpns,
                "vpns discovered"
            );
            let conflict = |source| KitError::RoleMap {
                kit: kit.name.clone(),
                source,
            };
            builder
                .extend(ReplicationRole::Active, active_vpns, owner)
                .map_err(conflict)?;
            builder
                .extend(ReplicationRole::Standby, standby_vpns, owner)
                .map_err(conflict)?;
        }
        Ok(builder.build())
    }

    async fn list(
        &self,
        kit: &Kit,
        owner: &MateResult,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<Vec<String>, KitError> {
        let broker = &self.broker;
        let endpoint = &owner.endpoint();
        let step = format!("discover_{}", role.as_str());
        retry(&self.discovery, &step, move |_| async move {
            broker.list_vpns(endpoint, role, auth).await
        })
        .await
        .map(|outcome| outcome.value)
        .map_err(|source| KitError::Discovery {
            kit: kit.name.clone(),
            dc: owner.dc,
            mate: owner.mate,
            host: owner.host.clone(),
            role,
            source,
        })
    }

    fn record_probe(&self, kit: &Kit, dc: Datacenter, mate: MateId, outcome: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_probe(&kit.name, dc.as_str(), mate.as_str(), outcome);
        }
    }
}
