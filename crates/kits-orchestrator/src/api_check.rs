//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Fleet-wide management API connectivity check."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use kits_broker::{BrokerApi, BrokerError};
use kits_model::{BasicAuth, Datacenter, Kit, MateId};
use kits_resilience::{retry, RetryError, RetryPolicy};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

/// Discovery details of one mate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MateApiInfo {
    /// Kit name.
    pub kit: String,
    /// Datacenter slot.
    pub dc: Datacenter,
    /// Mate slot.
    pub mate: MateId,
    /// Management host.
    pub host: String,
    /// Management port.
    pub port: u16,
    /// Broker platform.
    pub platform: String,
    /// Management API version.
    pub semp_version: String,
}

/// A mate whose discovery endpoint could not be read.
#[derive(Debug, Error)]
#[error("api check failed for {kit}/{dc}/{mate} ({host}:{port}): {source}")]
pub struct ApiCheckError {
    /// Kit name.
    pub kit: String,
    /// Datacenter slot.
    pub dc: Datacenter,
    /// Mate slot.
    pub mate: MateId,
    /// Management host.
    pub host: String,
    /// Management port.
    pub port: u16,
    /// Final error.
    #[source]
    pub source: RetryError<BrokerError>,
}

/// Reads the discovery endpoint of every mate.
#[derive(Clone)]
pub struct ApiCheck {
    broker: Arc<dyn BrokerApi>,
    policy: RetryPolicy,
}

impl std::fmt::Debug for ApiCheck {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCheck").field("policy", &self.policy).finish()
    }
}

impl ApiCheck {
    /// Check through `broker`, retrying each mate under `policy`.
    pub fn new(broker: Arc<dyn BrokerApi>, policy: RetryPolicy) -> Self {
        Self { broker, policy }
    }

    /// Query all four mates of `kit` concurrently. Any failing mate fails the kit.
    pub async fn check_kit(&self, kit: &Kit, auth: &BasicAuth) -> Result<Vec<MateApiInfo>, ApiCheckError> {
        let mates = kit.mates();
        let calls = mates.iter().map(|mate| async move {
            let broker = &self.broker;
            let endpoint = &mate.endpoint;
            let step = format!("api_check_{}_{}", mate.dc, mate.mate);
            retry(&self.policy, &step, move |_| async move {
                broker.about(endpoint, auth).await
            })
            .await
            .map(|outcome| MateApiInfo {
                kit: kit.name.clone(),
                dc: mate.dc,
                mate: mate.mate,
                host: endpoint.host.clone(),
                port: endpoint.port,
                platform: outcome.value.platform,
                semp_version: outcome.value.semp_version,
            })
            .map_err(|source| ApiCheckError {
                kit: kit.name.clone(),
                dc: mate.dc,
                mate: mate.mate,
                host: endpoint.host.clone(),
                port: endpoint.port,
                source,
            })
        });

        let results = join_all(calls).await;
        let succeeded = results.iter().filter(|result| result.is_ok()).count();
        let summary = format!("success {}/{}", succeeded, results.len());
        if succeeded == results.len() {
            info!(kit = %kit.name, summary = %summary, "api check complete");
        } else {
            warn!(kit = %kit.name, summary = %summary, "api check failed");
        }

        let mut infos = Vec::with_capacity(results.len());
        for result in results {
            let info = result?;
            info!(
                kit = %info.kit,
                dc = %info.dc,
                mate = %info.mate,
                host = %info.host,
                platform = %info.platform,
                semp_version = %info.semp_version,
                "api reachable"
            );
            infos.push(info);
        }
        Ok(infos)
    }

    /// Check every kit concurrently, failing on the first kit that fails.
    pub async fn check_fleet(&self, kits: &[Kit], auth: &BasicAuth) -> Result<Vec<MateApiInfo>, ApiCheckError> {
        let per_kit = try_join_all(kits.iter().map(|kit| self.check_kit(kit, auth))).await?;
        Ok(per_kit.into_iter().flatten().collect())
    }
}
