//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use async_trait::async_trait;
use kits_model::{BasicAuth, Endpoint, MateStatus, ReplicationRole};
use serde::{Deserialize, Serialize};

use crate::error::BrokerError;

/// Reports the redundancy status of one broker.
#[async_trait]
pub trait MateStatusProbe: Send + Sync + 'static {
    /// Query the redundancy state of the broker at `endpoint`.
    async fn probe(&self, endpoint: &Endpoint, auth: &BasicAuth) -> Result<MateStatus, BrokerError>;
}

/// Lists the replication-enabled VPNs holding a role on a broker.
#[async_trait]
pub trait VpnRoleDirectory: Send + Sync + 'static {
    /// Names of enabled, replicated, non-system VPNs in `role` at `endpoint`.
    async fn list_vpns(
        &self,
        endpoint: &Endpoint,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError>;
}

/// Changes and inspects the replication role of a single VPN.
#[async_trait]
pub trait RoleMutator: Send + Sync + 'static {
    /// Set the replication role of `vpn`. Setting the current role again is a no-op.
    async fn set_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<(), BrokerError>;

    /// Replication data queues of `vpn` still transmitting. Empty once drained.
    async fn replication_backlog(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError>;

    /// Whether `vpn` currently holds `role` at `endpoint`.
    async fn has_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<bool, BrokerError>;
}

/// Platform details reported by the management API discovery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerInfo {
    /// Broker platform identifier.
    pub platform: String,
    /// Management API version.
    pub semp_version: String,
}

/// Reads the management API discovery endpoint.
#[async_trait]
pub trait BrokerAbout: Send + Sync + 'static {
    /// Follow the about resource to the API description and return its details.
    async fn about(&self, endpoint: &Endpoint, auth: &BasicAuth) -> Result<BrokerInfo, BrokerError>;
}

/// Every broker capability behind one object.
pub trait BrokerApi: MateStatusProbe + VpnRoleDirectory + RoleMutator + BrokerAbout {}

impl<T> BrokerApi for T where T: MateStatusProbe + VpnRoleDirectory + RoleMutator + BrokerAbout {}
