//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology and replication role data model."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

use crate::status::MateResult;

/// Everything needed to fail one VPN over from its active to its standby side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailoverTask {
    /// VPN to fail over.
    pub vpn: String,
    /// Broker currently holding the VPN active. Absent in degraded mode.
    pub active_side: Option<MateResult>,
    /// Broker holding the VPN standby, promoted by the failover.
    pub standby_side: MateResult,
}

impl FailoverTask {
    /// Task with both sides reachable.
    pub fn new(vpn: impl Into<String>, active_side: MateResult, standby_side: MateResult) -> Self {
        Self {
            vpn: vpn.into(),
            active_side: Some(active_side),
            standby_side,
        }
    }

    /// Task for degraded mode, where no previously-active broker is reachable.
    pub fn degraded(vpn: impl Into<String>, standby_side: MateResult) -> Self {
        Self {
            vpn: vpn.into(),
            active_side: None,
            standby_side,
        }
    }

    /// Whether the task lacks an active side.
    pub fn is_degraded(&self) -> bool {
        self.active_side.is_none()
    }

    /// Kit the task belongs to, taken from the standby side.
    pub fn kit(&self) -> &str {
        &self.standby_side.kit
    }
}
