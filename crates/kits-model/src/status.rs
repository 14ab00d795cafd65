//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology and replication role data model."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::topology::{Datacenter, Endpoint, Mate, MateId};

/// Redundancy status reported by a mate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MateStatus {
    /// At least one virtual router on the mate is locally active.
    Active,
    /// No virtual router on the mate is locally active.
    Standby,
}

impl MateStatus {
    /// Represent the status as a static label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MateStatus::Active => "ACTIVE",
            MateStatus::Standby => "STANDBY",
        }
    }
}

impl fmt::Display for MateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of probing one mate of a kit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MateResult {
    /// Kit the mate belongs to.
    pub kit: String,
    /// Datacenter slot.
    pub dc: Datacenter,
    /// Mate slot.
    pub mate: MateId,
    /// Management host.
    pub host: String,
    /// Management port.
    pub port: u16,
    /// Reported redundancy status.
    pub status: MateStatus,
}

impl MateResult {
    /// Build a result for a probed mate.
    pub fn new(kit: impl Into<String>, mate: &Mate, status: MateStatus) -> Self {
        Self {
            kit: kit.into(),
            dc: mate.dc,
            mate: mate.mate,
            host: mate.endpoint.host.clone(),
            port: mate.endpoint.port,
            status,
        }
    }

    /// Management endpoint of the mate.
    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port)
    }

    /// Whether the mate reported itself active.
    pub fn is_active(&self) -> bool {
        self.status == MateStatus::Active
    }
}

impl fmt::Display for MateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} ({}:{})",
            self.kit, self.dc, self.mate, self.host, self.port
        )
    }
}
