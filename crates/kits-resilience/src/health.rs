//! ---
//! dr_section: "03-resilience"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Retry policies and kit health classification."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::fmt;

use kits_model::{Datacenter, MateResult};

/// Health of one kit derived from the Active mates found by probing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MateHealth {
    /// Exactly one active mate in each datacenter.
    Healthy,
    /// Exactly one active mate across the kit.
    Degraded,
    /// No mate reported itself active.
    NoActive,
    /// Two active mates in one datacenter, or more than two overall.
    Ambiguous,
}

impl MateHealth {
    /// Classify the probe results of a kit. Standby results are ignored.
    pub fn classify(results: &[MateResult]) -> Self {
        let active: Vec<&MateResult> = results.iter().filter(|r| r.is_active()).collect();
        match active.as_slice() {
            [] => MateHealth::NoActive,
            [_] => MateHealth::Degraded,
            [a, b] if a.dc != b.dc => MateHealth::Healthy,
            _ => MateHealth::Ambiguous,
        }
    }

    /// Represent the health as a static label for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MateHealth::Healthy => "healthy",
            MateHealth::Degraded => "degraded",
            MateHealth::NoActive => "no_active",
            MateHealth::Ambiguous => "ambiguous",
        }
    }

    /// Whether failover tasks can be derived for this classification.
    pub fn is_actionable(&self) -> bool {
        matches!(self, MateHealth::Healthy | MateHealth::Degraded)
    }
}

impl fmt::Display for MateHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Datacenters hosting an active mate, in dc1, dc2 order.
pub fn active_datacenters(results: &[MateResult]) -> Vec<Datacenter> {
    let mut dcs: Vec<Datacenter> = results
        .iter()
        .filter(|r| r.is_active())
        .map(|r| r.dc)
        .collect();
    dcs.sort();
    dcs.dedup();
    dcs
}
