//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Command-line parsing of failover sides."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use kits_model::{Datacenter, FailoverTask, MateId, MateResult, MateStatus};

/// A side given as `dc:mate:host:port`, e.g. `dc2:mate1:broker-b1:943`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SideArg {
    pub dc: Datacenter,
    pub mate: MateId,
    pub host: String,
    pub port: u16,
}

impl std::str::FromStr for SideArg {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(dc), Some(mate), Some(address)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(anyhow!("expected dc:mate:host:port, got '{}'", s));
        };
        let (host, port) = address
            .rsplit_once(':')
            .ok_or_else(|| anyhow!("missing port in '{}'", s))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        if host.is_empty() {
            return Err(anyhow!("missing host in '{}'", s));
        }
        Ok(Self {
            dc: dc.parse().map_err(|err: String| anyhow!(err))?,
            mate: mate.parse().map_err(|err: String| anyhow!(err))?,
            host: host.to_owned(),
            port: port
                .parse()
                .with_context(|| format!("invalid port in '{}'", s))?,
        })
    }
}

impl SideArg {
    /// The side as a probe result of `kit`. Sides named on the command line
    /// are taken to be serving brokers.
    pub fn into_result(self, kit: &str) -> MateResult {
        MateResult {
            kit: kit.to_owned(),
            dc: self.dc,
            mate: self.mate,
            host: self.host,
            port: self.port,
            status: MateStatus::Active,
        }
    }
}

/// Task for `vpn`, degraded when `active` is absent.
pub fn task(kit: &str, vpn: &str, active: Option<SideArg>, standby: SideArg) -> FailoverTask {
    let standby = standby.into_result(kit);
    match active {
        Some(active) => FailoverTask::new(vpn, active.into_result(kit), standby),
        None => FailoverTask::degraded(vpn, standby),
    }
}
