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

/// Network location of one broker instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    /// Hostname or literal address of the broker management interface.
    pub host: String,
    /// Management port.
    pub port: u16,
}

impl Endpoint {
    /// Construct an endpoint from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Datacenter slot within a kit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Datacenter {
    /// First datacenter.
    Dc1,
    /// Second datacenter.
    Dc2,
}

impl Datacenter {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Datacenter::Dc1 => "dc1",
            Datacenter::Dc2 => "dc2",
        }
    }
}

impl fmt::Display for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Datacenter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dc1" => Ok(Datacenter::Dc1),
            "dc2" => Ok(Datacenter::Dc2),
            other => Err(format!("unknown datacenter: {}", other)),
        }
    }
}

/// Mate slot within a datacenter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MateId {
    /// First mate of the redundancy pair.
    Mate1,
    /// Second mate of the redundancy pair.
    Mate2,
}

impl MateId {
    /// Stable label used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            MateId::Mate1 => "mate1",
            MateId::Mate2 => "mate2",
        }
    }
}

impl fmt::Display for MateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for MateId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mate1" => Ok(MateId::Mate1),
            "mate2" => Ok(MateId::Mate2),
            other => Err(format!("unknown mate: {}", other)),
        }
    }
}

/// The two mates hosted by one datacenter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatacenterPair {
    /// First mate endpoint.
    pub mate1: Endpoint,
    /// Second mate endpoint.
    pub mate2: Endpoint,
}

/// One broker instance, addressed by its slot in the kit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mate {
    /// Datacenter hosting the mate.
    pub dc: Datacenter,
    /// Position of the mate within its datacenter.
    pub mate: MateId,
    /// Management endpoint.
    pub endpoint: Endpoint,
}

/// A named disaster-recovery unit: two datacenters with two mates each.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kit {
    /// Kit name. Descriptor files key kits by name, so the loader fills this in.
    #[serde(default)]
    pub name: String,
    /// First datacenter.
    pub dc1: DatacenterPair,
    /// Second datacenter.
    pub dc2: DatacenterPair,
}

impl Kit {
    /// Return the four mates in fixed dc1/mate1, dc1/mate2, dc2/mate1, dc2/mate2 order.
    pub fn mates(&self) -> [Mate; 4] {
        [
            Mate {
                dc: Datacenter::Dc1,
                mate: MateId::Mate1,
                endpoint: self.dc1.mate1.clone(),
            },
            Mate {
                dc: Datacenter::Dc1,
                mate: MateId::Mate2,
                endpoint: self.dc1.mate2.clone(),
            },
            Mate {
                dc: Datacenter::Dc2,
                mate: MateId::Mate1,
                endpoint: self.dc2.mate1.clone(),
            },
            Mate {
                dc: Datacenter::Dc2,
                mate: MateId::Mate2,
                endpoint: self.dc2.mate2.clone(),
            },
        ]
    }

    /// Look up the endpoint held in a given slot.
    pub fn endpoint(&self, dc: Datacenter, mate: MateId) -> &Endpoint {
        let pair = match dc {
            Datacenter::Dc1 => &self.dc1,
            Datacenter::Dc2 => &self.dc2,
        };
        match mate {
            MateId::Mate1 => &pair.mate1,
            MateId::Mate2 => &pair.mate2,
        }
    }
}
