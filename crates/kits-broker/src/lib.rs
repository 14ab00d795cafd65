//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Capability traits the failover logic consumes, and the HTTP client that
//! implements them against the broker management API.
#![warn(missing_docs)]

mod api;
mod error;
pub mod semp;

pub use api::{BrokerAbout, BrokerApi, BrokerInfo, MateStatusProbe, RoleMutator, VpnRoleDirectory};
pub use error::BrokerError;
pub use semp::SempClient;
