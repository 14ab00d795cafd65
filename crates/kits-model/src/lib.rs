//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology and replication role data model."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Data model shared across the DR workspace.
//!
//! A [`Kit`] is two datacenters of two mates each. Probing the mates yields
//! [`MateResult`]s, the active ones are queried for their VPNs and the answers
//! are folded into a [`RoleMap`], from which one [`FailoverTask`] per VPN is
//! derived.
#![warn(missing_docs)]

mod auth;
mod roles;
mod status;
mod task;
mod topology;

pub use auth::BasicAuth;
pub use roles::{ReplicationRole, RoleMap, RoleMapBuilder, RoleMapError};
pub use status::{MateResult, MateStatus};
pub use task::FailoverTask;
pub use topology::{Datacenter, DatacenterPair, Endpoint, Kit, Mate, MateId};
