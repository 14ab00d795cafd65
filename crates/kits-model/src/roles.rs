//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology and replication role data model."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::status::MateResult;

/// Replication role a VPN holds on a broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationRole {
    /// Accepts writes and is the source of truth.
    Active,
    /// Receives replicated data only.
    Standby,
}

impl ReplicationRole {
    /// Wire value used by the broker management API.
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Active => "active",
            ReplicationRole::Standby => "standby",
        }
    }
}

impl fmt::Display for ReplicationRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReplicationRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ReplicationRole::Active),
            "standby" => Ok(ReplicationRole::Standby),
            other => Err(format!("unknown replication role: {}", other)),
        }
    }
}

/// Raised when two mates claim the same VPN in the same role.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RoleMapError {
    /// The VPN already has an owner for this role.
    #[error("vpn {vpn} reported in {role} role by both {first} and {second}")]
    ConflictingOwner {
        /// VPN name.
        vpn: String,
        /// Role in which the conflict occurred.
        role: ReplicationRole,
        /// Owner recorded first.
        first: String,
        /// Owner that attempted to claim the VPN second.
        second: String,
    },
}

/// Accumulates VPN ownership answers before freezing them into a [`RoleMap`].
#[derive(Debug, Default)]
pub struct RoleMapBuilder {
    active: BTreeMap<String, MateResult>,
    standby: BTreeMap<String, MateResult>,
}

impl RoleMapBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `owner` holds `vpn` in `role`.
    ///
    /// Re-reporting the same owner is accepted; a different owner is a conflict.
    pub fn insert(
        &mut self,
        role: ReplicationRole,
        vpn: impl Into<String>,
        owner: &MateResult,
    ) -> Result<(), RoleMapError> {
        let map = match role {
            ReplicationRole::Active => &mut self.active,
            ReplicationRole::Standby => &mut self.standby,
        };
        match map.entry(vpn.into()) {
            Entry::Vacant(slot) => {
                slot.insert(owner.clone());
                Ok(())
            }
            Entry::Occupied(existing) if existing.get() == owner => Ok(()),
            Entry::Occupied(existing) => Err(RoleMapError::ConflictingOwner {
                vpn: existing.key().clone(),
                role,
                first: existing.get().to_string(),
                second: owner.to_string(),
            }),
        }
    }

    /// Record a batch of VPN names reported by one owner.
    pub fn extend<I, S>(
        &mut self,
        role: ReplicationRole,
        vpns: I,
        owner: &MateResult,
    ) -> Result<(), RoleMapError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for vpn in vpns {
            self.insert(role, vpn, owner)?;
        }
        Ok(())
    }

    /// Freeze the collected answers.
    pub fn build(self) -> RoleMap {
        RoleMap {
            active: self.active,
            standby: self.standby,
        }
    }
}

/// VPN ownership per replication role for one kit evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleMap {
    active: BTreeMap<String, MateResult>,
    standby: BTreeMap<String, MateResult>,
}

impl RoleMap {
    /// Mate holding `vpn` in the given role, if any.
    pub fn owner(&self, role: ReplicationRole, vpn: &str) -> Option<&MateResult> {
        self.mapping(role).get(vpn)
    }

    /// Iterate the VPNs held in `role` together with their owner, ordered by name.
    pub fn iter(&self, role: ReplicationRole) -> impl Iterator<Item = (&str, &MateResult)> {
        self.mapping(role)
            .iter()
            .map(|(vpn, owner)| (vpn.as_str(), owner))
    }

    /// Number of VPNs recorded for `role`.
    pub fn len(&self, role: ReplicationRole) -> usize {
        self.mapping(role).len()
    }

    /// Whether no VPN is recorded for `role`.
    pub fn is_empty(&self, role: ReplicationRole) -> bool {
        self.mapping(role).is_empty()
    }

    fn mapping(&self, role: ReplicationRole) -> &BTreeMap<String, MateResult> {
        match role {
            ReplicationRole::Active => &self.active,
            ReplicationRole::Standby => &self.standby,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MateStatus;
    use crate::topology::{Datacenter, Endpoint, Mate, MateId};

    fn owner(dc: Datacenter, host: &str) -> MateResult {
        let mate = Mate {
            dc,
            mate: MateId::Mate1,
            endpoint: Endpoint::new(host, 8080),
        };
        MateResult::new("alpha", &mate, MateStatus::Active)
    }

    #[test]
    fn builder_keeps_roles_separate() {
        let dc1 = owner(Datacenter::Dc1, "a1");
        let dc2 = owner(Datacenter::Dc2, "b1");
        let mut builder = RoleMapBuilder::new();
        builder
            .extend(ReplicationRole::Active, ["orders", "billing"], &dc1)
            .unwrap();
        builder
            .extend(ReplicationRole::Standby, ["orders", "billing"], &dc2)
            .unwrap();
        let map = builder.build();

        assert_eq!(map.len(ReplicationRole::Active), 2);
        assert_eq!(map.owner(ReplicationRole::Active, "orders"), Some(&dc1));
        assert_eq!(map.owner(ReplicationRole::Standby, "orders"), Some(&dc2));
        let names: Vec<_> = map.iter(ReplicationRole::Active).map(|(vpn, _)| vpn).collect();
        assert_eq!(names, vec!["billing", "orders"]);
    }

    #[test]
    fn second_owner_for_same_role_is_rejected() {
        let dc1 = owner(Datacenter::Dc1, "a1");
        let dc2 = owner(Datacenter::Dc2, "b1");
        let mut builder = RoleMapBuilder::new();
        builder.insert(ReplicationRole::Active, "orders", &dc1).unwrap();
        builder.insert(ReplicationRole::Active, "orders", &dc1).unwrap();
        let err = builder
            .insert(ReplicationRole::Active, "orders", &dc2)
            .unwrap_err();
        assert!(matches!(
            err,
            RoleMapError::ConflictingOwner { ref vpn, role: ReplicationRole::Active, .. } if vpn == "orders"
        ));
    }

    #[test]
    fn role_wire_values() {
        assert_eq!(ReplicationRole::Active.as_str(), "active");
        assert_eq!(ReplicationRole::Standby.to_string(), "standby");
        assert_eq!("STANDBY".parse::<ReplicationRole>().unwrap(), ReplicationRole::Standby);
    }
}
