//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Hostname resolution with static overrides."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::net::IpAddr;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::{prefer_ipv4, DnsError, DnsResolver};

/// Parsed hosts-format table mapping lowercase hostnames to addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostsTable {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl HostsTable {
    /// Parse `/etc/hosts` style content.
    ///
    /// Blank lines, comments, and lines with an unparsable address are skipped.
    pub fn parse(content: &str) -> Self {
        let mut entries: HashMap<String, Vec<IpAddr>> = HashMap::new();
        for line in content.lines() {
            let line = match line.split_once('#') {
                Some((before, _)) => before,
                None => line,
            }
            .trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split_whitespace();
            let Some(addr) = fields.next().and_then(|raw| raw.parse::<IpAddr>().ok()) else {
                continue;
            };
            for hostname in fields {
                entries
                    .entry(hostname.to_lowercase())
                    .or_default()
                    .push(addr);
            }
        }
        Self { entries }
    }

    /// Address for `hostname`, preferring IPv4 when several are listed.
    pub fn lookup(&self, hostname: &str) -> Option<IpAddr> {
        self.entries
            .get(&hostname.to_lowercase())
            .and_then(|addrs| prefer_ipv4(addrs.iter().copied()))
    }

    /// Number of distinct hostnames in the table.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// In-memory resolver whose records can be changed while it is in use.
///
/// Operators use it to pin watched names, tests use it to script cutovers.
#[derive(Debug, Default)]
pub struct StaticResolver {
    records: RwLock<HashMap<String, IpAddr>>,
}

impl StaticResolver {
    /// Empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver preloaded with `records`.
    pub fn with_records<I, S>(records: I) -> Self
    where
        I: IntoIterator<Item = (S, IpAddr)>,
        S: Into<String>,
    {
        let resolver = Self::new();
        for (name, addr) in records {
            resolver.set(name, addr);
        }
        resolver
    }

    /// Point `name` at `addr`.
    pub fn set(&self, name: impl Into<String>, addr: IpAddr) {
        self.records.write().insert(name.into().to_lowercase(), addr);
    }

    /// Drop the record for `name`, making it fail to resolve.
    pub fn remove(&self, name: &str) {
        self.records.write().remove(&name.to_lowercase());
    }
}

#[async_trait]
impl DnsResolver for StaticResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr, DnsError> {
        self.records
            .read()
            .get(&name.to_lowercase())
            .copied()
            .ok_or_else(|| DnsError::NotFound {
                name: name.to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_skips_comments_and_invalid_addresses() {
        let table = HostsTable::parse(
            "# header\n\
             10.0.1.5   orders-solace-a.local   # primary\n\
             not-an-ip  broken.local\n\
             \n\
             fd00::9    Orders-Solace-B.local\n\
             10.0.2.5\torders-solace-b.local alias.local\n",
        );
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.lookup("orders-solace-a.local"),
            Some("10.0.1.5".parse().unwrap())
        );
        assert_eq!(
            table.lookup("ORDERS-SOLACE-B.LOCAL"),
            Some("10.0.2.5".parse().unwrap())
        );
        assert!(table.lookup("broken.local").is_none());
    }

    #[tokio::test]
    async fn static_resolver_tracks_updates() {
        let resolver = StaticResolver::with_records([("a.local", "10.0.0.1".parse().unwrap())]);
        assert_eq!(
            resolver.resolve("A.local").await.unwrap(),
            "10.0.0.1".parse::<IpAddr>().unwrap()
        );
        resolver.set("a.local", "10.0.0.2".parse().unwrap());
        assert_eq!(
            resolver.resolve("a.local").await.unwrap(),
            "10.0.0.2".parse::<IpAddr>().unwrap()
        );
        resolver.remove("a.local");
        assert!(matches!(
            resolver.resolve("a.local").await,
            Err(DnsError::NotFound { .. })
        ));
    }
}
