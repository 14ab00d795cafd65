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
use std::path::PathBuf;

use async_trait::async_trait;
use kits_common::DnsConfig;
use tracing::{debug, warn};

use crate::hosts::HostsTable;
use crate::{prefer_ipv4, DnsError, DnsResolver};

/// Resolver consulting static overrides, then a hosts file, then system DNS.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver {
    overrides: HashMap<String, IpAddr>,
    hosts_file: Option<PathBuf>,
}

impl SystemResolver {
    /// Resolver with no overrides.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver using the `[dns]` override table and hosts file.
    pub fn from_config(config: &DnsConfig) -> Self {
        Self {
            overrides: config
                .overrides
                .iter()
                .map(|(name, addr)| (name.to_lowercase(), *addr))
                .collect(),
            hosts_file: config.hosts_file.clone(),
        }
    }

    /// Add a static override.
    pub fn with_override(mut self, name: impl Into<String>, addr: IpAddr) -> Self {
        self.overrides.insert(name.into().to_lowercase(), addr);
        self
    }

    /// Consult `path` on every lookup.
    pub fn with_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.hosts_file = Some(path.into());
        self
    }

    async fn lookup_hosts_file(&self, name: &str) -> Result<Option<IpAddr>, DnsError> {
        let Some(path) = &self.hosts_file else {
            return Ok(None);
        };
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|err| DnsError::HostsFile {
                path: path.clone(),
                reason: err.to_string(),
            })?;
        Ok(HostsTable::parse(&content).lookup(name))
    }
}

#[async_trait]
impl DnsResolver for SystemResolver {
    async fn resolve(&self, name: &str) -> Result<IpAddr, DnsError> {
        let lowered = name.to_lowercase();
        if let Some(addr) = self.overrides.get(&lowered) {
            debug!(name, %addr, source = "override", "resolved");
            return Ok(*addr);
        }

        match self.lookup_hosts_file(&lowered).await {
            Ok(Some(addr)) => {
                debug!(name, %addr, source = "hosts_file", "resolved");
                return Ok(addr);
            }
            Ok(None) => {}
            Err(err) => warn!(name, error = %err, "hosts file unavailable; using system dns"),
        }

        let addrs = tokio::net::lookup_host((name, 0))
            .await
            .map_err(|err| DnsError::Lookup {
                name: name.to_owned(),
                reason: err.to_string(),
            })?;
        let addr = prefer_ipv4(addrs.map(|socket| socket.ip())).ok_or_else(|| DnsError::NotFound {
            name: name.to_owned(),
        })?;
        debug!(name, %addr, source = "system", "resolved");
        Ok(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn overrides_take_priority_over_hosts_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.2.5 orders-solace-b.local").unwrap();
        writeln!(file, "10.0.9.9 orders-solace-a.local").unwrap();

        let resolver = SystemResolver::new()
            .with_override("Orders-Solace-A.local", "10.0.1.5".parse().unwrap())
            .with_hosts_file(file.path());

        assert_eq!(
            resolver.resolve("orders-solace-a.local").await.unwrap(),
            "10.0.1.5".parse::<IpAddr>().unwrap()
        );
        assert_eq!(
            resolver.resolve("orders-solace-b.local").await.unwrap(),
            "10.0.2.5".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn hosts_file_is_reread_on_each_lookup() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "10.0.2.5 orders-solace-b.local").unwrap();
        let resolver = SystemResolver::new().with_hosts_file(file.path());
        assert_eq!(
            resolver.resolve("orders-solace-b.local").await.unwrap(),
            "10.0.2.5".parse::<IpAddr>().unwrap()
        );

        std::fs::write(file.path(), "10.0.2.9 orders-solace-b.local\n").unwrap();
        assert_eq!(
            resolver.resolve("orders-solace-b.local").await.unwrap(),
            "10.0.2.9".parse::<IpAddr>().unwrap()
        );
    }

    #[tokio::test]
    async fn literal_addresses_resolve_without_network() {
        let resolver = SystemResolver::new();
        assert_eq!(
            resolver.resolve("127.0.0.1").await.unwrap(),
            "127.0.0.1".parse::<IpAddr>().unwrap()
        );
    }
}
