//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Hostname resolution with static overrides."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Hostname resolution for the DNS change detector.
//!
//! Resolution order for [`SystemResolver`]:
//!
//! 1. **Config overrides** from `[dns.overrides]`
//! 2. **Hosts file** in `/etc/hosts` format, re-read on every lookup
//! 3. **Host system DNS** via `tokio::net::lookup_host`, preferring IPv4
#![warn(missing_docs)]

use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

mod hosts;
mod system;

pub use hosts::{HostsTable, StaticResolver};
pub use system::SystemResolver;

/// Errors raised while resolving a watched name.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DnsError {
    /// No record exists for the name.
    #[error("no address found for {name}")]
    NotFound {
        /// Name looked up.
        name: String,
    },
    /// The system resolver failed.
    #[error("lookup of {name} failed: {reason}")]
    Lookup {
        /// Name looked up.
        name: String,
        /// Resolver error.
        reason: String,
    },
    /// The lookup exceeded its time bound.
    #[error("lookup of {name} timed out after {after:?}")]
    Timeout {
        /// Name looked up.
        name: String,
        /// Bound that was exceeded.
        after: Duration,
    },
    /// The configured hosts file could not be read.
    #[error("unable to read hosts file {path:?}: {reason}")]
    HostsFile {
        /// File path.
        path: PathBuf,
        /// I/O error.
        reason: String,
    },
}

/// Maps a hostname to one address.
#[async_trait]
pub trait DnsResolver: Send + Sync + 'static {
    /// Resolve `name` to a single address.
    async fn resolve(&self, name: &str) -> Result<IpAddr, DnsError>;
}

/// Pick the first IPv4 address, falling back to the first address of any family.
pub fn prefer_ipv4<I>(addrs: I) -> Option<IpAddr>
where
    I: IntoIterator<Item = IpAddr>,
{
    let mut fallback = None;
    for addr in addrs {
        if addr.is_ipv4() {
            return Some(addr);
        }
        fallback.get_or_insert(addr);
    }
    fallback
}
