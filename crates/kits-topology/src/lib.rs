//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology loading from descriptor archives."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Kit topology sources.
//!
//! A topology descriptor is a YAML document of the form
//! `kits: {name: {dc1: {mate1: {host, port}, mate2: ..}, dc2: ..}}`, usually
//! shipped inside a gzip-compressed tar archive.
#![warn(missing_docs)]

use async_trait::async_trait;
use kits_model::Kit;
use kits_resilience::Retryable;
use thiserror::Error;

pub mod descriptor;
mod loader;

pub use loader::{TopologyLoader, TopologySource};

/// Errors raised while loading a topology.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TopologyError {
    /// The archive download failed at the connection level.
    #[error("failed to download {url}: {reason}")]
    Download {
        /// Archive URL.
        url: String,
        /// Transport error.
        reason: String,
    },
    /// The archive server answered with a non-200 status.
    #[error("download of {url} failed with HTTP {status}")]
    Status {
        /// Archive URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },
    /// A local topology file could not be read.
    #[error("unable to read {path}: {reason}")]
    Io {
        /// File path.
        path: String,
        /// I/O error.
        reason: String,
    },
    /// The archive is not a readable gzip tarball.
    #[error("invalid topology archive: {0}")]
    Archive(String),
    /// No archive entry matched the descriptor suffix.
    #[error("{0} not found in archive")]
    DescriptorMissing(String),
    /// The descriptor is not valid YAML of the expected shape.
    #[error("failed to decode topology descriptor: {0}")]
    Decode(String),
    /// No source was configured.
    #[error("no topology source configured; set topology.url or topology.path")]
    NoSource,
}

impl Retryable for TopologyError {
    fn is_retryable(&self) -> bool {
        match self {
            TopologyError::Download { .. } => true,
            TopologyError::Status { status, .. } => *status >= 500 || *status == 429,
            TopologyError::Io { .. }
            | TopologyError::Archive(_)
            | TopologyError::DescriptorMissing(_)
            | TopologyError::Decode(_)
            | TopologyError::NoSource => false,
        }
    }
}

/// Supplies the kits of the fleet.
#[async_trait]
pub trait TopologyProvider: Send + Sync + 'static {
    /// Load every kit whose name contains `filter`, or all kits when `None`.
    async fn load_kits(&self, filter: Option<&str>) -> Result<Vec<Kit>, TopologyError>;
}

/// Fixed in-memory topology.
#[derive(Debug, Clone, Default)]
pub struct StaticTopology {
    kits: Vec<Kit>,
}

impl StaticTopology {
    /// Topology serving `kits`.
    pub fn new(kits: Vec<Kit>) -> Self {
        Self { kits }
    }
}

#[async_trait]
impl TopologyProvider for StaticTopology {
    async fn load_kits(&self, filter: Option<&str>) -> Result<Vec<Kit>, TopologyError> {
        Ok(descriptor::apply_filter(self.kits.clone(), filter))
    }
}
