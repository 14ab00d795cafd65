//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Kit topology loading from descriptor archives."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::path::PathBuf;

use async_trait::async_trait;
use kits_common::TopologyConfig;
use kits_model::Kit;
use reqwest::{Client, StatusCode};
use tracing::info;

use crate::descriptor::{apply_filter, extract_descriptor, parse_descriptor};
use crate::{TopologyError, TopologyProvider};

/// Where a topology comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologySource {
    /// Remote gzip tarball.
    Url(String),
    /// Local gzip tarball, or a plain YAML descriptor when the extension is `.yaml`/`.yml`.
    Path(PathBuf),
}

impl TopologySource {
    /// Source selected by the `[topology]` section. `url` wins over `path`.
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        match (&config.url, &config.path) {
            (Some(url), _) if !url.trim().is_empty() => Ok(TopologySource::Url(url.clone())),
            (_, Some(path)) => Ok(TopologySource::Path(path.clone())),
            _ => Err(TopologyError::NoSource),
        }
    }
}

/// Loads kits from an archive or descriptor file.
#[derive(Debug, Clone)]
pub struct TopologyLoader {
    source: TopologySource,
    descriptor: String,
    http: Client,
}

impl TopologyLoader {
    /// Loader reading `source` and picking the entry ending with `descriptor`.
    pub fn new(source: TopologySource, descriptor: impl Into<String>) -> Self {
        Self {
            source,
            descriptor: descriptor.into(),
            http: Client::new(),
        }
    }

    /// Loader built from the `[topology]` section.
    pub fn from_config(config: &TopologyConfig) -> Result<Self, TopologyError> {
        Ok(Self::new(
            TopologySource::from_config(config)?,
            config.descriptor.clone(),
        ))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, TopologyError> {
        let download_error = |err: reqwest::Error| TopologyError::Download {
            url: url.to_owned(),
            reason: err.to_string(),
        };
        let response = self.http.get(url).send().await.map_err(download_error)?;
        if response.status() != StatusCode::OK {
            return Err(TopologyError::Status {
                url: url.to_owned(),
                status: response.status().as_u16(),
            });
        }
        let bytes = response.bytes().await.map_err(download_error)?;
        Ok(bytes.to_vec())
    }

    async fn read_descriptor(&self) -> Result<String, TopologyError> {
        match &self.source {
            TopologySource::Url(url) => {
                let archive = self.download(url).await?;
                extract_descriptor(&archive, &self.descriptor)
            }
            TopologySource::Path(path) => {
                let io_error = |err: std::io::Error| TopologyError::Io {
                    path: path.display().to_string(),
                    reason: err.to_string(),
                };
                let plain_yaml = path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .map(|ext| ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml"))
                    .unwrap_or(false);
                if plain_yaml {
                    tokio::fs::read_to_string(path).await.map_err(io_error)
                } else {
                    let archive = tokio::fs::read(path).await.map_err(io_error)?;
                    extract_descriptor(&archive, &self.descriptor)
                }
            }
        }
    }
}

#[async_trait]
impl TopologyProvider for TopologyLoader {
    async fn load_kits(&self, filter: Option<&str>) -> Result<Vec<Kit>, TopologyError> {
        let yaml = self.read_descriptor().await?;
        let kits = apply_filter(parse_descriptor(&yaml)?, filter);
        info!(source = ?self.source, filter = filter.unwrap_or(""), count = kits.len(), "kits parsed");
        Ok(kits)
    }
}
