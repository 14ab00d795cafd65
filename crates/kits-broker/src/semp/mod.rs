//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! HTTP client for the broker management API.
//!
//! The redundancy probe uses the legacy XML request endpoint; everything else
//! uses the JSON v2 monitor and config resources.
use std::time::Duration;

use async_trait::async_trait;
use kits_common::{BrokerConfig, BrokerScheme};
use kits_model::{BasicAuth, Endpoint, MateStatus, ReplicationRole};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{debug, info};
use url::Url;

use crate::api::{BrokerAbout, BrokerInfo, MateStatusProbe, RoleMutator, VpnRoleDirectory};
use crate::error::BrokerError;

pub mod redundancy;
mod wire;

use wire::{AboutEnvelope, Collection, QueueEntry, VpnEntry};

const MAX_PAGES: usize = 100;
const REPLICATION_QUEUE: &str = "#MSGVPN_REPLICATION_DATA_QUEUE";

/// Management API client implementing every broker capability trait.
#[derive(Debug, Clone)]
pub struct SempClient {
    http: Client,
    scheme: BrokerScheme,
    probe_timeout: Duration,
}

impl SempClient {
    /// Build a client with an explicit scheme and timeouts.
    pub fn new(
        scheme: BrokerScheme,
        probe_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, BrokerError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|err| BrokerError::Request(err.to_string()))?;
        Ok(Self {
            http,
            scheme,
            probe_timeout,
        })
    }

    /// Build a client from the `[broker]` configuration section.
    pub fn from_config(config: &BrokerConfig) -> Result<Self, BrokerError> {
        Self::new(config.scheme, config.probe_timeout, config.request_timeout)
    }

    fn url(&self, endpoint: &Endpoint, segments: &[&str]) -> Result<Url, BrokerError> {
        let host = if endpoint.host.contains(':') && !endpoint.host.starts_with('[') {
            format!("[{}]", endpoint.host)
        } else {
            endpoint.host.clone()
        };
        let base = format!("{}://{}:{}/", self.scheme.as_str(), host, endpoint.port);
        let mut url =
            Url::parse(&base).map_err(|err| BrokerError::Request(format!("{base}: {err}")))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| BrokerError::Request(format!("{base} cannot carry a path")))?;
            path.clear().extend(segments);
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, url: &Url) -> Result<String, BrokerError> {
        let response = request
            .send()
            .await
            .map_err(|err| request_error(url, err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(BrokerError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response.text().await.map_err(|err| request_error(url, err))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &Url,
        auth: &BasicAuth,
    ) -> Result<T, BrokerError> {
        let request = self
            .http
            .get(url.clone())
            .basic_auth(&auth.username, Some(&auth.password));
        let body = self.send(request, url).await?;
        serde_json::from_str(&body).map_err(|err| BrokerError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })
    }

    /// Fetch every page of a monitor collection, following `nextPageUri`.
    async fn collect_pages<T: DeserializeOwned>(
        &self,
        first: Url,
        auth: &BasicAuth,
    ) -> Result<Vec<T>, BrokerError> {
        let mut items = Vec::new();
        let mut next = Some(first);
        let mut pages = 0;
        while let Some(url) = next.take() {
            pages += 1;
            if pages > MAX_PAGES {
                return Err(BrokerError::Decode {
                    url: url.to_string(),
                    reason: format!("paging did not terminate after {MAX_PAGES} pages"),
                });
            }
            let page: Collection<T> = self.get_json(&url, auth).await?;
            next = match page.next_page() {
                Some(uri) => Some(url.join(uri).map_err(|err| BrokerError::Decode {
                    url: url.to_string(),
                    reason: format!("invalid nextPageUri {uri}: {err}"),
                })?),
                None => None,
            };
            items.extend(page.data);
        }
        Ok(items)
    }

    fn vpn_query_url(
        &self,
        endpoint: &Endpoint,
        role: ReplicationRole,
        name_clause: &str,
    ) -> Result<Url, BrokerError> {
        let mut url = self.url(endpoint, &["SEMP", "v2", "monitor", "msgVpns"])?;
        url.query_pairs_mut().append_pair(
            "where",
            &format!(
                "enabled==true,replicationEnabled==true,replicationRole=={},{}",
                role.as_str(),
                name_clause
            ),
        );
        Ok(url)
    }
}

fn request_error(url: &Url, err: reqwest::Error) -> BrokerError {
    if err.is_builder() {
        BrokerError::Request(err.to_string())
    } else {
        BrokerError::Transport {
            url: url.to_string(),
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl MateStatusProbe for SempClient {
    async fn probe(&self, endpoint: &Endpoint, auth: &BasicAuth) -> Result<MateStatus, BrokerError> {
        let url = self.url(endpoint, &["SEMP"])?;
        let request = self
            .http
            .post(url.clone())
            .basic_auth(&auth.username, Some(&auth.password))
            .header(CONTENT_TYPE, "application/xml")
            .timeout(self.probe_timeout)
            .body(redundancy::REDUNDANCY_QUERY);
        let body = self.send(request, &url).await?;
        let status = redundancy::classify_reply(&body).map_err(|err| BrokerError::Decode {
            url: url.to_string(),
            reason: err.to_string(),
        })?;
        debug!(host = %endpoint.host, port = endpoint.port, status = %status, "redundancy status read");
        Ok(status)
    }
}

#[async_trait]
impl VpnRoleDirectory for SempClient {
    async fn list_vpns(
        &self,
        endpoint: &Endpoint,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError> {
        let url = self.vpn_query_url(endpoint, role, "msgVpnName!=#*")?;
        let entries: Vec<VpnEntry> = self.collect_pages(url, auth).await?;
        let vpns: Vec<String> = entries.into_iter().map(|entry| entry.name).collect();
        info!(
            host = %endpoint.host,
            port = endpoint.port,
            role = %role,
            count = vpns.len(),
            "vpns discovered"
        );
        Ok(vpns)
    }
}

#[async_trait]
impl RoleMutator for SempClient {
    async fn set_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<(), BrokerError> {
        let url = self.url(endpoint, &["SEMP", "v2", "config", "msgVpns", vpn])?;
        let request = self
            .http
            .patch(url.clone())
            .basic_auth(&auth.username, Some(&auth.password))
            .json(&serde_json::json!({ "replicationRole": role.as_str() }));
        self.send(request, &url).await?;
        info!(host = %endpoint.host, vpn, role = %role, "vpn role updated");
        Ok(())
    }

    async fn replication_backlog(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        auth: &BasicAuth,
    ) -> Result<Vec<String>, BrokerError> {
        let mut url = self.url(endpoint, &["SEMP", "v2", "monitor", "msgVpns", vpn, "queues"])?;
        url.query_pairs_mut()
            .append_pair("select", "queueName,txMsgRate")
            .append_pair(
                "where",
                &format!("queueName=={REPLICATION_QUEUE},txMsgRate>0"),
            );
        let queues: Vec<QueueEntry> = self.collect_pages(url, auth).await?;
        Ok(queues.into_iter().map(|queue| queue.queue_name).collect())
    }

    async fn has_role(
        &self,
        endpoint: &Endpoint,
        vpn: &str,
        role: ReplicationRole,
        auth: &BasicAuth,
    ) -> Result<bool, BrokerError> {
        let url = self.vpn_query_url(endpoint, role, &format!("msgVpnName=={vpn}"))?;
        let page: Collection<VpnEntry> = self.get_json(&url, auth).await?;
        Ok(page.data.iter().any(|entry| entry.name == vpn))
    }
}

#[async_trait]
impl BrokerAbout for SempClient {
    async fn about(&self, endpoint: &Endpoint, auth: &BasicAuth) -> Result<BrokerInfo, BrokerError> {
        let url = self.url(endpoint, &["SEMP", "v2", "monitor", "about"])?;
        let about: AboutEnvelope = self.get_json(&url, auth).await?;
        let api_uri = about.links.api_uri.ok_or_else(|| BrokerError::Decode {
            url: url.to_string(),
            reason: "missing links.apiUri".to_owned(),
        })?;
        let api_url = url.join(&api_uri).map_err(|err| BrokerError::Decode {
            url: url.to_string(),
            reason: format!("invalid links.apiUri {api_uri}: {err}"),
        })?;
        debug!(host = %endpoint.host, port = endpoint.port, api_uri = %api_url, "about resource retrieved");

        let api: AboutEnvelope = self.get_json(&api_url, auth).await?;
        Ok(BrokerInfo {
            platform: api.data.platform.unwrap_or_default(),
            semp_version: api.data.semp_version.unwrap_or_default(),
        })
    }
}
