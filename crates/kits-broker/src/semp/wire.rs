//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use serde::Deserialize;

/// Collection envelope returned by the v2 monitor API.
#[derive(Debug, Deserialize)]
pub(crate) struct Collection<T> {
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
    #[serde(default)]
    pub meta: Option<Meta>,
}

impl<T> Collection<T> {
    pub fn next_page(&self) -> Option<&str> {
        self.meta
            .as_ref()
            .and_then(|meta| meta.paging.as_ref())
            .and_then(|paging| paging.next_page_uri.as_deref())
    }
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Meta {
    #[serde(default)]
    pub paging: Option<Paging>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Paging {
    #[serde(rename = "nextPageUri", default)]
    pub next_page_uri: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct VpnEntry {
    #[serde(rename = "msgVpnName")]
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueueEntry {
    #[serde(rename = "queueName")]
    pub queue_name: String,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AboutEnvelope {
    #[serde(default)]
    pub data: AboutData,
    #[serde(default)]
    pub links: AboutLinks,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AboutData {
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(rename = "sempVersion", default)]
    pub semp_version: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct AboutLinks {
    #[serde(rename = "apiUri", default)]
    pub api_uri: Option<String>,
}
