//! ---
//! dr_section: "02-broker-interfaces"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Broker capability traits and SEMP client."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Redundancy-status reply parsing.
use kits_model::MateStatus;
use serde::Deserialize;

/// Legacy management request asking for the redundancy state.
pub const REDUNDANCY_QUERY: &str = "<rpc><show><redundancy/></show></rpc>";

const LOCAL_ACTIVE: &str = "Local Active";

#[derive(Debug, Default, Deserialize)]
struct RpcReply {
    #[serde(default)]
    rpc: Rpc,
}

#[derive(Debug, Default, Deserialize)]
struct Rpc {
    #[serde(default)]
    show: Show,
}

#[derive(Debug, Default, Deserialize)]
struct Show {
    #[serde(default)]
    redundancy: Redundancy,
}

#[derive(Debug, Default, Deserialize)]
struct Redundancy {
    #[serde(rename = "virtual-routers", default)]
    virtual_routers: VirtualRouters,
}

#[derive(Debug, Default, Deserialize)]
struct VirtualRouters {
    #[serde(default)]
    primary: Option<Router>,
    #[serde(default)]
    backup: Option<Router>,
}

#[derive(Debug, Default, Deserialize)]
struct Router {
    #[serde(default)]
    status: RouterStatus,
}

#[derive(Debug, Default, Deserialize)]
struct RouterStatus {
    #[serde(default)]
    activity: String,
}

impl Router {
    fn is_local_active(&self) -> bool {
        self.status.activity.trim() == LOCAL_ACTIVE
    }
}

/// Classify a redundancy reply. Active when either virtual router is locally active.
///
/// Malformed XML is an error. Missing elements read as not active.
pub fn classify_reply(body: &str) -> Result<MateStatus, quick_xml::DeError> {
    let reply: RpcReply = quick_xml::de::from_str(body)?;
    let routers = &reply.rpc.show.redundancy.virtual_routers;
    let active = [&routers.primary, &routers.backup]
        .into_iter()
        .flatten()
        .any(Router::is_local_active);
    Ok(if active {
        MateStatus::Active
    } else {
        MateStatus::Standby
    })
}
