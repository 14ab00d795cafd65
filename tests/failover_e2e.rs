//! ---
//! dr_section: "06-testing-qa"
//! dr_subsection: "tests"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "End-to-end fleet failover against in-process broker stubs."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fs;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use kits_broker::{BrokerApi, SempClient};
use kits_common::{BaselinePolicy, BrokerScheme, DnsConfig, FailoverPolicies};
use kits_dns::StaticResolver;
use kits_model::{BasicAuth, Datacenter, MateId};
use kits_orchestrator::{
    ApiCheck, DnsChangeDetector, FailoverSaga, FleetOrchestrator, KitDrController, SagaStep,
    WatchOutcome, WatchRegistry,
};
use kits_resilience::RetryPolicy;
use kits_topology::{TopologyLoader, TopologySource};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::{sleep, timeout};

/// One simulated broker: redundancy activity plus per-VPN replication roles.
struct StubBroker {
    activity: &'static str,
    roles: Mutex<HashMap<String, String>>,
}

impl StubBroker {
    fn role(&self, vpn: &str) -> Option<String> {
        self.roles.lock().get(vpn).cloned()
    }
}

async fn redundancy(State(stub): State<Arc<StubBroker>>) -> Response {
    format!(
        "<rpc-reply><rpc><show><redundancy><virtual-routers>\
         <primary><status><activity>{}</activity></status></primary>\
         </virtual-routers></redundancy></show></rpc></rpc-reply>",
        stub.activity
    )
    .into_response()
}

async fn msg_vpns(
    State(stub): State<Arc<StubBroker>>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let filter = params.get("where").cloned().unwrap_or_default();
    let role = filter
        .split(',')
        .find_map(|clause| clause.strip_prefix("replicationRole=="))
        .unwrap_or_default()
        .to_owned();
    let exact = filter
        .split(',')
        .find_map(|clause| clause.strip_prefix("msgVpnName=="))
        .map(str::to_owned);
    let mut names: Vec<String> = stub
        .roles
        .lock()
        .iter()
        .filter(|(name, vpn_role)| {
            **vpn_role == role && exact.as_deref().map_or(true, |wanted| wanted == name.as_str())
        })
        .map(|(name, _)| name.clone())
        .collect();
    names.sort();
    let data: Vec<Value> = names.iter().map(|name| json!({"msgVpnName": name})).collect();
    Json(json!({"data": data, "meta": {"responseCode": 200}})).into_response()
}

async fn patch_vpn(
    State(stub): State<Arc<StubBroker>>,
    Path(vpn): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    if let Some(role) = body.get("replicationRole").and_then(Value::as_str) {
        stub.roles.lock().insert(vpn, role.to_owned());
    }
    Json(json!({"meta": {"responseCode": 200}})).into_response()
}

async fn queues() -> Response {
    Json(json!({"data": [], "meta": {"responseCode": 200}})).into_response()
}

async fn about() -> Response {
    Json(json!({"data": {}, "links": {"apiUri": "/SEMP/v2/monitor/about/api"}})).into_response()
}

async fn about_api() -> Response {
    Json(json!({"data": {"platform": "VMR", "sempVersion": "2.40"}})).into_response()
}

async fn spawn_stub(activity: &'static str, roles: &[(&str, &str)]) -> (u16, Arc<StubBroker>) {
    let stub = Arc::new(StubBroker {
        activity,
        roles: Mutex::new(
            roles
                .iter()
                .map(|(vpn, role)| (vpn.to_string(), role.to_string()))
                .collect(),
        ),
    });
    let app = Router::new()
        .route("/SEMP", post(redundancy))
        .route("/SEMP/v2/monitor/msgVpns", get(msg_vpns))
        .route("/SEMP/v2/config/msgVpns/:vpn", patch(patch_vpn))
        .route("/SEMP/v2/monitor/msgVpns/:vpn/queues", get(queues))
        .route("/SEMP/v2/monitor/about", get(about))
        .route("/SEMP/v2/monitor/about/api", get(about_api))
        .with_state(stub.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app.into_make_service()).await.unwrap();
    });
    (port, stub)
}

struct Site {
    stubs: [Arc<StubBroker>; 4],
    _dir: tempfile::TempDir,
    resolver: Arc<StaticResolver>,
    registry: WatchRegistry,
    fleet: FleetOrchestrator,
    broker: Arc<dyn BrokerApi>,
}

fn quick(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::flat(max_attempts, Duration::from_millis(10), Duration::from_secs(5))
}

/// Kit `alpha` with `orders` active in dc1 and standby in dc2.
async fn site() -> Site {
    let (p1, dc1m1) = spawn_stub("Local Active", &[("orders", "active")]).await;
    let (p2, dc1m2) = spawn_stub("Mate Active", &[]).await;
    let (p3, dc2m1) = spawn_stub("Local Active", &[("orders", "standby")]).await;
    let (p4, dc2m2) = spawn_stub("Mate Active", &[]).await;

    let dir = tempfile::tempdir().unwrap();
    let descriptor = dir.path().join("kits.yaml");
    fs::write(
        &descriptor,
        format!(
            "kits:\n  alpha:\n    dc1:\n      mate1: {{host: 127.0.0.1, port: {p1}}}\n      \
             mate2: {{host: 127.0.0.1, port: {p2}}}\n    dc2:\n      \
             mate1: {{host: 127.0.0.1, port: {p3}}}\n      mate2: {{host: 127.0.0.1, port: {p4}}}\n"
        ),
    )
    .unwrap();
    let topology = TopologyLoader::new(TopologySource::Path(descriptor), "kits.yaml");

    let client = SempClient::new(BrokerScheme::Http, Duration::from_secs(5), Duration::from_secs(5))
        .unwrap();
    let broker: Arc<dyn BrokerApi> = Arc::new(client);
    let saga = Arc::new(FailoverSaga::new(
        broker.clone(),
        FailoverPolicies {
            demote: quick(3),
            drain: quick(3),
            verify_standby: quick(3),
            promote: quick(3),
            validate: quick(3),
        },
    ));

    let resolver = Arc::new(StaticResolver::new());
    let dns = DnsConfig {
        poll_interval: Duration::from_millis(20),
        baseline_policy: BaselinePolicy::Latched,
        ..DnsConfig::default()
    };
    let detector = Arc::new(DnsChangeDetector::new(resolver.clone(), saga, dns));
    let registry = WatchRegistry::new();
    let controller = Arc::new(KitDrController::new(
        broker.clone(),
        detector,
        registry.clone(),
        quick(2),
    ));
    let fleet = FleetOrchestrator::new(Arc::new(topology), controller, quick(2));

    Site {
        stubs: [dc1m1, dc1m2, dc2m1, dc2m2],
        _dir: dir,
        resolver,
        registry,
        fleet,
        broker,
    }
}

fn auth() -> BasicAuth {
    BasicAuth::new("admin", "secret")
}

fn ip(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dns_cutover_promotes_the_standby_datacenter() {
    let site = site().await;
    site.resolver.set("orders-solace-a.local", ip("10.1.0.10"));
    site.resolver.set("orders-solace-b.local", ip("10.1.0.11"));

    let report = site.fleet.run(None, &auth()).await.unwrap();
    assert_eq!(report.kits.len(), 1);
    assert_eq!(report.kits[0].kit, "alpha");
    assert_eq!(report.watched(), 1);
    assert_eq!(report.active.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(site.registry.len(), 1);

    sleep(Duration::from_millis(150)).await;
    assert_eq!(site.stubs[0].role("orders").as_deref(), Some("active"));

    site.resolver.set("orders-solace-a.local", ip("10.2.0.10"));
    site.resolver.set("orders-solace-b.local", ip("10.2.0.11"));
    timeout(Duration::from_secs(10), site.registry.wait_idle())
        .await
        .expect("detector fires and the failover finishes");

    let results = site.registry.join_all().await;
    assert_eq!(results.len(), 1);
    let report = match &results[0].1 {
        Ok(WatchOutcome::FailedOver(report)) => report.clone(),
        other => panic!("unexpected watch result: {other:?}"),
    };
    assert_eq!(report.vpn, "orders");
    assert!(!report.degraded);
    assert_eq!(report.promoted.dc, Datacenter::Dc2);
    assert_eq!(report.promoted.mate, MateId::Mate1);
    assert_eq!(
        report.step_names(),
        vec![
            SagaStep::DemoteActive,
            SagaStep::DrainWait,
            SagaStep::VerifyStandbyIsStandby,
            SagaStep::PromoteStandby,
            SagaStep::ValidateFinal,
        ]
    );

    assert_eq!(site.stubs[0].role("orders").as_deref(), Some("standby"));
    assert_eq!(site.stubs[2].role("orders").as_deref(), Some("active"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn partial_dns_change_keeps_roles_and_stops_cleanly() {
    let site = site().await;
    site.resolver.set("orders-solace-a.local", ip("10.1.0.10"));
    site.resolver.set("orders-solace-b.local", ip("10.1.0.11"));

    site.fleet.run(Some("alp"), &auth()).await.unwrap();
    sleep(Duration::from_millis(100)).await;
    site.resolver.set("orders-solace-a.local", ip("10.2.0.10"));
    sleep(Duration::from_millis(150)).await;
    assert_eq!(site.registry.running(), 1);

    assert_eq!(site.registry.stop_all(), 1);
    let results = site.registry.join_all().await;
    assert!(matches!(results[0].1, Ok(WatchOutcome::Stopped)));
    assert_eq!(site.stubs[0].role("orders").as_deref(), Some("active"));
    assert_eq!(site.stubs[2].role("orders").as_deref(), Some("standby"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn api_check_reports_every_mate() {
    let site = site().await;
    let kits = site.fleet.load_kits(None).await.unwrap();
    assert_eq!(kits.len(), 1);

    let check = ApiCheck::new(site.broker.clone(), quick(2));
    let infos = check.check_fleet(&kits, &auth()).await.unwrap();
    assert_eq!(infos.len(), 4);
    assert!(infos
        .iter()
        .all(|info| info.platform == "VMR" && info.semp_version == "2.40"));
    let ports: Vec<u16> = kits[0].mates().iter().map(|mate| mate.endpoint.port).collect();
    assert_eq!(
        infos.iter().map(|info| info.port).collect::<Vec<_>>(),
        ports
    );
}
