//! ---
//! dr_section: "06-testing-qa"
//! dr_subsection: "tests"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Scrapes the metrics exporter over HTTP."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::net::SocketAddr;

use kits_metrics::{new_registry, spawn_http_server, DrMetrics};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn metrics_endpoint_serves_text_format() {
    let registry = new_registry();
    let metrics = DrMetrics::new(registry.clone()).unwrap();
    metrics.record_failover("alpha", "degraded", "ok");
    metrics.record_dns_changes("alpha", 2);

    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let server = spawn_http_server(registry, addr).unwrap();
    assert_ne!(server.addr().port(), 0);

    let url = format!("http://{}/metrics", server.addr());
    let response = reqwest::get(&url).await.unwrap();
    assert!(response.status().is_success());
    let body = response.text().await.unwrap();
    assert!(body.contains(r#"kits_dr_failovers_total{kit="alpha",mode="degraded",outcome="ok"} 1"#));
    assert!(body.contains(r#"kits_dr_dns_changes_total{kit="alpha"} 2"#));

    server.shutdown().await.unwrap();
}
