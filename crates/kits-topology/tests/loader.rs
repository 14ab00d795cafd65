//! ---
//! dr_section: "06-testing-qa"
//! dr_subsection: "tests"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Topology loader tests against archives on disk and over HTTP."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::io::Write;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use flate2::write::GzEncoder;
use flate2::Compression;
use kits_resilience::Retryable;
use kits_topology::{TopologyError, TopologyLoader, TopologyProvider, TopologySource};

const DESCRIPTOR: &str = r#"
kits:
  alpha:
    dc1:
      mate1: { host: a1a.example, port: 943 }
      mate2: { host: a1b.example, port: 943 }
    dc2:
      mate1: { host: a2a.example, port: 943 }
      mate2: { host: a2b.example, port: 943 }
  beta:
    dc1:
      mate1: { host: b1a.example, port: 943 }
      mate2: { host: b1b.example, port: 943 }
    dc2:
      mate1: { host: b2a.example, port: 943 }
      mate2: { host: b2b.example, port: 943 }
"#;

fn archive(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, body) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, path, body.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn write_temp(bytes: &[u8], suffix: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn loads_first_matching_entry_from_archive() {
    let bytes = archive(&[
        ("bundle/README.md", "not yaml"),
        ("bundle/config/kits.yaml", DESCRIPTOR),
        ("bundle/other/kits.yaml", "kits: {}"),
    ]);
    let file = write_temp(&bytes, ".tgz");
    let loader = TopologyLoader::new(TopologySource::Path(file.path().into()), "kits.yaml");

    let kits = loader.load_kits(None).await.unwrap();
    assert_eq!(kits.len(), 2);
    assert_eq!(kits[0].name, "alpha");
    assert_eq!(kits[1].dc1.mate2.host, "b1b.example");

    let filtered = loader.load_kits(Some("bet")).await.unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].name, "beta");
}

#[tokio::test]
async fn missing_descriptor_is_permanent() {
    let bytes = archive(&[("bundle/README.md", "hello")]);
    let file = write_temp(&bytes, ".tar.gz");
    let loader = TopologyLoader::new(TopologySource::Path(file.path().into()), "kits.yaml");

    let err = loader.load_kits(None).await.unwrap_err();
    assert_eq!(err, TopologyError::DescriptorMissing("kits.yaml".into()));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn plain_yaml_path_is_read_directly() {
    let file = write_temp(DESCRIPTOR.as_bytes(), ".yaml");
    let loader = TopologyLoader::new(TopologySource::Path(file.path().into()), "kits.yaml");
    let kits = loader.load_kits(Some("alpha")).await.unwrap();
    assert_eq!(kits.len(), 1);
    assert_eq!(kits[0].dc2.mate1.port, 943);
}

#[tokio::test]
async fn downloads_archive_over_http() {
    let bytes = archive(&[("kits.yaml", DESCRIPTOR)]);
    let base = serve(Router::new().route(
        "/topology.tgz",
        get(move || {
            let bytes = bytes.clone();
            async move { bytes }
        }),
    ))
    .await;

    let loader = TopologyLoader::new(
        TopologySource::Url(format!("{base}/topology.tgz")),
        "kits.yaml",
    );
    let kits = loader.load_kits(None).await.unwrap();
    assert_eq!(kits.len(), 2);
}

#[tokio::test]
async fn non_200_download_fails_with_status() {
    let base = serve(Router::new().route(
        "/topology.tgz",
        get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
    ))
    .await;

    let loader = TopologyLoader::new(
        TopologySource::Url(format!("{base}/topology.tgz")),
        "kits.yaml",
    );
    let err = loader.load_kits(None).await.unwrap_err();
    assert!(matches!(err, TopologyError::Status { status: 503, .. }));
    assert!(err.is_retryable());
}

#[tokio::test]
async fn not_found_download_is_permanent() {
    let base = serve(Router::new()).await;
    let loader = TopologyLoader::new(
        TopologySource::Url(format!("{base}/missing.tgz")),
        "kits.yaml",
    );
    let err = loader.load_kits(None).await.unwrap_err();
    assert!(matches!(err, TopologyError::Status { status: 404, .. }));
    assert!(!err.is_retryable());
}
