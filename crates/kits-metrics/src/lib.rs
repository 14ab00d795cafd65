//! ---
//! dr_section: "05-observability"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Metrics collection and export utilities."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across the workspace.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let std_listener = StdTcpListener::bind(addr)
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    std_listener
        .set_nonblocking(true)
        .with_context(|| "failed to configure metrics listener as non-blocking")?;
    let bound = std_listener
        .local_addr()
        .with_context(|| "failed to read metrics listener address")?;
    let listener = TcpListener::from_std(std_listener)
        .with_context(|| "failed to convert std listener into tokio listener")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let service = app.into_make_service();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, service)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address, resolving port 0 to the actual port.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the failover control loop.
#[derive(Clone, Debug)]
pub struct DrMetrics {
    registry: SharedRegistry,
    probes: IntCounterVec,
    kit_evaluations: IntCounterVec,
    saga_steps: IntCounterVec,
    saga_step_seconds: HistogramVec,
    failovers: IntCounterVec,
    dns_changes: IntCounterVec,
    watchers_active: IntGauge,
}

impl DrMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let probes = IntCounterVec::new(
            Opts::new(
                "kits_dr_mate_probes_total",
                "Redundancy probes by kit, slot and outcome (active, standby, unreachable)",
            ),
            &["kit", "dc", "mate", "outcome"],
        )?;
        registry.register(Box::new(probes.clone()))?;

        let kit_evaluations = IntCounterVec::new(
            Opts::new(
                "kits_dr_kit_evaluations_total",
                "Kit evaluations by resulting mate health",
            ),
            &["kit", "health"],
        )?;
        registry.register(Box::new(kit_evaluations.clone()))?;

        let saga_steps = IntCounterVec::new(
            Opts::new(
                "kits_dr_saga_steps_total",
                "Failover saga step executions by step and outcome",
            ),
            &["step", "outcome"],
        )?;
        registry.register(Box::new(saga_steps.clone()))?;

        let buckets = prometheus::exponential_buckets(0.01, 2.0, 14)
            .context("failed to construct histogram buckets")?;
        let saga_step_seconds = HistogramVec::new(
            HistogramOpts::new(
                "kits_dr_saga_step_seconds",
                "Wall time spent in each failover saga step including retries",
            )
            .buckets(buckets),
            &["step"],
        )?;
        registry.register(Box::new(saga_step_seconds.clone()))?;

        let failovers = IntCounterVec::new(
            Opts::new(
                "kits_dr_failovers_total",
                "Completed or failed VPN failovers by kit, mode and outcome",
            ),
            &["kit", "mode", "outcome"],
        )?;
        registry.register(Box::new(failovers.clone()))?;

        let dns_changes = IntCounterVec::new(
            Opts::new(
                "kits_dr_dns_changes_total",
                "Watched-name address changes observed against their baseline",
            ),
            &["kit"],
        )?;
        registry.register(Box::new(dns_changes.clone()))?;

        let watchers_active = IntGauge::with_opts(Opts::new(
            "kits_dr_watchers_active",
            "DNS change detectors currently registered",
        ))?;
        registry.register(Box::new(watchers_active.clone()))?;

        Ok(Self {
            registry,
            probes,
            kit_evaluations,
            saga_steps,
            saga_step_seconds,
            failovers,
            dns_changes,
            watchers_active,
        })
    }

    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    pub fn record_probe(&self, kit: &str, dc: &str, mate: &str, outcome: &str) {
        self.probes
            .with_label_values(&[kit, dc, mate, outcome])
            .inc();
    }

    pub fn record_kit_health(&self, kit: &str, health: &str) {
        self.kit_evaluations.with_label_values(&[kit, health]).inc();
    }

    pub fn record_saga_step(&self, step: &str, outcome: &str, seconds: f64) {
        self.saga_steps.with_label_values(&[step, outcome]).inc();
        self.saga_step_seconds
            .with_label_values(&[step])
            .observe(seconds);
    }

    pub fn record_failover(&self, kit: &str, mode: &str, outcome: &str) {
        self.failovers.with_label_values(&[kit, mode, outcome]).inc();
    }

    pub fn record_dns_changes(&self, kit: &str, changed: usize) {
        self.dns_changes
            .with_label_values(&[kit])
            .inc_by(changed as u64);
    }

    pub fn set_watchers(&self, count: usize) {
        self.watchers_active.set(count as i64);
    }
}

pub use prometheus;
