//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "binary"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Binary entrypoint for the DR worker."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
mod sides;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use kits_broker::{BrokerApi, SempClient};
use kits_common::{init_tracing, AppConfig};
use kits_dns::SystemResolver;
use kits_metrics::{new_registry, spawn_http_server, DrMetrics, MetricsServer};
use kits_model::BasicAuth;
use kits_orchestrator::{
    ApiCheck, DnsChangeDetector, FailoverSaga, FleetOrchestrator, KitDrController, WatchOutcome,
    WatchRegistry,
};
use kits_topology::TopologyLoader;
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};

use crate::sides::SideArg;

#[derive(Debug, Parser)]
#[command(author, version, about = "Kits DR failover worker", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", global = true, help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Evaluate every kit and watch its VPNs until they fail over or ctrl-c")]
    Fleet {
        #[arg(long, help = "Substring filter on kit names; overrides topology.filter")]
        filter: Option<String>,
    },
    #[command(about = "Evaluate one kit by exact name and watch its VPNs")]
    Kit {
        name: String,
        #[arg(long, help = "Print the failover plan without starting any watch")]
        dry_run: bool,
    },
    #[command(about = "Watch one VPN for a DNS cutover")]
    Watch(SidesArgs),
    #[command(about = "Fail one VPN over immediately")]
    Failover(SidesArgs),
    #[command(about = "Check the management API of every mate")]
    ApiCheck {
        #[arg(long, help = "Substring filter on kit names; overrides topology.filter")]
        filter: Option<String>,
    },
}

#[derive(Debug, clap::Args)]
struct SidesArgs {
    #[arg(long)]
    kit: String,
    #[arg(long)]
    vpn: String,
    #[arg(long, value_name = "DC:MATE:HOST:PORT", help = "Side promoted to active")]
    standby: SideArg,
    #[arg(
        long,
        value_name = "DC:MATE:HOST:PORT",
        help = "Side demoted to standby; omit for degraded mode"
    )]
    active: Option<SideArg>,
}

struct Worker {
    config: AppConfig,
    auth: BasicAuth,
    broker: Arc<dyn BrokerApi>,
    saga: Arc<FailoverSaga>,
    detector: Arc<DnsChangeDetector>,
    registry: WatchRegistry,
}

impl Worker {
    fn build(config: AppConfig, metrics: Option<DrMetrics>) -> Result<Self> {
        let client = SempClient::from_config(&config.broker).context("failed to build broker client")?;
        let broker: Arc<dyn BrokerApi> = Arc::new(client);
        let resolver = Arc::new(SystemResolver::from_config(&config.dns));

        let mut saga = FailoverSaga::new(broker.clone(), config.failover.clone());
        let mut registry = WatchRegistry::new();
        if let Some(metrics) = &metrics {
            saga = saga.with_metrics(metrics.clone());
            registry = registry.with_metrics(metrics.clone());
        }
        let saga = Arc::new(saga);
        let mut detector = DnsChangeDetector::new(resolver, saga.clone(), config.dns.clone());
        if let Some(metrics) = &metrics {
            detector = detector.with_metrics(metrics.clone());
        }

        Ok(Self {
            auth: config.broker.credentials(),
            config,
            broker,
            saga,
            detector: Arc::new(detector),
            registry,
        })
    }

    fn fleet(&self, metrics: Option<DrMetrics>) -> Result<FleetOrchestrator> {
        let topology = TopologyLoader::from_config(&self.config.topology)?;
        let mut controller = KitDrController::new(
            self.broker.clone(),
            self.detector.clone(),
            self.registry.clone(),
            self.config.discovery,
        );
        if let Some(metrics) = metrics {
            controller = controller.with_metrics(metrics);
        }
        Ok(
            FleetOrchestrator::new(Arc::new(topology), Arc::new(controller), self.config.topology.retry)
                .with_fail_fast(self.config.fleet.fail_fast),
        )
    }

    fn filter<'a>(&'a self, flag: &'a Option<String>) -> Option<&'a str> {
        flag.as_deref().or(self.config.topology.filter.as_deref())
    }

    /// Wait for every watch to end or for ctrl-c, then collect the results.
    async fn supervise(&self) -> Result<()> {
        if self.registry.is_empty() {
            info!("no watches registered; exiting");
            return Ok(());
        }
        info!(watches = self.registry.len(), "watching; press ctrl-c to stop");
        tokio::select! {
            _ = self.registry.wait_idle() => info!("all watches ended"),
            interrupted = signal::ctrl_c() => {
                interrupted.context("failed to listen for ctrl-c")?;
                info!(stopped = self.registry.stop_all(), "ctrl-c received; stopping watches");
            }
        }

        let mut failed = 0;
        for (key, result) in self.registry.join_all().await {
            match result {
                Ok(WatchOutcome::FailedOver(report)) => print_json(&report)?,
                Ok(WatchOutcome::Stopped) => {}
                Err(err) => {
                    failed += 1;
                    error!(watch = %key, error = %err, "watch failed");
                }
            }
        }
        if failed > 0 {
            bail!("{} watch(es) ended with a failed failover", failed);
        }
        Ok(())
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let loaded = AppConfig::load_with_source(cli.config.as_deref(), &[AppConfig::DEFAULT_PATH])?;
    let config = loaded.config;
    init_tracing("kits-worker", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => warn!("no configuration file found; using defaults"),
    }

    let (metrics, metrics_server) = start_metrics(&config)?;
    let worker = Worker::build(config, metrics.clone())?;
    let result = run(&worker, cli.command, metrics).await;

    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    result
}

fn start_metrics(config: &AppConfig) -> Result<(Option<DrMetrics>, Option<MetricsServer>)> {
    if !config.metrics.enabled {
        info!("metrics exporter disabled by configuration");
        return Ok((None, None));
    }
    let registry = new_registry();
    let metrics = DrMetrics::new(registry.clone())?;
    let server = spawn_http_server(registry, config.metrics.listen)?;
    info!(address = %server.addr(), "metrics exporter enabled");
    Ok((Some(metrics), Some(server)))
}

async fn run(worker: &Worker, command: Commands, metrics: Option<DrMetrics>) -> Result<()> {
    match command {
        Commands::Fleet { filter } => {
            let fleet = worker.fleet(metrics)?;
            let report = fleet.run(worker.filter(&filter), &worker.auth).await?;
            print_json(&report)?;
            worker.supervise().await
        }
        Commands::Kit { name, dry_run } => {
            let fleet = worker.fleet(metrics)?;
            if dry_run {
                let kit = fleet
                    .load_kits(Some(&name))
                    .await?
                    .into_iter()
                    .find(|kit| kit.name == name)
                    .with_context(|| format!("kit {} not found in topology", name))?;
                let plan = fleet.controller().plan(&kit, &worker.auth).await?;
                return print_json(&plan);
            }
            let outcome = fleet.run_single_kit(&name, &worker.auth).await?;
            print_json(&outcome)?;
            worker.supervise().await
        }
        Commands::Watch(args) => {
            let task = sides::task(&args.kit, &args.vpn, args.active, args.standby);
            let key = worker
                .registry
                .spawn(worker.detector.clone(), task, worker.auth.clone())?;
            info!(watch = %key, "watch started");
            worker.supervise().await
        }
        Commands::Failover(args) => {
            let task = sides::task(&args.kit, &args.vpn, args.active, args.standby);
            let report = worker.saga.run(&task, &worker.auth).await?;
            print_json(&report)
        }
        Commands::ApiCheck { filter } => {
            let fleet = worker.fleet(None)?;
            let kits = fleet.load_kits(worker.filter(&filter)).await?;
            let check = ApiCheck::new(worker.broker.clone(), worker.config.api_check);
            let infos = check.check_fleet(&kits, &worker.auth).await?;
            print_json(&infos)
        }
    }
}
