//! ---
//! dr_section: "01-core-functionality"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Shared configuration and logging for the DR worker."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Shared runtime plumbing for the kits DR workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the orchestrator and the worker binary.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BaselinePolicy, BrokerConfig, BrokerScheme, DnsConfig, FailoverPolicies,
    FleetConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, TopologyConfig,
};
pub use logging::{init_tracing, LogFormat};
