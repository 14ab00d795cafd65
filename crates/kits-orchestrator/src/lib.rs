//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Failover control loop: kit controllers, detectors, saga, fleet."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
//! Failover control loop.
//!
//! [`FleetOrchestrator`] loads the topology and runs a [`KitDrController`]
//! per kit. Each controller registers one [`DnsChangeDetector`] per VPN in the
//! shared [`WatchRegistry`]; a detector that sees a cutover runs the
//! [`FailoverSaga`] for its VPN and ends.
#![warn(missing_docs)]

pub mod api_check;
pub mod controller;
pub mod detector;
pub mod fleet;
pub mod saga;
pub mod watch;

pub use api_check::{ApiCheck, ApiCheckError, MateApiInfo};
pub use controller::{KitDrController, KitError, KitOutcome, KitPlan};
pub use detector::{DetectorError, DnsChangeDetector, DnsWatchState, Observation, WatchOutcome};
pub use fleet::{FleetError, FleetOrchestrator, FleetReport, KitFailure};
pub use saga::{FailoverSaga, PartialState, SagaError, SagaReport, SagaStep, StepRecord};
pub use watch::{WatchError, WatchKey, WatchRegistry, WatchResult};
