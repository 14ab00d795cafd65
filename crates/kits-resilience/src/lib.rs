//! ---
//! dr_section: "03-resilience"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Retry policies and kit health classification."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Bounded retry with independent per-attempt timeouts, plus the mate health
//! classification used to pick the failover mode of a kit.

pub mod health;
pub mod policy;
pub mod retry;

pub use health::MateHealth;
pub use policy::RetryPolicy;
pub use retry::{retry, AttemptError, RetryError, RetryOutcome, Retryable};
