//! ---
//! dr_section: "04-orchestration"
//! dr_subsection: "module"
//! dr_type: "source"
//! dr_scope: "code"
//! dr_description: "Registry of running DNS change detectors."
//! dr_version: "v0.1.0"
//! dr_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use kits_metrics::DrMetrics;
use kits_model::{BasicAuth, FailoverTask};
use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::detector::{DetectorError, DnsChangeDetector, WatchOutcome};

/// Identifies one detector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct WatchKey {
    /// Kit name.
    pub kit: String,
    /// VPN name.
    pub vpn: String,
}

impl WatchKey {
    /// Key for `vpn` of `kit`.
    pub fn new(kit: impl Into<String>, vpn: impl Into<String>) -> Self {
        Self {
            kit: kit.into(),
            vpn: vpn.into(),
        }
    }

    /// Key of the detector watching `task`.
    pub fn for_task(task: &FailoverTask) -> Self {
        Self::new(task.kit(), task.vpn.clone())
    }
}

impl fmt::Display for WatchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kit, self.vpn)
    }
}

/// Errors raised by the registry.
#[derive(Debug, Error)]
pub enum WatchError {
    /// A live detector already owns the key.
    #[error("vpn {0} is already being watched")]
    AlreadyWatching(WatchKey),
    /// The detector ended with an error.
    #[error(transparent)]
    Detector(#[from] DetectorError),
    /// The detector task panicked or was aborted.
    #[error("watch task for {key} did not complete: {reason}")]
    Aborted {
        /// Detector key.
        key: WatchKey,
        /// Join failure.
        reason: String,
    },
}

/// Final result of one detector.
pub type WatchResult = Result<WatchOutcome, WatchError>;

#[derive(Debug)]
struct WatchSlot {
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<WatchOutcome, DetectorError>>,
}

/// Owns every spawned detector, keyed by (kit, vpn).
///
/// Clones share the same set of detectors.
#[derive(Debug, Clone, Default)]
pub struct WatchRegistry {
    slots: Arc<Mutex<HashMap<WatchKey, WatchSlot>>>,
    running: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    metrics: Option<DrMetrics>,
}

impl WatchRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the number of running detectors to `metrics`.
    pub fn with_metrics(mut self, metrics: DrMetrics) -> Self {
        metrics.set_watchers(self.running());
        self.metrics = Some(metrics);
        self
    }

    /// Start a detector for `task`.
    ///
    /// A key whose previous detector has already finished is reused; its
    /// result is discarded.
    pub fn spawn(
        &self,
        detector: Arc<DnsChangeDetector>,
        task: FailoverTask,
        auth: BasicAuth,
    ) -> Result<WatchKey, WatchError> {
        let key = WatchKey::for_task(&task);
        let mut slots = self.slots.lock();
        if let Some(existing) = slots.get(&key) {
            if !existing.task.is_finished() {
                return Err(WatchError::AlreadyWatching(key));
            }
            warn!(watch = %key, "replacing finished watch whose result was never collected");
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let count = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(metrics) = &self.metrics {
            metrics.set_watchers(count);
        }
        let guard = RunningGuard {
            running: self.running.clone(),
            idle: self.idle.clone(),
            metrics: self.metrics.clone(),
        };

        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let _running = guard;
            let result = detector.run(task, auth, stop_rx).await;
            match &result {
                Ok(WatchOutcome::FailedOver(report)) => info!(
                    kit = %task_key.kit,
                    vpn = %task_key.vpn,
                    promoted = %report.promoted,
                    "watch ended after failover"
                ),
                Ok(WatchOutcome::Stopped) => {
                    info!(kit = %task_key.kit, vpn = %task_key.vpn, "watch ended on stop signal")
                }
                Err(err) => error!(
                    kit = %task_key.kit,
                    vpn = %task_key.vpn,
                    error = %err,
                    "watch ended with failover error"
                ),
            }
            result
        });

        slots.insert(
            key.clone(),
            WatchSlot {
                stop: stop_tx,
                task: handle,
            },
        );
        Ok(key)
    }

    /// Signal the detector for `key` to stop. Returns false for unknown keys.
    pub fn stop(&self, key: &WatchKey) -> bool {
        match self.slots.lock().get(key) {
            Some(slot) => {
                let _ = slot.stop.send(true);
                true
            }
            None => false,
        }
    }

    /// Signal every detector of `kit` to stop. Returns how many were signalled.
    pub fn stop_kit(&self, kit: &str) -> usize {
        let slots = self.slots.lock();
        let mut signalled = 0;
        for (key, slot) in slots.iter() {
            if key.kit == kit {
                let _ = slot.stop.send(true);
                signalled += 1;
            }
        }
        signalled
    }

    /// Signal every detector to stop. Returns how many were signalled.
    pub fn stop_all(&self) -> usize {
        let slots = self.slots.lock();
        for slot in slots.values() {
            let _ = slot.stop.send(true);
        }
        slots.len()
    }

    /// Wait for the detector of `key` and remove it from the registry.
    pub async fn join(&self, key: &WatchKey) -> Option<WatchResult> {
        let slot = self.slots.lock().remove(key)?;
        Some(collect(key.clone(), slot).await)
    }

    /// Wait for every registered detector and clear the registry.
    ///
    /// Results are ordered by key.
    pub async fn join_all(&self) -> Vec<(WatchKey, WatchResult)> {
        let mut drained: Vec<(WatchKey, WatchSlot)> = self.slots.lock().drain().collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        let mut results = Vec::with_capacity(drained.len());
        for (key, slot) in drained {
            let result = collect(key.clone(), slot).await;
            results.push((key, result));
        }
        results
    }

    /// Registered keys, sorted.
    pub fn keys(&self) -> Vec<WatchKey> {
        let mut keys: Vec<WatchKey> = self.slots.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Whether `key` is registered.
    pub fn contains(&self, key: &WatchKey) -> bool {
        self.slots.lock().contains_key(key)
    }

    /// Registered detectors, finished or not.
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Whether nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Detectors still polling or failing over.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Resolve once no detector is running. Returns immediately when idle.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.running() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Releases one running slot when the detector task ends, including by panic or abort.
struct RunningGuard {
    running: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    metrics: Option<DrMetrics>,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        let remaining = self.running.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        if let Some(metrics) = &self.metrics {
            metrics.set_watchers(remaining);
        }
        if remaining == 0 {
            self.idle.notify_waiters();
        }
    }
}

async fn collect(key: WatchKey, slot: WatchSlot) -> WatchResult {
    match slot.task.await {
        Ok(result) => result.map_err(WatchError::from),
        Err(join_err) => {
            warn!(watch = %key, error = %join_err, "watch join error");
            Err(WatchError::Aborted {
                key,
                reason: join_err.to_string(),
            })
        }
    }
}
