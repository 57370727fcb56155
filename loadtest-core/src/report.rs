//! Per-target outcome reporting.
//!
//! Every run ends in exactly one [`TargetOutcome`], handed to the batch's
//! [`RunReporter`]. The default reporter logs through `tracing`.

use crate::error::{error_chain, RunError, RunPhase};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Terminal result of one target's run.
#[derive(Debug)]
pub struct TargetOutcome {
    /// Target address.
    pub address: String,
    /// Position in the resolved target list.
    pub index: usize,
    /// Results file written for this target.
    pub results_file: PathBuf,
    /// Success, or the error that ended the run.
    pub result: Result<(), RunError>,
}

impl TargetOutcome {
    /// Returns true if the remote command completed successfully.
    pub fn success(&self) -> bool {
        self.result.is_ok()
    }

    /// Phase the run ended in.
    pub fn phase(&self) -> RunPhase {
        match &self.result {
            Ok(()) => RunPhase::Completed,
            Err(e) => e.phase(),
        }
    }
}

/// Receives run lifecycle events from concurrently running targets.
pub trait RunReporter: Send + Sync {
    /// A run for `address` was launched.
    fn launched(&self, _address: &str, _index: usize) {}

    /// A run terminated.
    fn finished(&self, outcome: &TargetOutcome);
}

/// Reporter that logs outcomes through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingReporter;

impl RunReporter for TracingReporter {
    fn launched(&self, address: &str, index: usize) {
        tracing::info!("Running loadtest on {} (target {})", address, index);
    }

    fn finished(&self, outcome: &TargetOutcome) {
        match &outcome.result {
            Ok(()) => tracing::info!(
                "Loadtest on {} completed, output in {}",
                outcome.address,
                outcome.results_file.display()
            ),
            Err(e) => tracing::error!(
                "Loadtest on {} failed ({}): {}",
                outcome.address,
                e.phase(),
                error_chain(e)
            ),
        }
    }
}

/// Reporter that keeps outcomes in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryReporter {
    launched: Arc<Mutex<Vec<String>>>,
    outcomes: Arc<Mutex<Vec<(String, RunPhase, Option<String>)>>>,
}

impl MemoryReporter {
    /// Create an empty reporter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses launched, in launch order.
    pub fn launched_addresses(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }

    /// Finished runs as (address, final phase, error message), in completion order.
    pub fn outcomes(&self) -> Vec<(String, RunPhase, Option<String>)> {
        self.outcomes.lock().unwrap().clone()
    }

    /// Addresses whose run failed.
    pub fn failed_addresses(&self) -> Vec<String> {
        self.outcomes()
            .into_iter()
            .filter(|(_, _, err)| err.is_some())
            .map(|(addr, _, _)| addr)
            .collect()
    }
}

impl RunReporter for MemoryReporter {
    fn launched(&self, address: &str, _index: usize) {
        self.launched.lock().unwrap().push(address.to_string());
    }

    fn finished(&self, outcome: &TargetOutcome) {
        let error = outcome.result.as_ref().err().map(|e| error_chain(e));
        self.outcomes
            .lock()
            .unwrap()
            .push((outcome.address.clone(), outcome.phase(), error));
    }
}
