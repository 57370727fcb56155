//! # cluster-loadtest-core
//!
//! Runs a load-test workload across every machine of a provisioned cluster.
//!
//! This crate:
//! - Resolves the ordered list of load-test instances
//! - Loads an optional config payload once, from a path or URL
//! - Launches one run per instance, staggered to avoid a thundering herd
//! - Captures each instance's output to `results/loadtest-out-<addr>.txt`
//! - Mirrors the first instance's output live to the caller
//! - Waits for every run; one instance failing never affects the others
//!
//! ## Architecture
//!
//! ```text
//!              ┌──────────────┐
//!  targets ───►│  Dispatcher  │◄─── payload (path | URL)
//!              └──────┬───────┘
//!        spawn, sleep(stagger), spawn, ...
//!         ┌───────────┼───────────┐
//!         ▼           ▼           ▼
//!      run(A)       run(B)      run(C)     connect → session → upload → run → close
//!         │           │           │
//!   results/A.txt  results/B.txt  results/C.txt
//!   + live sink
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capture;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod payload;
pub mod report;
pub mod target;

pub use capture::{results_dir, results_path, LiveSink, OutputCapture};
pub use config::{Config, ConfigError, TargetSource};
pub use dispatch::{BatchReport, DispatchSettings, Dispatcher, LoadtestOptions};
pub use error::{error_chain, DispatchError, RunError, RunPhase};
pub use executor::{
    Credential, ExecError, MockExecutor, MockScript, RemoteConnection, RemoteExecutor,
    RemoteSession, SshExecutor, SshOptions,
};
pub use payload::{FileOrUrlLoader, PayloadError, PayloadLoader};
pub use report::{MemoryReporter, RunReporter, TargetOutcome, TracingReporter};
pub use target::{StaticTargets, TargetDirectory, TargetError, TerraformOutputs};
