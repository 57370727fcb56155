//! Error types for cluster load-test dispatch.

use crate::executor::ExecError;
use crate::payload::PayloadError;
use crate::target::TargetError;
use std::path::PathBuf;

/// Errors that abort a whole batch before any target is contacted.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Target list could not be resolved.
    #[error("unable to get loadtest instance addresses")]
    Targets(#[from] TargetError),

    /// Target list resolved to nothing.
    #[error("unable to get loadtest instance addresses: no instances found")]
    NoTargets,

    /// Configuration payload could not be loaded.
    #[error("failed to load config file {location}")]
    Payload {
        /// Requested location (path or URL).
        location: String,
        /// Underlying loader error.
        source: PayloadError,
    },
}

/// Step of a per-target run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    /// Creating the local results file.
    Preparing,
    /// Establishing the connection.
    Connecting,
    /// Opening a command session.
    OpeningSession,
    /// Uploading the configuration payload.
    Uploading,
    /// Running the remote command.
    Running,
    /// Remote command exited successfully.
    Completed,
    /// The run stopped without reporting where (its task panicked).
    Unknown,
}

impl std::fmt::Display for RunPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunPhase::Preparing => write!(f, "preparing"),
            RunPhase::Connecting => write!(f, "connecting"),
            RunPhase::OpeningSession => write!(f, "opening session"),
            RunPhase::Uploading => write!(f, "uploading"),
            RunPhase::Running => write!(f, "running"),
            RunPhase::Completed => write!(f, "completed"),
            RunPhase::Unknown => write!(f, "unknown phase"),
        }
    }
}

/// Errors isolated to a single target's run.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// Results directory or file could not be created.
    #[error("unable to create loadtest results file {path}")]
    ResultsFile {
        /// Results file path.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Connection to the target failed.
    #[error("unable to connect to loadtest instance")]
    Connect(#[source] ExecError),

    /// Command session could not be opened.
    #[error("unable to create session")]
    Session(#[source] ExecError),

    /// Configuration payload upload failed.
    #[error("failed to upload config file")]
    Upload(#[source] ExecError),

    /// Remote command failed or the connection dropped mid-run.
    #[error("loadtest command failed")]
    Run(#[source] ExecError),

    /// Captured output could not be flushed to the results file.
    #[error("failed to write loadtest results")]
    Capture(#[source] std::io::Error),

    /// The run's task panicked.
    #[error("loadtest run panicked: {0}")]
    Panicked(String),
}

impl RunError {
    /// Phase the run was in when it failed.
    pub fn phase(&self) -> RunPhase {
        match self {
            RunError::ResultsFile { .. } => RunPhase::Preparing,
            RunError::Connect(_) => RunPhase::Connecting,
            RunError::Session(_) => RunPhase::OpeningSession,
            RunError::Upload(_) => RunPhase::Uploading,
            RunError::Run(_) | RunError::Capture(_) => RunPhase::Running,
            RunError::Panicked(_) => RunPhase::Unknown,
        }
    }
}

/// Render an error and its `source()` chain on one line, outermost first.
///
/// Variant messages never repeat their source, so this is how the full
/// cause reaches results files and logs.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut line = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        line.push_str(": ");
        line.push_str(&cause.to_string());
        source = cause.source();
    }
    line
}

/// Result type alias for batch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
