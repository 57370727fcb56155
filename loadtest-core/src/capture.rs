//! Per-target output capture.
//!
//! Every target writes standard output and standard error to its own results
//! file. The primary target may additionally mirror its standard output to a
//! live sink supplied by the caller (usually the terminal).

use crate::error::{error_chain, RunError};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// Name of the results directory inside the working directory.
pub const RESULTS_DIR: &str = "results";

/// Caller-supplied sink that receives the primary target's live output.
pub type LiveSink = Box<dyn AsyncWrite + Send + Unpin>;

/// Directory holding all per-target results files.
pub fn results_dir(working_dir: &Path) -> PathBuf {
    working_dir.join(RESULTS_DIR)
}

/// Whether `address` can name a results file without leaving the results
/// directory.
pub fn is_valid_results_name(address: &str) -> bool {
    !address.is_empty() && !address.contains(|c: char| matches!(c, '/' | '\\' | '\0'))
}

/// Results file for the target at `address`.
pub fn results_path(working_dir: &Path, address: &str) -> PathBuf {
    results_dir(working_dir).join(format!("loadtest-out-{}.txt", address))
}

/// Output sinks for one target's run.
pub struct OutputCapture {
    path: PathBuf,
    file: File,
    mirror: Option<LiveSink>,
}

impl fmt::Debug for OutputCapture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputCapture")
            .field("path", &self.path)
            .field("mirrored", &self.mirror.is_some())
            .finish_non_exhaustive()
    }
}

impl OutputCapture {
    /// Create (or truncate) the results file for `address`.
    ///
    /// Parent directories are created as needed, owner-only on Unix.
    /// Addresses containing path separators are rejected with
    /// `InvalidInput` before anything touches the filesystem.
    pub async fn create(
        working_dir: &Path,
        address: &str,
        mirror: Option<LiveSink>,
    ) -> std::io::Result<Self> {
        if !is_valid_results_name(address) {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("address {:?} cannot name a results file", address),
            ));
        }
        let path = results_path(working_dir, address);
        if let Some(parent) = path.parent() {
            create_private_dir_all(parent).await?;
        }
        let file = File::create(&path).await?;
        Ok(Self { path, file, mirror })
    }

    /// Path of the results file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether standard output is still being mirrored to a live sink.
    pub fn is_mirrored(&self) -> bool {
        self.mirror.is_some()
    }

    /// Write a chunk of the remote command's standard output.
    ///
    /// A failing live sink is detached with a warning; the results file keeps
    /// receiving output.
    pub async fn stdout(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await?;

        if let Some(mirror) = self.mirror.as_mut() {
            let mirrored = async {
                mirror.write_all(chunk).await?;
                mirror.flush().await
            }
            .await;
            if let Err(e) = mirrored {
                tracing::warn!(
                    "Live output sink failed, continuing with {} only: {}",
                    self.path.display(),
                    e
                );
                self.mirror = None;
            }
        }

        Ok(())
    }

    /// Write a chunk of the remote command's standard error.
    pub async fn stderr(&mut self, chunk: &[u8]) -> std::io::Result<()> {
        self.file.write_all(chunk).await
    }

    /// Append a failure note so the results file explains why the run stopped.
    pub async fn record_failure(&mut self, error: &RunError) -> std::io::Result<()> {
        let line = format!("\n[cluster-loadtest] run failed: {}\n", error_chain(error));
        self.file.write_all(line.as_bytes()).await
    }

    /// Flush the results file and the live sink.
    pub async fn finish(mut self) -> std::io::Result<()> {
        if let Some(mirror) = self.mirror.as_mut() {
            if let Err(e) = mirror.flush().await {
                tracing::warn!("Failed to flush live output sink: {}", e);
            }
        }
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

/// Create `path` and its parents, owner-only (0700) on Unix.
async fn create_private_dir_all(path: &Path) -> std::io::Result<()> {
    let mut builder = tokio::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(0o700);
    builder.create(path).await
}
