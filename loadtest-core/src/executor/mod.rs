//! Remote execution abstraction.
//!
//! The dispatcher drives each target through the same connection lifecycle:
//! - `connect()` authenticates against the target with the cluster credential
//! - `open_session()` opens a command session on that connection
//! - `upload_bytes()` places the load-test config payload on the target
//! - `run()` executes the remote command, streaming output into a capture
//! - `close()` releases the session, then the connection
//!
//! # Example
//!
//! ```ignore
//! let executor = MockExecutor::new();
//! let mut conn = executor.connect(&credential, "10.0.0.1").await?;
//! let mut session = conn.open_session().await?;
//! session.run("uptime", &mut capture).await?;
//! session.close().await?;
//! conn.close().await?;
//! ```

mod mock;
mod ssh;

pub use mock::{MockExecutor, MockScript};
pub use ssh::{SshExecutor, SshOptions};

use crate::capture::OutputCapture;
use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

/// Remote execution errors.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Local process spawn or stream I/O failed.
    #[error("local I/O failed")]
    Io(#[from] std::io::Error),

    /// Connection to the target could not be established.
    #[error("connection to {host} failed: {detail}")]
    ConnectionFailed {
        /// Target address.
        host: String,
        /// Error detail (usually ssh stderr).
        detail: String,
    },

    /// Session could not be opened on an established connection.
    #[error("session failed: {0}")]
    SessionFailed(String),

    /// File upload failed.
    #[error("upload to {remote_path} failed: {detail}")]
    UploadFailed {
        /// Destination path on the target.
        remote_path: String,
        /// Error detail.
        detail: String,
    },

    /// Remote command returned a non-zero exit status.
    #[error("remote command exited with status {exit_code}")]
    CommandFailed {
        /// Exit code, or -1 when the process was killed by a signal.
        exit_code: i32,
    },

    /// Connection dropped while the remote command was running.
    #[error("connection lost: {0}")]
    ConnectionLost(String),
}

/// Shared identity used to authenticate against every cluster member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Remote login user.
    pub user: String,
    /// Path to the private key.
    pub private_key: PathBuf,
}

impl Credential {
    /// Create a credential for `user` authenticated with the key at `private_key`.
    pub fn new(user: impl Into<String>, private_key: impl Into<PathBuf>) -> Self {
        Self {
            user: user.into(),
            private_key: private_key.into(),
        }
    }
}

/// Opens authenticated connections to cluster members.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Connect to `address` using `credential`.
    async fn connect(
        &self,
        credential: &Credential,
        address: &str,
    ) -> Result<Box<dyn RemoteConnection>, ExecError>;
}

/// An established connection to one target.
#[async_trait]
pub trait RemoteConnection: Send {
    /// Open a command session on this connection.
    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, ExecError>;

    /// Write `data` to `remote_path` on the target, relative to the login directory.
    async fn upload_bytes(&mut self, data: &[u8], remote_path: &str) -> Result<(), ExecError>;

    /// Release the connection.
    async fn close(self: Box<Self>) -> Result<(), ExecError>;
}

/// A command session on a connection.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command` to completion.
    ///
    /// Standard output and standard error are streamed into `capture` as they
    /// arrive. Blocks until the remote process exits or the connection drops.
    async fn run(&mut self, command: &str, capture: &mut OutputCapture) -> Result<(), ExecError>;

    /// Release the session.
    async fn close(self: Box<Self>) -> Result<(), ExecError>;
}
