//! Mock executor for testing.
//!
//! Records every connection, upload and run, and lets tests inject
//! per-target failures and scripted output.

use super::{Credential, ExecError, RemoteConnection, RemoteExecutor, RemoteSession};
use crate::capture::OutputCapture;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Scripted behaviour of the remote command on one target.
#[derive(Debug, Clone, Default)]
pub struct MockScript {
    /// Bytes emitted on standard output.
    pub stdout: Vec<u8>,
    /// Bytes emitted on standard error.
    pub stderr: Vec<u8>,
    /// How long the command runs before exiting.
    pub duration: Duration,
    /// Non-zero exit code to report, if any.
    pub exit_code: Option<i32>,
}

/// Mock executor for testing.
#[derive(Debug, Default)]
pub struct MockExecutor {
    inner: Arc<Mutex<MockExecutorInner>>,
}

#[derive(Debug, Default)]
struct MockExecutorInner {
    connects: Vec<(String, Instant)>,
    credentials: Vec<Credential>,
    uploads: Vec<(String, Vec<u8>, String)>,
    runs: Vec<(String, String)>,
    closed_sessions: Vec<String>,
    closed_connections: Vec<String>,
    scripts: HashMap<String, MockScript>,
    fail_connect: HashMap<String, String>,
    fail_session: HashMap<String, String>,
    fail_upload: HashMap<String, String>,
    panic_on_run: HashSet<String>,
}

impl MockExecutor {
    /// Create a new mock executor.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the remote command's behaviour on `address`.
    pub fn script(&self, address: &str, script: MockScript) {
        let mut inner = self.inner.lock().unwrap();
        inner.scripts.insert(address.to_string(), script);
    }

    /// Cause connections to `address` to fail with the given error.
    pub fn fail_connect(&self, address: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_connect.insert(address.to_string(), error.to_string());
    }

    /// Cause session creation on `address` to fail with the given error.
    pub fn fail_session(&self, address: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_session.insert(address.to_string(), error.to_string());
    }

    /// Cause uploads to `address` to fail with the given error.
    pub fn fail_upload(&self, address: &str, error: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.fail_upload.insert(address.to_string(), error.to_string());
    }

    /// Panic inside the run on `address`.
    pub fn panic_on_run(&self, address: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.panic_on_run.insert(address.to_string());
    }

    /// Addresses connected to, in call order.
    pub fn connected_addresses(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.connects.iter().map(|(a, _)| a.clone()).collect()
    }

    /// Connection attempts with the (tokio) instant they were made.
    pub fn connect_times(&self) -> Vec<(String, Instant)> {
        let inner = self.inner.lock().unwrap();
        inner.connects.clone()
    }

    /// Credentials presented on each connection attempt.
    pub fn credentials(&self) -> Vec<Credential> {
        let inner = self.inner.lock().unwrap();
        inner.credentials.clone()
    }

    /// Uploads performed: (address, data, remote path).
    pub fn uploads(&self) -> Vec<(String, Vec<u8>, String)> {
        let inner = self.inner.lock().unwrap();
        inner.uploads.clone()
    }

    /// Commands run: (address, command).
    pub fn runs(&self) -> Vec<(String, String)> {
        let inner = self.inner.lock().unwrap();
        inner.runs.clone()
    }

    /// Addresses whose session was closed.
    pub fn closed_sessions(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.closed_sessions.clone()
    }

    /// Addresses whose connection was closed.
    pub fn closed_connections(&self) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner.closed_connections.clone()
    }
}

impl Clone for MockExecutor {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl RemoteExecutor for MockExecutor {
    async fn connect(
        &self,
        credential: &Credential,
        address: &str,
    ) -> Result<Box<dyn RemoteConnection>, ExecError> {
        let mut inner = self.inner.lock().unwrap();
        inner.connects.push((address.to_string(), Instant::now()));
        inner.credentials.push(credential.clone());

        if let Some(detail) = inner.fail_connect.get(address) {
            return Err(ExecError::ConnectionFailed {
                host: address.to_string(),
                detail: detail.clone(),
            });
        }

        Ok(Box::new(MockConnection {
            address: address.to_string(),
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MockConnection {
    address: String,
    inner: Arc<Mutex<MockExecutorInner>>,
}

#[async_trait]
impl RemoteConnection for MockConnection {
    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, ExecError> {
        let inner = self.inner.lock().unwrap();
        if let Some(detail) = inner.fail_session.get(&self.address) {
            return Err(ExecError::SessionFailed(detail.clone()));
        }

        Ok(Box::new(MockSession {
            address: self.address.clone(),
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn upload_bytes(&mut self, data: &[u8], remote_path: &str) -> Result<(), ExecError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(detail) = inner.fail_upload.get(&self.address) {
            return Err(ExecError::UploadFailed {
                remote_path: remote_path.to_string(),
                detail: detail.clone(),
            });
        }

        inner
            .uploads
            .push((self.address.clone(), data.to_vec(), remote_path.to_string()));
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ExecError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed_connections.push(self.address.clone());
        Ok(())
    }
}

struct MockSession {
    address: String,
    inner: Arc<Mutex<MockExecutorInner>>,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn run(&mut self, command: &str, capture: &mut OutputCapture) -> Result<(), ExecError> {
        let (script, panic) = {
            let mut inner = self.inner.lock().unwrap();
            inner.runs.push((self.address.clone(), command.to_string()));
            let script = inner.scripts.get(&self.address).cloned().unwrap_or_else(|| MockScript {
                stdout: format!("loadtest output from {}\n", self.address).into_bytes(),
                ..MockScript::default()
            });
            (script, inner.panic_on_run.contains(&self.address))
        };

        if panic {
            panic!("mock run panicked on {}", self.address);
        }

        if !script.duration.is_zero() {
            tokio::time::sleep(script.duration).await;
        }
        capture.stdout(&script.stdout).await?;
        capture.stderr(&script.stderr).await?;

        match script.exit_code {
            Some(code) if code != 0 => Err(ExecError::CommandFailed { exit_code: code }),
            _ => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), ExecError> {
        let mut inner = self.inner.lock().unwrap();
        inner.closed_sessions.push(self.address.clone());
        Ok(())
    }
}
