//! OpenSSH-backed remote executor.
//!
//! Uses `tokio::process::Command` to shell out to `ssh` and `scp`. Each
//! connection is an OpenSSH control master with its own control socket;
//! sessions and uploads are multiplexed over it, so a target is
//! authenticated once per run.

use super::{Credential, ExecError, RemoteConnection, RemoteExecutor, RemoteSession};
use crate::capture::OutputCapture;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;

/// ssh exits with 255 when the connection itself failed.
const SSH_CONNECTION_ERROR: i32 = 255;

/// Tuning for the OpenSSH executor.
#[derive(Debug, Clone)]
pub struct SshOptions {
    /// SSH connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// `ssh` program to invoke.
    pub ssh_program: PathBuf,
    /// `scp` program to invoke.
    pub scp_program: PathBuf,
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            ssh_program: PathBuf::from("ssh"),
            scp_program: PathBuf::from("scp"),
        }
    }
}

/// Remote executor that drives the system OpenSSH client.
#[derive(Debug, Clone, Default)]
pub struct SshExecutor {
    options: SshOptions,
}

impl SshExecutor {
    /// Create an executor with the given options.
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    fn base_args(&self, credential: &Credential, control_path: &Path) -> Vec<String> {
        vec![
            "-i".into(),
            credential.private_key.display().to_string(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-o".into(),
            format!("ConnectTimeout={}", self.options.connect_timeout_secs),
            "-o".into(),
            format!("ControlPath={}", control_path.display()),
        ]
    }
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn connect(
        &self,
        credential: &Credential,
        address: &str,
    ) -> Result<Box<dyn RemoteConnection>, ExecError> {
        let control_dir = tempfile::Builder::new()
            .prefix("cluster-loadtest-")
            .tempdir()?;
        let control_path = control_dir
            .path()
            .join(format!("{}.sock", uuid::Uuid::new_v4().as_simple()));
        let destination = format!("{}@{}", credential.user, address);

        // The master daemonizes after authenticating and keeps inherited pipes
        // open, so its stderr goes to a file instead.
        let log_path = control_dir.path().join("connect.log");
        let log = std::fs::File::create(&log_path)?;

        let mut args = self.base_args(credential, &control_path);
        args.extend([
            "-o".into(),
            "ControlMaster=yes".into(),
            "-o".into(),
            "ControlPersist=yes".into(),
            "-N".into(),
            "-f".into(),
            destination.clone(),
        ]);

        let status = Command::new(&self.options.ssh_program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::from(log))
            .status()
            .await?;

        if !status.success() {
            let detail = tokio::fs::read_to_string(&log_path)
                .await
                .unwrap_or_default();
            return Err(ExecError::ConnectionFailed {
                host: address.to_string(),
                detail: detail.trim().to_string(),
            });
        }

        tracing::debug!("SSH control master up for {}", destination);

        Ok(Box::new(SshConnection {
            base_args: self.base_args(credential, &control_path),
            destination,
            options: self.options.clone(),
            control_dir,
            closed: false,
        }))
    }
}

struct SshConnection {
    base_args: Vec<String>,
    destination: String,
    options: SshOptions,
    /// Owns the control socket and upload staging files; removed on drop.
    control_dir: tempfile::TempDir,
    /// Set once `close` has asked the master to exit.
    closed: bool,
}

impl SshConnection {
    async fn control(&self, op: &str) -> Result<std::process::Output, ExecError> {
        let output = Command::new(&self.options.ssh_program)
            .args(&self.base_args)
            .args(["-O", op, self.destination.as_str()])
            .stdin(Stdio::null())
            .output()
            .await?;
        Ok(output)
    }
}

#[async_trait]
impl RemoteConnection for SshConnection {
    async fn open_session(&mut self) -> Result<Box<dyn RemoteSession>, ExecError> {
        let output = self.control("check").await?;
        if !output.status.success() {
            return Err(ExecError::SessionFailed(format!(
                "control master for {} is not running: {}",
                self.destination,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(Box::new(SshSession {
            base_args: self.base_args.clone(),
            destination: self.destination.clone(),
            ssh_program: self.options.ssh_program.clone(),
        }))
    }

    async fn upload_bytes(&mut self, data: &[u8], remote_path: &str) -> Result<(), ExecError> {
        let staged = tempfile::NamedTempFile::new_in(self.control_dir.path())?;
        tokio::fs::write(staged.path(), data).await?;

        let output = Command::new(&self.options.scp_program)
            .args(&self.base_args)
            .arg(staged.path())
            .arg(format!("{}:{}", self.destination, remote_path))
            .stdin(Stdio::null())
            .output()
            .await?;

        if !output.status.success() {
            return Err(ExecError::UploadFailed {
                remote_path: remote_path.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), ExecError> {
        let mut conn = self;
        conn.closed = true;
        let output = conn.control("exit").await?;
        if !output.status.success() {
            return Err(ExecError::ConnectionLost(format!(
                "failed to stop control master for {}: {}",
                conn.destination,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl Drop for SshConnection {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // The master outlives this process unless told to exit, and the
        // control socket disappears with `control_dir` right after this.
        let stopped = std::process::Command::new(&self.options.ssh_program)
            .args(&self.base_args)
            .args(["-O", "exit", self.destination.as_str()])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match stopped {
            Ok(status) if status.success() => {
                tracing::debug!("Stopped unreleased control master for {}", self.destination)
            }
            Ok(status) => tracing::warn!(
                "Failed to stop control master for {}: {}",
                self.destination,
                status
            ),
            Err(e) => tracing::warn!(
                "Failed to stop control master for {}: {}",
                self.destination,
                e
            ),
        }
    }
}

struct SshSession {
    base_args: Vec<String>,
    destination: String,
    ssh_program: PathBuf,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn run(&mut self, command: &str, capture: &mut OutputCapture) -> Result<(), ExecError> {
        let mut child = Command::new(&self.ssh_program)
            .args(&self.base_args)
            .arg(&self.destination)
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExecError::SessionFailed("stdout not captured".into()))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExecError::SessionFailed("stderr not captured".into()))?;

        let mut out_buf = vec![0u8; 8192];
        let mut err_buf = vec![0u8; 8192];
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                read = stdout.read(&mut out_buf), if out_open => {
                    match read? {
                        0 => out_open = false,
                        n => capture.stdout(&out_buf[..n]).await?,
                    }
                }
                read = stderr.read(&mut err_buf), if err_open => {
                    match read? {
                        0 => err_open = false,
                        n => capture.stderr(&err_buf[..n]).await?,
                    }
                }
            }
        }

        let status = child.wait().await?;
        match status.code() {
            Some(0) => Ok(()),
            Some(SSH_CONNECTION_ERROR) => Err(ExecError::ConnectionLost(format!(
                "ssh to {} exited with status {}",
                self.destination, SSH_CONNECTION_ERROR
            ))),
            Some(code) => Err(ExecError::CommandFailed { exit_code: code }),
            None => Err(ExecError::CommandFailed { exit_code: -1 }),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), ExecError> {
        // The remote process has already been reaped by `run`.
        Ok(())
    }
}
