//! Target resolution.
//!
//! A target directory returns the ordered list of cluster members that
//! should run the workload. The first address is the primary target.

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use thiserror::Error;

/// Default Terraform output holding the load-test instance addresses.
pub const DEFAULT_TERRAFORM_OUTPUT: &str = "loadtest_instance_addrs";

/// Errors from resolving the target list.
#[derive(Debug, Error)]
pub enum TargetError {
    /// `terraform` could not be spawned.
    #[error("failed to run terraform")]
    Spawn(#[from] std::io::Error),

    /// `terraform output` returned a non-zero exit code.
    #[error("terraform output failed: exit={exit_code}, stderr={stderr}")]
    TerraformFailed {
        /// Exit code.
        exit_code: i32,
        /// Standard error output.
        stderr: String,
    },

    /// Output JSON could not be parsed.
    #[error("invalid terraform output")]
    Parse(#[from] serde_json::Error),

    /// Named output is not present in the Terraform state.
    #[error("terraform output {name} not found")]
    MissingOutput {
        /// Output name.
        name: String,
    },

    /// Named output is not a list of addresses.
    #[error("terraform output {name} is not a list of addresses")]
    InvalidOutput {
        /// Output name.
        name: String,
    },
}

/// Supplies the ordered list of load-test targets.
#[async_trait]
pub trait TargetDirectory: Send + Sync {
    /// Addresses of the cluster members eligible to run the workload.
    async fn loadtest_instance_addrs(&self) -> Result<Vec<String>, TargetError>;
}

/// Fixed list of addresses.
#[derive(Debug, Clone, Default)]
pub struct StaticTargets {
    addrs: Vec<String>,
}

impl StaticTargets {
    /// Create a directory that always returns `addrs`.
    pub fn new<I, S>(addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addrs: addrs.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl TargetDirectory for StaticTargets {
    async fn loadtest_instance_addrs(&self) -> Result<Vec<String>, TargetError> {
        Ok(self.addrs.clone())
    }
}

/// Reads addresses from a list output of the cluster's Terraform state.
///
/// Runs `terraform output -json` in the working directory.
#[derive(Debug, Clone)]
pub struct TerraformOutputs {
    working_dir: PathBuf,
    output_name: String,
}

impl TerraformOutputs {
    /// Read the output named `output_name` from the state in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>, output_name: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            output_name: output_name.into(),
        }
    }
}

#[async_trait]
impl TargetDirectory for TerraformOutputs {
    async fn loadtest_instance_addrs(&self) -> Result<Vec<String>, TargetError> {
        let output = tokio::process::Command::new("terraform")
            .args(["output", "-json"])
            .current_dir(&self.working_dir)
            .output()
            .await?;

        if !output.status.success() {
            return Err(TargetError::TerraformFailed {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        parse_terraform_output(&output.stdout, &self.output_name)
    }
}

#[derive(Debug, Deserialize)]
struct TerraformOutput {
    value: serde_json::Value,
}

/// Extract the list output `name` from `terraform output -json` bytes.
fn parse_terraform_output(json: &[u8], name: &str) -> Result<Vec<String>, TargetError> {
    let outputs: HashMap<String, TerraformOutput> = serde_json::from_slice(json)?;
    let output = outputs.get(name).ok_or_else(|| TargetError::MissingOutput {
        name: name.to_string(),
    })?;

    let invalid = || TargetError::InvalidOutput {
        name: name.to_string(),
    };
    output
        .value
        .as_array()
        .ok_or_else(invalid)?
        .iter()
        .map(|v| v.as_str().map(str::to_string).ok_or_else(invalid))
        .collect()
}
