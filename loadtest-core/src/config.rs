//! Configuration loading for cluster load tests.
//!
//! Configuration is loaded from a TOML file (default: `loadtest.toml`).
//!
//! ```toml
//! [cluster]
//! working_directory = "clusters/perf-01"
//! ssh_user = "ubuntu"
//! ssh_key = "~/.ssh/perf-01.pem"
//!
//! [dispatch]
//! stagger_secs = 10
//!
//! [targets]
//! terraform_output = "loadtest_instance_addrs"
//! ```

use crate::dispatch::{
    DispatchSettings, DEFAULT_REMOTE_COMMAND, DEFAULT_REMOTE_CONFIG_PATH, DEFAULT_STAGGER,
};
use crate::executor::{Credential, SshOptions};
use crate::target::{StaticTargets, TargetDirectory, TerraformOutputs, DEFAULT_TERRAFORM_OUTPUT};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Cluster access configuration.
    pub cluster: ClusterConfig,
    /// Dispatch tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Where the target list comes from.
    #[serde(default)]
    pub targets: TargetsConfig,
}

/// Cluster access configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    /// Working directory holding the cluster's state and `results/` (default: `.`).
    #[serde(default = "default_working_directory")]
    pub working_directory: PathBuf,
    /// Remote login user (default: ubuntu).
    #[serde(default = "default_ssh_user")]
    pub ssh_user: String,
    /// Private key shared by every cluster member.
    pub ssh_key: PathBuf,
}

/// Dispatch tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Seconds between successive target launches (default: 10).
    #[serde(default = "default_stagger_secs")]
    pub stagger_secs: u64,
    /// Command run on every target.
    #[serde(default = "default_remote_command")]
    pub remote_command: String,
    /// Upload destination for the config payload, relative to the login directory.
    #[serde(default = "default_remote_config_path")]
    pub remote_config_path: String,
    /// SSH connection timeout in seconds (default: 30).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

/// Target source configuration.
///
/// At most one of `addresses` and `terraform_output` may be set. With
/// neither, addresses are read from the default Terraform output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsConfig {
    /// Fixed, ordered list of target addresses.
    pub addresses: Option<Vec<String>>,
    /// Terraform list output holding the target addresses.
    pub terraform_output: Option<String>,
}

/// Resolved target source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSource {
    /// Fixed address list.
    Static(Vec<String>),
    /// Terraform output name.
    Terraform(String),
}

// Default value functions
fn default_working_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_ssh_user() -> String {
    "ubuntu".to_string()
}

fn default_stagger_secs() -> u64 {
    DEFAULT_STAGGER.as_secs()
}

fn default_remote_command() -> String {
    DEFAULT_REMOTE_COMMAND.to_string()
}

fn default_remote_config_path() -> String {
    DEFAULT_REMOTE_CONFIG_PATH.to_string()
}

fn default_connect_timeout_secs() -> u64 {
    30
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            stagger_secs: default_stagger_secs(),
            remote_command: default_remote_command(),
            remote_config_path: default_remote_config_path(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl TargetsConfig {
    /// Resolve which target source this configuration names.
    pub fn source(&self) -> Result<TargetSource, ConfigError> {
        match (&self.addresses, &self.terraform_output) {
            (Some(_), Some(_)) => Err(ConfigError::Invalid(
                "targets.addresses and targets.terraform_output are mutually exclusive".into(),
            )),
            (Some(addrs), None) => Ok(TargetSource::Static(addrs.clone())),
            (None, Some(name)) => Ok(TargetSource::Terraform(name.clone())),
            (None, None) => Ok(TargetSource::Terraform(DEFAULT_TERRAFORM_OUTPUT.to_string())),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// target source is ambiguous.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.targets.source()?;
        Ok(config)
    }

    /// Credential shared by every cluster member.
    pub fn credential(&self) -> Credential {
        Credential::new(self.cluster.ssh_user.clone(), self.cluster.ssh_key.clone())
    }

    /// Dispatcher settings derived from this configuration.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            working_dir: self.cluster.working_directory.clone(),
            credential: self.credential(),
            stagger: Duration::from_secs(self.dispatch.stagger_secs),
            remote_command: self.dispatch.remote_command.clone(),
            remote_config_path: self.dispatch.remote_config_path.clone(),
        }
    }

    /// OpenSSH executor options derived from this configuration.
    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout_secs: self.dispatch.connect_timeout_secs,
            ..SshOptions::default()
        }
    }

    /// Target directory named by this configuration.
    pub fn target_directory(&self) -> Result<Arc<dyn TargetDirectory>, ConfigError> {
        let directory: Arc<dyn TargetDirectory> = match self.targets.source()? {
            TargetSource::Static(addrs) => Arc::new(StaticTargets::new(addrs)),
            TargetSource::Terraform(name) => Arc::new(TerraformOutputs::new(
                self.cluster.working_directory.clone(),
                name,
            )),
        };
        Ok(directory)
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying parse error.
        source: toml::de::Error,
    },
    /// Configuration values are inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
