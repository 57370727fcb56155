//! # cluster-loadtest
//!
//! Runs the load-test workload on every load-test instance of a provisioned
//! cluster.
//!
//! ## Commands
//!
//! - `run`: Upload an optional config and run the load test everywhere
//! - `targets`: Show the resolved load-test instances
//!
//! ## Example
//!
//! ```bash
//! # Run with the instances' existing configuration
//! cluster-loadtest --config loadtest.toml run
//!
//! # Push a config file from a URL first
//! cluster-loadtest run --config-file https://example.com/loadtestconfig.json
//!
//! # Run against explicit instances, without live output
//! cluster-loadtest run --target 10.0.1.10 --target 10.0.1.11 --no-live
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadtest_core::{
    Config, Dispatcher, FileOrUrlLoader, LiveSink, LoadtestOptions, SshExecutor, StaticTargets,
    TargetDirectory, TracingReporter,
};
use std::path::PathBuf;
use std::sync::Arc;

/// Run a load test across a provisioned cluster.
#[derive(Parser, Debug)]
#[command(name = "cluster-loadtest")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Cluster configuration file
    #[arg(long, global = true, default_value = "loadtest.toml")]
    config: PathBuf,

    /// Only log warnings and errors
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the load test on every load-test instance
    Run {
        /// Load-test config to upload to every instance (path or URL)
        #[arg(long)]
        config_file: Option<String>,

        /// Don't mirror the first instance's output to stdout
        #[arg(long)]
        no_live: bool,

        /// Instance address (repeatable); overrides the configured targets
        #[arg(long = "target")]
        targets: Vec<String>,
    },

    /// Show the resolved load-test instances
    Targets,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet);

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    match cli.command {
        Commands::Run {
            config_file,
            no_live,
            targets,
        } => {
            let dispatcher = build_dispatcher(&config, targets)?;
            let live_output: Option<LiveSink> = if no_live {
                None
            } else {
                Some(Box::new(tokio::io::stdout()))
            };

            let report = dispatcher
                .loadtest(LoadtestOptions {
                    config_location: config_file,
                    live_output,
                })
                .await
                .context("Load test failed")?;

            println!();
            println!("Load test finished on {} instance(s).", report.dispatched);
            println!("  Results: {}", report.results_dir.display());
        }
        Commands::Targets => {
            let dispatcher = build_dispatcher(&config, Vec::new())?;
            let addrs = dispatcher
                .resolve_targets()
                .await
                .context("Failed to resolve load-test instances")?;
            for (i, addr) in addrs.iter().enumerate() {
                if i == 0 {
                    println!("{} (primary)", addr);
                } else {
                    println!("{}", addr);
                }
            }
        }
    }

    Ok(())
}

/// Wire the dispatcher's collaborators from configuration.
fn build_dispatcher(config: &Config, override_targets: Vec<String>) -> Result<Dispatcher> {
    let targets: Arc<dyn TargetDirectory> = if override_targets.is_empty() {
        config
            .target_directory()
            .context("Invalid target configuration")?
    } else {
        Arc::new(StaticTargets::new(override_targets))
    };

    Ok(Dispatcher::new(
        targets,
        Arc::new(SshExecutor::new(config.ssh_options())),
        Arc::new(FileOrUrlLoader::new()),
        Arc::new(TracingReporter),
        config.dispatch_settings(),
    ))
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the `--quiet` default.
fn init_tracing(quiet: bool) {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};
    let default = if quiet {
        "cluster_loadtest=warn,cluster_loadtest_core=warn"
    } else {
        "cluster_loadtest=info,cluster_loadtest_core=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
