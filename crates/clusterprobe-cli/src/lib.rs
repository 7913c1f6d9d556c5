//! clusterprobe CLI library

pub mod commands;
pub mod error;

pub use error::{Error, Result};

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use clusterprobe_common::telemetry::LogFormat;
use clusterprobe_common::DEFAULT_NAMESPACE;
use tokio_util::sync::CancellationToken;

use commands::Context;

/// clusterprobe - provision cluster resources and verify they converge
#[derive(Parser, Debug)]
#[command(name = "clusterprobe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Commands,
}

/// Flags shared by every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// Path to kubeconfig (in-cluster or default config when unset)
    #[arg(long, global = true, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Namespace to create resources in
    #[arg(
        long,
        short = 'n',
        global = true,
        env = "CLUSTERPROBE_NAMESPACE",
        default_value = DEFAULT_NAMESPACE
    )]
    pub namespace: String,

    /// Log output format (human or json)
    #[arg(
        long,
        global = true,
        env = "CLUSTERPROBE_LOG_FORMAT",
        default_value_t = LogFormat::Human
    )]
    pub log_format: LogFormat,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision a pod and wait until it runs (or, with --expect-failure, until it fails)
    Pod(commands::pod::PodArgs),
    /// Wait for a pod to finish and check its logs
    Logs(commands::logs::LogsArgs),
    /// Instantiate a VM from an OpenShift template and wait until it is ready
    Vm(commands::vm::VmArgs),
    /// Create a service; LoadBalancer services wait for an external address
    Service(commands::service::ServiceArgs),
    /// Create a route to a service and wait for its host
    Route(commands::route::RouteArgs),
    /// Admit traffic from other namespaces with a NetworkPolicy
    Netpol(commands::netpol::NetpolArgs),
    /// Delete a resource and wait until it is gone
    Cleanup(commands::cleanup::CleanupArgs),
    /// Verify the API server is reachable
    Check(commands::check::CheckArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let ctx = Context::connect(&self.global, cancel).await?;
        match self.command {
            Commands::Pod(args) => commands::pod::run(args, &ctx).await,
            Commands::Logs(args) => commands::logs::run(args, &ctx).await,
            Commands::Vm(args) => commands::vm::run(args, &ctx).await,
            Commands::Service(args) => commands::service::run(args, &ctx).await,
            Commands::Route(args) => commands::route::run(args, &ctx).await,
            Commands::Netpol(args) => commands::netpol::run(args, &ctx).await,
            Commands::Cleanup(args) => commands::cleanup::run(args, &ctx).await,
            Commands::Check(args) => commands::check::run(args, &ctx).await,
        }
    }
}
