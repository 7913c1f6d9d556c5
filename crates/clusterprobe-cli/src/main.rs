//! clusterprobe CLI
//!
//! Drives integration scenarios against an OpenShift/KubeVirt cluster.

use clap::Parser;
use clusterprobe_common::telemetry::{init_telemetry, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use clusterprobe_cli::commands::CommandErrorExt;
use clusterprobe_cli::{Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        format: cli.global.log_format,
        ..Default::default()
    })
    .cmd_err()?;

    // Ctrl-C stops the current wait; created resources are still cleaned up
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling");
            on_signal.cancel();
        }
    });

    cli.run(cancel).await
}
