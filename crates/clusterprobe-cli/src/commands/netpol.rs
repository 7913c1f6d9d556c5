//! NetworkPolicy creation

use std::time::Duration;

use clap::Args;
use clusterprobe_common::provider::create_network_policy;
use clusterprobe_common::resources::{build_namespace_allow_policy, network_policy_port};
use tracing::info;

use super::Context;
use crate::{Error, Result};

/// Policies are left in place; remove them with `cleanup networkpolicy <name>`.
#[derive(Args, Debug)]
pub struct NetpolArgs {
    /// Policy name
    pub name: String,

    /// Port to admit from other namespaces (repeatable)
    #[arg(long = "port", required = true)]
    pub ports: Vec<i32>,

    /// TCP or UDP
    #[arg(long, default_value = "TCP")]
    pub protocol: String,

    /// Seconds to give the network plugin to apply the policy
    #[arg(long, default_value = "10")]
    pub settle_secs: u64,
}

pub async fn run(args: NetpolArgs, ctx: &Context) -> Result<()> {
    if let Some(port) = args.ports.iter().find(|p| !(1..=65535).contains(*p)) {
        return Err(Error::validation(format!("port {} out of range", port)));
    }

    let ports = args
        .ports
        .iter()
        .map(|port| network_policy_port(*port, &args.protocol))
        .collect();
    let policy = build_namespace_allow_policy(&args.name, &ctx.namespace, ports);
    let handle = create_network_policy(ctx.client.clone(), &policy).await?;

    info!(policy = %handle, settle_secs = args.settle_secs, "waiting for policy to apply");
    tokio::select! {
        _ = ctx.cancel.cancelled() => {
            return Err(Error::command_failed(format!("cancelled while {} settled", handle)));
        }
        _ = tokio::time::sleep(Duration::from_secs(args.settle_secs)) => {}
    }

    println!("{} admits ports {:?} from other namespaces", handle, args.ports);
    Ok(())
}
