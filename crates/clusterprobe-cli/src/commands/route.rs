//! Route creation

use clap::Args;
use clusterprobe_common::provider::{ResourceProvider, RouteProvider};
use clusterprobe_common::provision::provision;
use clusterprobe_common::resources::build_route;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::{Context, PollArgs};
use crate::{Error, Result};

/// Routes are left in place; remove them with `cleanup route <name>`.
#[derive(Args, Debug)]
pub struct RouteArgs {
    /// Route name
    pub name: String,

    /// Service the route points at
    #[arg(long)]
    pub service: String,

    /// Target port on the service, by number or name
    #[arg(long)]
    pub target_port: String,

    /// Hostname to request (router assigns one when omitted)
    #[arg(long)]
    pub host: Option<String>,

    /// Create/wait cycles before giving up
    #[arg(long, default_value = "1")]
    pub attempts: u32,

    #[command(flatten)]
    pub poll: PollArgs,
}

/// "8080" is a port number, anything else a port name
fn parse_target_port(s: &str) -> IntOrString {
    match s.parse::<i32>() {
        Ok(port) => IntOrString::Int(port),
        Err(_) => IntOrString::String(s.to_string()),
    }
}

fn route_url(host: &str) -> String {
    format!("http://{}", host)
}

pub async fn run(args: RouteArgs, ctx: &Context) -> Result<()> {
    let spec = args.poll.spec()?;
    let route = build_route(
        &args.name,
        &ctx.namespace,
        &args.service,
        parse_target_port(&args.target_port),
        args.host.as_deref(),
    );

    let provider = RouteProvider::new(ctx.client.clone(), &ctx.namespace, route);
    let handle = provision(&provider, &spec, args.attempts, &ctx.cancel).await?;
    let host = provider.host(&handle).await?.ok_or_else(|| {
        Error::command_failed(format!("{} has no assigned host", provider.target()))
    })?;

    println!("{}", route_url(&host));
    Ok(())
}
