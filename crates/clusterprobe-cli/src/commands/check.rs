//! API connectivity check

use clap::Args;
use clusterprobe_common::kube_utils::verify_connection;

use super::Context;
use crate::Result;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Tries before giving up
    #[arg(long, default_value = "5")]
    pub attempts: u32,
}

pub async fn run(args: CheckArgs, ctx: &Context) -> Result<()> {
    verify_connection(&ctx.client, args.attempts).await?;
    let version = ctx
        .client
        .apiserver_version()
        .await
        .map_err(clusterprobe_common::Error::from)?;
    println!("connected to kubernetes {}", version.git_version);
    Ok(())
}
