//! Explicit cleanup

use clap::Args;
use clusterprobe_common::provider::delete_resource;
use clusterprobe_common::readiness::{ResourceHandle, ResourceKind};

use super::Context;
use crate::Result;

#[derive(Args, Debug)]
pub struct CleanupArgs {
    /// pod, vm, templateinstance, service, route or networkpolicy
    pub kind: ResourceKind,

    /// Resource name
    pub name: String,
}

pub async fn run(args: CleanupArgs, ctx: &Context) -> Result<()> {
    let handle = ResourceHandle::new(args.kind, &ctx.namespace, &args.name);
    delete_resource(ctx.client.clone(), &handle).await?;
    println!("{} deleted", handle);
    Ok(())
}
