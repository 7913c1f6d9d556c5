//! Pod provisioning scenario

use std::collections::BTreeMap;

use clap::Args;
use clusterprobe_common::names::generate_prefixed_name;
use clusterprobe_common::provider::PodProvider;
use clusterprobe_common::provision::{provision, ProvisionError};
use clusterprobe_common::readiness::{FailurePolicy, ResourceHandle};
use clusterprobe_common::resources::{build_pod, ContainerConfig};
use clusterprobe_common::TEST_PREFIX;
use tracing::info;

use super::{cleanup_all, Context, PollArgs};
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct PodArgs {
    /// Pod name (random when omitted)
    #[arg(long)]
    pub name: Option<String>,

    /// Container image
    #[arg(long, default_value = "registry.access.redhat.com/ubi8/ubi-minimal")]
    pub image: String,

    /// Labels as key=value (managed=openshift-testing,app=<name> when omitted)
    #[arg(long = "label", value_parser = parse_label)]
    pub labels: Vec<(String, String)>,

    /// Create/wait cycles before giving up
    #[arg(long, default_value = "3")]
    pub attempts: u32,

    #[command(flatten)]
    pub poll: PollArgs,

    /// Succeed only if the pod never becomes ready
    #[arg(long)]
    pub expect_failure: bool,

    /// Leave the pod in place afterwards
    #[arg(long)]
    pub keep: bool,

    /// Command to run in the container (after --)
    #[arg(last = true)]
    pub command: Vec<String>,
}

pub(crate) fn parse_label(s: &str) -> std::result::Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.is_empty() => Ok((k.to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got '{}'", s)),
    }
}

pub async fn run(args: PodArgs, ctx: &Context) -> Result<()> {
    let spec = args.poll.spec()?;
    let name = args
        .name
        .clone()
        .unwrap_or_else(|| generate_prefixed_name(TEST_PREFIX));

    let container =
        ContainerConfig::new(&name, &args.image).with_command(args.command.iter().cloned());
    let labels: BTreeMap<String, String> = args.labels.iter().cloned().collect();
    let pod = build_pod(&name, &ctx.namespace, &[container], labels)?;

    let provider =
        PodProvider::new(ctx.client.clone(), &ctx.namespace, pod, FailurePolicy::Reject);
    let outcome = provision(&provider, &spec, args.attempts, &ctx.cancel).await;

    if let Ok(handle) = &outcome {
        if !args.keep {
            cleanup_all(&ctx.client, std::slice::from_ref(handle)).await;
        }
    }

    let handle = judge(outcome, args.expect_failure)?;
    match handle {
        Some(handle) => println!("{} is ready", handle),
        None => println!("pod {} failed as expected", name),
    }
    Ok(())
}

/// Turn a provisioning outcome into the scenario verdict.
///
/// With `expect_failure`, only exhausted provisioning passes; cancellation and
/// invalid input are errors either way.
fn judge(
    outcome: clusterprobe_common::Result<ResourceHandle>,
    expect_failure: bool,
) -> Result<Option<ResourceHandle>> {
    use clusterprobe_common::Error as ProbeError;

    match (outcome, expect_failure) {
        (Ok(handle), false) => Ok(Some(handle)),
        (Ok(handle), true) => Err(Error::scenario_failed(format!(
            "{} became ready but was expected to fail",
            handle
        ))),
        (Err(ProbeError::Provision(e @ ProvisionError::Exhausted { .. })), true) => {
            info!(error = %e, "provisioning failed as expected");
            Ok(None)
        }
        (Err(e), _) => Err(e.into()),
    }
}
