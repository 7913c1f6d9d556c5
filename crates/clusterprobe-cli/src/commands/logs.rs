//! Pod log verification

use std::future::Future;

use clap::Args;
use clusterprobe_common::content::ContentExpectation;
use clusterprobe_common::poll::{wait_for, Readiness};
use clusterprobe_common::provider::check_pod;
use clusterprobe_common::readiness::{
    FailurePolicy, ResourceHandle, ResourceKind, POD_PHASE_FAILED, POD_PHASE_SUCCEEDED,
};
use k8s_openapi::api::core::v1::Pod;
use kube::api::{Api, LogParams};
use tracing::debug;

use super::{Context, PollArgs};
use crate::{Error, Result};

#[derive(Args, Debug)]
pub struct LogsArgs {
    /// Pod name
    pub name: String,

    /// Text the logs must contain
    #[arg(long)]
    pub expect: Option<String>,

    /// Regex at least one log line must match
    #[arg(long)]
    pub regex: Option<String>,

    /// Exact number of log lines
    #[arg(long)]
    pub lines: Option<usize>,

    /// Container to read (the pod's only container when omitted)
    #[arg(long)]
    pub container: Option<String>,

    #[command(flatten)]
    pub poll: PollArgs,
}

impl LogsArgs {
    fn expectation(&self) -> Result<ContentExpectation> {
        let mut expectation = ContentExpectation {
            contains: self.expect.clone(),
            lines: self.lines,
            ..Default::default()
        };
        if let Some(pattern) = &self.regex {
            expectation = expectation.with_regex(pattern)?;
        }
        if expectation.is_empty() {
            return Err(Error::validation(
                "nothing to check, pass --expect, --regex or --lines",
            ));
        }
        Ok(expectation)
    }
}

pub async fn run(args: LogsArgs, ctx: &Context) -> Result<()> {
    let expectation = args.expectation()?;
    let spec = args.poll.spec()?;
    let api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    let handle = ResourceHandle::new(ResourceKind::Pod, &ctx.namespace, &args.name);
    let target = handle.to_string();

    // A failed pod still has logs worth reading
    wait_for(&target, &spec, &ctx.cancel, || {
        check_pod(&api, &handle, FailurePolicy::Tolerate)
    })
    .await?;

    let params = LogParams {
        container: args.container.clone(),
        ..Default::default()
    };
    let reader = PodLogReader {
        api,
        name: args.name.clone(),
        params,
        target: target.clone(),
    };
    let (reader, expectation) = (&reader, &expectation);
    let log_target = format!("logs of {}", target);
    wait_for(&log_target, &spec, &ctx.cancel, move || {
        check_logs(move || reader.phase(), move || reader.logs(), expectation)
    })
    .await?;

    println!("logs of {} satisfy the expected content", target);
    Ok(())
}

struct PodLogReader {
    api: Api<Pod>,
    name: String,
    params: LogParams,
    target: String,
}

impl PodLogReader {
    async fn phase(&self) -> clusterprobe_common::Result<Option<String>> {
        let pod = self
            .api
            .get(&self.name)
            .await
            .map_err(|e| clusterprobe_common::Error::from_kube_query(&self.target, e))?;
        Ok(pod.status.and_then(|s| s.phase))
    }

    async fn logs(&self) -> clusterprobe_common::Result<String> {
        self.api
            .logs(&self.name, &self.params)
            .await
            .map_err(|e| clusterprobe_common::Error::from_kube_query(&self.target, e))
    }
}

/// One log check: read the phase, then the logs.
///
/// Reading in this order means logs fetched after a terminal phase are
/// complete, so a miss at that point is final.
async fn check_logs<P, PF, L, LF>(
    phase: P,
    logs: L,
    expectation: &ContentExpectation,
) -> clusterprobe_common::Result<Readiness>
where
    P: FnOnce() -> PF,
    PF: Future<Output = clusterprobe_common::Result<Option<String>>>,
    L: FnOnce() -> LF,
    LF: Future<Output = clusterprobe_common::Result<String>>,
{
    let phase = phase().await?;
    let logs = logs().await?;
    debug!(phase = ?phase, bytes = logs.len(), "read logs");
    Ok(classify_logs(phase.as_deref(), &logs, expectation))
}

/// Satisfied ⇒ ready. Unsatisfied in a pod that had already exited when the
/// logs were read ⇒ failed, no more output is coming. Otherwise pending.
fn classify_logs(phase: Option<&str>, logs: &str, expectation: &ContentExpectation) -> Readiness {
    match (expectation.check(logs), phase) {
        (Ok(()), _) => Readiness::Ready(()),
        (Err(reason), Some(POD_PHASE_SUCCEEDED) | Some(POD_PHASE_FAILED)) => {
            Readiness::failed(format!("logs: {}", reason))
        }
        (Err(_), _) => Readiness::Pending,
    }
}
