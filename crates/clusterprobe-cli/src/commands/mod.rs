//! CLI commands

use std::fmt::Display;
use std::time::Duration;

use clap::Args;
use clusterprobe_common::kube_utils::create_client;
use clusterprobe_common::poll::PollSpec;
use clusterprobe_common::provider::delete_resource;
use clusterprobe_common::readiness::ResourceHandle;
use clusterprobe_common::retry::{retry_with_backoff_if, RetryConfig};
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{Error, GlobalArgs, Result};

pub mod check;
pub mod cleanup;
pub mod logs;
pub mod netpol;
pub mod pod;
pub mod route;
pub mod service;
pub mod vm;

/// Extension trait to convert errors with Display to CLI Error::CommandFailed.
///
/// Shorthand for `.map_err(|e| Error::command_failed(e.to_string()))`.
pub trait CommandErrorExt<T> {
    /// Convert an error to `Error::CommandFailed` using its Display implementation.
    fn cmd_err(self) -> Result<T>;
}

impl<T, E: Display> CommandErrorExt<T> for std::result::Result<T, E> {
    fn cmd_err(self) -> Result<T> {
        self.map_err(|e| Error::command_failed(e.to_string()))
    }
}

/// What every command runs against
pub struct Context {
    pub client: Client,
    pub namespace: String,
    pub cancel: CancellationToken,
}

impl Context {
    /// Build a kube client from the global flags, retrying transient failures
    pub async fn connect(global: &GlobalArgs, cancel: CancellationToken) -> Result<Self> {
        let kubeconfig = global.kubeconfig.clone();
        let client = retry_with_backoff_if(
            &RetryConfig::default(),
            "create_client",
            clusterprobe_common::Error::is_retryable,
            || {
                let kubeconfig = kubeconfig.clone();
                async move { create_client(kubeconfig.as_deref()).await }
            },
        )
        .await?;

        Ok(Self {
            client,
            namespace: global.namespace.clone(),
            cancel,
        })
    }
}

/// Poll cadence and stopping bounds, as flags
#[derive(Args, Debug, Clone)]
pub struct PollArgs {
    /// Seconds between readiness checks
    #[arg(long, default_value = "5")]
    pub interval_secs: u64,

    /// Give up after this many seconds (0 = no deadline)
    #[arg(long, default_value = "120")]
    pub timeout_secs: u64,

    /// Give up after this many checks (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub retries: u32,
}

impl PollArgs {
    /// Validated poll spec from the flags
    pub fn spec(&self) -> Result<PollSpec> {
        Ok(PollSpec::new(
            Duration::from_secs(self.interval_secs),
            Duration::from_secs(self.timeout_secs),
            self.retries,
        )?)
    }
}

/// Delete `handles` newest first. Failures are logged; every handle is tried.
pub async fn cleanup_all(client: &Client, handles: &[ResourceHandle]) {
    for handle in handles.iter().rev() {
        match delete_resource(client.clone(), handle).await {
            Ok(()) => info!(resource = %handle, "cleaned up"),
            Err(e) => error!(resource = %handle, error = %e, "cleanup failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_args_to_spec() {
        let args = PollArgs {
            interval_secs: 10,
            timeout_secs: 0,
            retries: 12,
        };
        let spec = args.spec().unwrap();
        assert_eq!(spec.interval(), Duration::from_secs(10));
        assert_eq!(spec.timeout(), None);
        assert_eq!(spec.max_retries(), Some(12));
    }

    #[test]
    fn test_unbounded_poll_args_rejected() {
        let args = PollArgs {
            interval_secs: 5,
            timeout_secs: 0,
            retries: 0,
        };
        assert!(matches!(
            args.spec(),
            Err(Error::Common(clusterprobe_common::Error::Validation { .. }))
        ));
    }

    #[test]
    fn test_oversized_interval_rejected() {
        let args = PollArgs {
            interval_secs: u64::MAX,
            timeout_secs: 120,
            retries: 0,
        };
        assert!(matches!(
            args.spec(),
            Err(Error::Common(clusterprobe_common::Error::Validation { .. }))
        ));
    }

    #[test]
    fn test_cmd_err() {
        let r: std::result::Result<(), &str> = Err("boom");
        assert!(matches!(r.cmd_err(), Err(Error::CommandFailed { message }) if message == "boom"));
    }
}
