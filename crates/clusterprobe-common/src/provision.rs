//! Create, wait, and recreate-on-failure
//!
//! [`provision`] turns "create X and hope" into "X exists and is usable, or
//! here is why not". Each attempt creates the resource, waits for it with the
//! poll engine, and on any failure deletes it before trying again, so at most
//! one instance is alive at a time.

use std::fmt;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

use crate::poll::{wait_for, PollSpec, WaitError};
use crate::provider::ResourceProvider;
use crate::readiness::ResourceHandle;
use crate::Error;

/// How one provisioning attempt ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Creation failed, nothing was polled
    CreateFailed(String),
    /// The resource was created but never became ready
    NotReady(String),
    /// The resource became ready
    Ready,
}

/// One create → wait cycle
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProvisioningAttempt {
    /// 1-based attempt number
    pub attempt: u32,
    /// The created resource, if creation succeeded
    pub handle: Option<ResourceHandle>,
    /// How the attempt ended
    pub outcome: AttemptOutcome,
}

impl fmt::Display for ProvisioningAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            AttemptOutcome::CreateFailed(e) => {
                write!(f, "attempt {}: create failed: {}", self.attempt, e)
            }
            AttemptOutcome::NotReady(e) => write!(f, "attempt {}: not ready: {}", self.attempt, e),
            AttemptOutcome::Ready => write!(f, "attempt {}: ready", self.attempt),
        }
    }
}

/// Why provisioning gave up
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Every attempt failed
    #[error("provisioning {target} failed after {attempts} attempts: {source}")]
    Exhausted {
        /// What was being provisioned
        target: String,
        /// Attempts made
        attempts: u32,
        /// Per-attempt log, oldest first
        history: Vec<ProvisioningAttempt>,
        /// Error from the final attempt
        #[source]
        source: Box<Error>,
    },

    /// The caller cancelled provisioning
    #[error("provisioning {target} cancelled during attempt {attempt}")]
    Cancelled {
        /// What was being provisioned
        target: String,
        /// Attempt in progress when cancelled
        attempt: u32,
        /// Per-attempt log, oldest first
        history: Vec<ProvisioningAttempt>,
    },
}

impl ProvisionError {
    /// Per-attempt log, oldest first
    pub fn history(&self) -> &[ProvisioningAttempt] {
        match self {
            ProvisionError::Exhausted { history, .. }
            | ProvisionError::Cancelled { history, .. } => history,
        }
    }
}

/// Ensure a resource exists and is ready, recreating it on failure.
///
/// * Up to `attempts` create → wait cycles, each waiting with `spec`.
/// * A failed creation is recorded and retried after `spec.interval()`
///   without polling.
/// * A failed wait (timeout, retries exhausted, terminal failure, query error)
///   deletes the resource before the next attempt. Delete errors are logged and
///   never replace the wait error.
/// * On success the handle is returned and the resource is left for the caller
///   to clean up.
pub async fn provision(
    provider: &dyn ResourceProvider,
    spec: &PollSpec,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<ResourceHandle, Error> {
    if attempts == 0 {
        return Err(Error::validation_for_field(
            "attempts",
            "provisioning needs at least one attempt",
        ));
    }

    let target = provider.target();
    let span = tracing::info_span!("provision", target = %target, attempts);
    run(provider, &target, spec, attempts, cancel)
        .instrument(span)
        .await
        .map_err(Error::from)
}

async fn run(
    provider: &dyn ResourceProvider,
    target: &str,
    spec: &PollSpec,
    attempts: u32,
    cancel: &CancellationToken,
) -> Result<ResourceHandle, ProvisionError> {
    let mut history = Vec::with_capacity(attempts as usize);
    let mut last_error: Option<Error> = None;

    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(ProvisionError::Cancelled {
                target: target.to_string(),
                attempt,
                history,
            });
        }

        info!(attempt, "creating");
        let handle = match provider.create().await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(attempt, error = %e, "create failed");
                history.push(ProvisioningAttempt {
                    attempt,
                    handle: None,
                    outcome: AttemptOutcome::CreateFailed(e.to_string()),
                });
                last_error = Some(e);
                if attempt < attempts {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            return Err(ProvisionError::Cancelled {
                                target: target.to_string(),
                                attempt,
                                history,
                            });
                        }
                        _ = tokio::time::sleep(spec.interval()) => {}
                    }
                }
                continue;
            }
        };

        let waited = wait_for(&handle.to_string(), spec, cancel, || provider.check(&handle)).await;

        match waited {
            Ok(()) => {
                info!(attempt, resource = %handle, "ready");
                return Ok(handle);
            }
            Err(e) => {
                warn!(
                    attempt,
                    resource = %handle,
                    reason = e.reason(),
                    error = %e,
                    "not ready, cleaning up"
                );
                cleanup(provider, &handle).await;
                history.push(ProvisioningAttempt {
                    attempt,
                    handle: Some(handle),
                    outcome: AttemptOutcome::NotReady(e.to_string()),
                });

                if matches!(e, WaitError::Cancelled { .. }) {
                    return Err(ProvisionError::Cancelled {
                        target: target.to_string(),
                        attempt,
                        history,
                    });
                }
                last_error = Some(e.into());
            }
        }
    }

    let source = last_error
        .unwrap_or_else(|| Error::internal_with_context("provision", "no attempt recorded"));
    error!(attempts, error = %source, "provisioning failed");
    Err(ProvisionError::Exhausted {
        target: target.to_string(),
        attempts,
        history,
        source: Box::new(source),
    })
}

/// Best-effort delete; failures are logged, not returned
async fn cleanup(provider: &dyn ResourceProvider, handle: &ResourceHandle) {
    if let Err(e) = provider.delete(handle).await {
        error!(resource = %handle, error = %e, "failed to delete after unsuccessful attempt");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use crate::poll::Readiness;
    use crate::provider::MockResourceProvider;
    use crate::readiness::ResourceKind;

    /// Provider that records every call and answers from a script
    struct ScriptedProvider {
        events: Mutex<Vec<String>>,
        created: Mutex<u32>,
        ready_on_attempt: Option<u32>,
        fail_delete: bool,
    }

    impl ScriptedProvider {
        fn new(ready_on_attempt: Option<u32>) -> Self {
            Self {
                events: Mutex::new(Vec::new()),
                created: Mutex::new(0),
                ready_on_attempt,
                fail_delete: false,
            }
        }

        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }

        fn count(&self, prefix: &str) -> usize {
            self.events().iter().filter(|e| e.starts_with(prefix)).count()
        }
    }

    #[async_trait]
    impl ResourceProvider for ScriptedProvider {
        fn target(&self) -> String {
            "pod core/client".to_string()
        }

        async fn create(&self) -> Result<ResourceHandle, Error> {
            let mut created = self.created.lock().unwrap();
            *created += 1;
            let name = format!("client-{}", *created);
            self.events.lock().unwrap().push(format!("create {}", name));
            Ok(ResourceHandle::new(ResourceKind::Pod, "core", name))
        }

        async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error> {
            self.events.lock().unwrap().push(format!("check {}", handle.name));
            let attempt = *self.created.lock().unwrap();
            if Some(attempt) == self.ready_on_attempt {
                Ok(Readiness::Ready(()))
            } else {
                Ok(Readiness::failed("pod client has failed"))
            }
        }

        async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
            self.events.lock().unwrap().push(format!("delete {}", handle.name));
            if self.fail_delete {
                Err(Error::internal("delete refused"))
            } else {
                Ok(())
            }
        }
    }

    fn spec() -> PollSpec {
        PollSpec::new(Duration::from_secs(1), Duration::from_secs(30), 5).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_creates_and_deletes_each_attempt() {
        let provider = ScriptedProvider::new(None);

        let err = provision(&provider, &spec(), 3, &CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(
            provider.events(),
            vec![
                "create client-1",
                "check client-1",
                "delete client-1",
                "create client-2",
                "check client-2",
                "delete client-2",
                "create client-3",
                "check client-3",
                "delete client-3",
            ]
        );
        assert!(err.to_string().contains("3 attempts"), "{err}");
        match err {
            Error::Provision(ProvisionError::Exhausted { history, .. }) => {
                assert_eq!(history.len(), 3);
                assert!(history
                    .iter()
                    .all(|a| matches!(a.outcome, AttemptOutcome::NotReady(_))));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attempt_succeeds() {
        let provider = ScriptedProvider::new(Some(2));

        let handle = provision(&provider, &spec(), 3, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(handle.name, "client-2");
        assert_eq!(provider.count("create"), 2);
        assert_eq!(provider.count("delete"), 1);
        assert_eq!(provider.events()[2], "delete client-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_failure_does_not_mask_wait_error() {
        let mut provider = ScriptedProvider::new(None);
        provider.fail_delete = true;

        let err = provision(&provider, &spec(), 2, &CancellationToken::new())
            .await
            .unwrap_err();

        let msg = err.to_string();
        assert!(msg.contains("pod client has failed"), "{msg}");
        assert!(!msg.contains("delete refused"), "{msg}");
        assert_eq!(provider.count("delete"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failures_skip_polling() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_target()
            .return_const("pod core/client".to_string());
        provider
            .expect_create()
            .times(2)
            .returning(|| Err(Error::internal("admission webhook denied")));
        provider.expect_check().never();
        provider.expect_delete().never();

        let start = tokio::time::Instant::now();
        let err = provision(&provider, &spec(), 2, &CancellationToken::new())
            .await
            .unwrap_err();

        assert!(err.to_string().contains("admission webhook denied"));
        assert!(err.to_string().contains("2 attempts"));
        // one interval between the two creations, none after the last
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_failure_then_success() {
        let mut provider = MockResourceProvider::new();
        let mut calls = 0;
        provider
            .expect_target()
            .return_const("pod core/client".to_string());
        provider.expect_create().times(2).returning(move || {
            calls += 1;
            if calls == 1 {
                Err(Error::internal("etcd leader changed"))
            } else {
                Ok(ResourceHandle::new(ResourceKind::Pod, "core", "client"))
            }
        });
        provider
            .expect_check()
            .times(1)
            .returning(|_| Ok(Readiness::Ready(())));
        provider.expect_delete().never();

        let handle = provision(&provider, &spec(), 3, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(handle.name, "client");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_cleans_up_and_stops() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_target()
            .return_const("pod core/client".to_string());
        provider
            .expect_create()
            .times(1)
            .returning(|| Ok(ResourceHandle::new(ResourceKind::Pod, "core", "client")));
        provider
            .expect_check()
            .returning(|_| Ok(Readiness::Pending));
        provider.expect_delete().times(1).returning(|_| Ok(()));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let err = provision(&provider, &spec(), 3, &cancel).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provision(ProvisionError::Cancelled { attempt: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_create_backoff_names_failed_attempt() {
        let mut provider = MockResourceProvider::new();
        provider
            .expect_target()
            .return_const("pod core/client".to_string());
        provider
            .expect_create()
            .times(1)
            .returning(|| Err(Error::internal("quota exceeded")));
        provider.expect_check().never();
        provider.expect_delete().never();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.cancel();
        });

        let err = provision(&provider, &spec(), 3, &cancel).await.unwrap_err();
        match err {
            Error::Provision(ProvisionError::Cancelled {
                attempt, history, ..
            }) => {
                assert_eq!(attempt, 1);
                assert_eq!(history.len(), 1);
                assert!(matches!(history[0].outcome, AttemptOutcome::CreateFailed(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_zero_attempts_rejected() {
        let provider = ScriptedProvider::new(Some(1));
        let err = provision(&provider, &spec(), 0, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert!(provider.events().is_empty());
    }
}
