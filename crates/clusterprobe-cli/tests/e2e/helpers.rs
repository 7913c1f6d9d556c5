//! Shared setup for e2e scenarios
#![cfg(feature = "cluster-e2e")]

use std::sync::Once;
use std::time::Duration;

use clusterprobe_common::kube_utils::{create_client, verify_connection};
use clusterprobe_common::poll::PollSpec;
use clusterprobe_common::telemetry::{init_telemetry, TelemetryConfig};
use clusterprobe_common::DEFAULT_NAMESPACE;
use kube::Client;

static TELEMETRY: Once = Once::new();

/// Namespace scenarios run in (`CLUSTERPROBE_NAMESPACE` or "core")
pub fn namespace() -> String {
    std::env::var("CLUSTERPROBE_NAMESPACE").unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string())
}

/// Install logging once and connect to the cluster
pub async fn init_e2e_test() -> Client {
    TELEMETRY.call_once(|| {
        // another test binary may own the subscriber already
        let _ = init_telemetry(TelemetryConfig::default());
    });

    let client = create_client(None).await.expect("failed to build kube client");
    verify_connection(&client, 5)
        .await
        .expect("cluster not reachable");
    client
}

/// Cadence for pod-scale waits
pub fn pod_spec() -> PollSpec {
    PollSpec::with_timeout(Duration::from_secs(5), Duration::from_secs(120)).unwrap()
}

/// Cadence for VM-scale waits
pub fn vm_spec() -> PollSpec {
    PollSpec::with_timeout(Duration::from_secs(15), Duration::from_secs(900)).unwrap()
}
