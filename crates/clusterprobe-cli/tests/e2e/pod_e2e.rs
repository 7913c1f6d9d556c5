//! Pod provisioning against a live cluster
#![cfg(feature = "cluster-e2e")]

use std::collections::BTreeMap;

use clusterprobe_common::names::generate_prefixed_name;
use clusterprobe_common::provider::{delete_resource, PodProvider};
use clusterprobe_common::provision::{provision, ProvisionError};
use clusterprobe_common::readiness::FailurePolicy;
use clusterprobe_common::resources::{build_pod, ContainerConfig};
use clusterprobe_common::{Error, TEST_PREFIX};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::helpers::{init_e2e_test, namespace, pod_spec};

const IMAGE: &str = "registry.access.redhat.com/ubi8/ubi-minimal";

#[tokio::test]
#[ignore]
async fn test_sleeping_pod_becomes_ready() {
    let client = init_e2e_test().await;
    let ns = namespace();
    let name = generate_prefixed_name(TEST_PREFIX);

    let container = ContainerConfig::new("main", IMAGE).with_command(["sleep", "300"]);
    let pod = build_pod(&name, &ns, &[container], BTreeMap::new()).unwrap();
    let provider = PodProvider::new(client.clone(), &ns, pod, FailurePolicy::Reject);

    let handle = provision(&provider, &pod_spec(), 2, &CancellationToken::new())
        .await
        .expect("pod should become ready");
    info!(resource = %handle, "pod ready");

    delete_resource(client, &handle).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_failing_pod_is_retried_and_removed() {
    let client = init_e2e_test().await;
    let ns = namespace();
    let name = generate_prefixed_name(TEST_PREFIX);

    let container = ContainerConfig::new("main", IMAGE).with_command(["sh", "-c", "exit 3"]);
    let pod = build_pod(&name, &ns, &[container], BTreeMap::new()).unwrap();
    let provider = PodProvider::new(client.clone(), &ns, pod, FailurePolicy::Reject);

    let err = provision(&provider, &pod_spec(), 2, &CancellationToken::new())
        .await
        .unwrap_err();

    match err {
        Error::Provision(ProvisionError::Exhausted { history, .. }) => assert_eq!(history.len(), 2),
        other => panic!("unexpected error: {other}"),
    }

    // every failed attempt was deleted
    let pods: kube::Api<k8s_openapi::api::core::v1::Pod> = kube::Api::namespaced(client, &ns);
    assert!(pods.get_opt(&name).await.unwrap().is_none());
}
