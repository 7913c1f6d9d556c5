//! Service and route exposure against a live cluster
#![cfg(feature = "cluster-e2e")]

use std::collections::BTreeMap;

use clusterprobe_common::names::generate_prefixed_name;
use clusterprobe_common::provider::{
    create_network_policy, delete_resource, PodProvider, RouteProvider,
};
use clusterprobe_common::provision::provision;
use clusterprobe_common::readiness::FailurePolicy;
use clusterprobe_common::resources::{
    build_namespace_allow_policy, build_pod, build_route, build_service, network_policy_port,
    service_port, ContainerConfig,
};
use clusterprobe_common::TEST_PREFIX;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::networking::v1::NetworkPolicy;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Api, PostParams};
use tokio_util::sync::CancellationToken;

use super::helpers::{init_e2e_test, namespace, pod_spec};

#[tokio::test]
#[ignore]
async fn test_route_to_http_pod_gets_host() {
    let client = init_e2e_test().await;
    let ns = namespace();
    let name = generate_prefixed_name(TEST_PREFIX);
    let cancel = CancellationToken::new();

    let container = ContainerConfig::new("http", "registry.access.redhat.com/ubi8/python-39")
        .with_command(["python3", "-m", "http.server", "8080"]);
    let pod = build_pod(&name, &ns, &[container], BTreeMap::new()).unwrap();
    let pods = PodProvider::new(client.clone(), &ns, pod, FailurePolicy::Reject);
    let pod_handle = provision(&pods, &pod_spec(), 2, &cancel).await.unwrap();

    let service = build_service(
        &name,
        &ns,
        "ClusterIP",
        vec![service_port("http", 80, 8080, "TCP")],
        BTreeMap::new(),
    );
    let services: Api<Service> = Api::namespaced(client.clone(), &ns);
    services.create(&PostParams::default(), &service).await.unwrap();

    let route = build_route(&name, &ns, &name, IntOrString::Int(8080), None);
    let routes = RouteProvider::new(client.clone(), &ns, route);
    let route_handle = provision(&routes, &pod_spec(), 1, &cancel).await.unwrap();
    let host = routes.host(&route_handle).await.unwrap();
    assert!(host.is_some_and(|h| !h.is_empty()));

    delete_resource(client.clone(), &route_handle).await.unwrap();
    services
        .delete(&name, &Default::default())
        .await
        .unwrap();
    delete_resource(client, &pod_handle).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_network_policy_create_and_cleanup() {
    let client = init_e2e_test().await;
    let ns = namespace();
    let name = generate_prefixed_name(TEST_PREFIX);

    let policy = build_namespace_allow_policy(&name, &ns, vec![network_policy_port(80, "TCP")]);
    let handle = create_network_policy(client.clone(), &policy).await.unwrap();

    let policies: Api<NetworkPolicy> = Api::namespaced(client.clone(), &ns);
    let stored = policies.get(&name).await.unwrap();
    let rule = &stored.spec.unwrap().ingress.unwrap()[0];
    assert_eq!(rule.ports.as_ref().unwrap().len(), 1);

    delete_resource(client, &handle).await.unwrap();
    assert!(policies.get_opt(&name).await.unwrap().is_none());
}
