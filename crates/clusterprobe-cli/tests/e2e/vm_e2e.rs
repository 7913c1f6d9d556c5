//! VM instantiation from an OpenShift template
#![cfg(feature = "cluster-e2e")]

use clusterprobe_common::kube_utils::{HasApiResource, Template};
use clusterprobe_common::names::generate_prefixed_name;
use clusterprobe_common::provider::{delete_resource, TemplateInstanceProvider, VirtualMachineCheck};
use clusterprobe_common::provision::provision;
use clusterprobe_common::resources::{build_template_instance, template_vm_name, VmResources};
use clusterprobe_common::{DEFAULT_TEMPLATE_NAME, DEFAULT_TEMPLATE_NAMESPACE, TEST_PREFIX};
use kube::api::{Api, DynamicObject};
use tokio_util::sync::CancellationToken;

use super::helpers::{init_e2e_test, namespace, vm_spec};

#[tokio::test]
#[ignore]
async fn test_vm_from_template_becomes_ready() {
    let client = init_e2e_test().await;
    let ns = namespace();
    let name = generate_prefixed_name(TEST_PREFIX);
    let cancel = CancellationToken::new();

    let templates: Api<DynamicObject> =
        Api::namespaced_with(client.clone(), DEFAULT_TEMPLATE_NAMESPACE, &Template::api_resource());
    let template = templates.get(DEFAULT_TEMPLATE_NAME).await.unwrap();

    let instance = build_template_instance(
        &name,
        &ns,
        &template,
        &VmResources::default(),
        Some("echo clusterprobe > /tmp/probe"),
    )
    .unwrap();
    let vm_name = template_vm_name(&instance)
        .filter(|n| !n.contains("${"))
        .unwrap_or_else(|| name.clone());

    let provider = TemplateInstanceProvider::new(client.clone(), &ns, instance);
    let handle = provision(&provider, &vm_spec(), 1, &cancel).await.unwrap();

    let result = VirtualMachineCheck::new(client.clone(), &ns, &vm_name)
        .wait(&vm_spec(), &cancel)
        .await;

    delete_resource(client, &handle).await.unwrap();
    result.unwrap();
}
