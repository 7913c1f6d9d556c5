//! Builders for the objects the harness creates
//!
//! Everything here is pure: objects are assembled in memory and handed to a
//! provider, which does the API calls.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, Service, ServicePort, ServiceSpec};
use k8s_openapi::api::networking::v1::{
    NetworkPolicy, NetworkPolicyIngressRule, NetworkPolicyPeer, NetworkPolicyPort,
    NetworkPolicySpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    LabelSelector, LabelSelectorRequirement, ObjectMeta,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use serde_json::{json, Value};

use crate::kube_utils::{HasApiResource, Route, Template, TemplateInstance, VirtualMachine};
use crate::{Error, MANAGED_LABEL_KEY, MANAGED_LABEL_VALUE};

/// Label the API server sets on every namespace
pub const NAMESPACE_NAME_LABEL: &str = "kubernetes.io/metadata.name";

/// Where the user script lands inside the guest
pub const SCRIPT_PATH: &str = "/tmp/myscript.sh";
const CLOUD_CONFIG_HEADER: &str = "#cloud-config";
const SCRIPT_INDENT: &str = "        ";

// =============================================================================
// Pods
// =============================================================================

/// One container of a pod
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Arguments to the entrypoint
    pub args: Vec<String>,
}

impl ContainerConfig {
    /// Container running `image` with its default entrypoint
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            ..Default::default()
        }
    }

    /// Set the entrypoint
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    /// Set the arguments
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    fn to_container(&self) -> Container {
        Container {
            name: self.name.clone(),
            image: Some(self.image.clone()),
            command: (!self.command.is_empty()).then(|| self.command.clone()),
            args: (!self.args.is_empty()).then(|| self.args.clone()),
            ..Default::default()
        }
    }
}

/// Labels put on harness-created objects when the caller gives none
pub fn default_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (MANAGED_LABEL_KEY.to_string(), MANAGED_LABEL_VALUE.to_string()),
        ("app".to_string(), name.to_string()),
    ])
}

/// A run-once pod. Empty `labels` means [`default_labels`].
pub fn build_pod(
    name: &str,
    namespace: &str,
    containers: &[ContainerConfig],
    labels: BTreeMap<String, String>,
) -> Result<Pod, Error> {
    if containers.is_empty() {
        return Err(Error::validation_for_field(
            "containers",
            format!("pod {} needs at least one container", name),
        ));
    }
    let labels = if labels.is_empty() {
        default_labels(name)
    } else {
        labels
    };

    Ok(Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: containers.iter().map(ContainerConfig::to_container).collect(),
            restart_policy: Some("Never".to_string()),
            ..Default::default()
        }),
        ..Default::default()
    })
}

// =============================================================================
// Services and routes
// =============================================================================

/// A service port. Protocols other than TCP and UDP fall back to TCP.
pub fn service_port(name: &str, port: i32, target_port: i32, protocol: &str) -> ServicePort {
    let protocol = match protocol.to_ascii_uppercase().as_str() {
        "UDP" => "UDP",
        _ => "TCP",
    };
    ServicePort {
        name: Some(name.to_string()),
        port,
        target_port: Some(IntOrString::Int(target_port)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// A service of `service_type` (ClusterIP, NodePort, LoadBalancer).
///
/// An empty `selector` selects `app=<name>`.
pub fn build_service(
    name: &str,
    namespace: &str,
    service_type: &str,
    ports: Vec<ServicePort>,
    selector: BTreeMap<String, String>,
) -> Service {
    let selector = if selector.is_empty() {
        BTreeMap::from([("app".to_string(), name.to_string())])
    } else {
        selector
    };

    Service {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            ports: Some(ports),
            selector: Some(selector),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An OpenShift route to `service`. `None` host lets the router assign one.
pub fn build_route(
    name: &str,
    namespace: &str,
    service: &str,
    target_port: IntOrString,
    host: Option<&str>,
) -> DynamicObject {
    let mut spec = json!({
        "to": { "kind": "Service", "name": service },
        "port": { "targetPort": target_port },
    });
    if let Some(host) = host.filter(|h| !h.is_empty()) {
        spec["host"] = json!(host);
    }

    DynamicObject::new(name, &Route::api_resource())
        .within(namespace)
        .data(json!({ "spec": spec }))
}

// =============================================================================
// Network policies
// =============================================================================

/// A port a policy admits. Protocols other than TCP and UDP fall back to TCP.
pub fn network_policy_port(port: i32, protocol: &str) -> NetworkPolicyPort {
    let protocol = match protocol.to_ascii_uppercase().as_str() {
        "UDP" => "UDP",
        _ => "TCP",
    };
    NetworkPolicyPort {
        port: Some(IntOrString::Int(port)),
        protocol: Some(protocol.to_string()),
        ..Default::default()
    }
}

/// Ingress policy for every pod in `namespace` that admits traffic on `ports`
/// from pods in all other namespaces.
pub fn build_namespace_allow_policy(
    name: &str,
    namespace: &str,
    ports: Vec<NetworkPolicyPort>,
) -> NetworkPolicy {
    let other_namespaces = LabelSelector {
        match_expressions: Some(vec![LabelSelectorRequirement {
            key: NAMESPACE_NAME_LABEL.to_string(),
            operator: "NotIn".to_string(),
            values: Some(vec![namespace.to_string()]),
        }]),
        ..Default::default()
    };

    NetworkPolicy {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(
                MANAGED_LABEL_KEY.to_string(),
                MANAGED_LABEL_VALUE.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(NetworkPolicySpec {
            pod_selector: LabelSelector::default(),
            policy_types: Some(vec!["Ingress".to_string()]),
            ingress: Some(vec![NetworkPolicyIngressRule {
                from: Some(vec![NetworkPolicyPeer {
                    namespace_selector: Some(other_namespaces),
                    ..Default::default()
                }]),
                ports: Some(ports),
            }]),
            ..Default::default()
        }),
    }
}

// =============================================================================
// Virtual machines
// =============================================================================

/// CPU and memory for a template-provisioned VM
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmResources {
    /// CPU request (e.g. "500m")
    pub cpu_request: String,
    /// CPU limit (e.g. "1000m")
    pub cpu_limit: String,
    /// Memory request and limit (e.g. "2Gi")
    pub memory: String,
}

impl Default for VmResources {
    fn default() -> Self {
        Self {
            cpu_request: "500m".to_string(),
            cpu_limit: "1000m".to_string(),
            memory: "2Gi".to_string(),
        }
    }
}

/// Merge a user script into cloud-init user data.
///
/// The script is written to [`SCRIPT_PATH`] and run once from `runcmd`. When
/// the user data already has `write_files` or `runcmd` sections the new
/// entries go first in them; otherwise the sections are appended.
pub fn merge_cloud_init(existing: &str, script: &str) -> String {
    let mut data = existing.trim().to_string();
    if !data.starts_with(CLOUD_CONFIG_HEADER) {
        data = format!("{}\n{}", CLOUD_CONFIG_HEADER, data);
    }

    let indented: Vec<String> = script
        .lines()
        .map(|line| format!("{}{}", SCRIPT_INDENT, line))
        .collect();
    let file_entry = format!(
        "\n  - path: {}\n    permissions: '0755'\n    content: |\n{}",
        SCRIPT_PATH,
        indented.join("\n")
    );
    data = if data.contains("write_files:") {
        data.replacen("write_files:", &format!("write_files:{}", file_entry), 1)
    } else {
        format!("{}\nwrite_files:{}", data, file_entry)
    };

    let run_entry = format!("\n  - bash {}", SCRIPT_PATH);
    if data.contains("runcmd:") {
        data.replacen("runcmd:", &format!("runcmd:{}", run_entry), 1)
    } else {
        format!("{}\nruncmd:{}", data, run_entry)
    }
}

/// Make the VM object in a template start on its own, with `resources`,
/// running `script` on first boot.
fn patch_virtual_machine(vm: &mut Value, resources: &VmResources, script: Option<&str>) {
    let spec = &mut vm["spec"];
    if spec.get("runStrategy").is_some() {
        spec["runStrategy"] = json!("Always");
    } else {
        spec["running"] = json!(true);
    }

    let domain = &mut spec["template"]["spec"]["domain"];
    domain["resources"] = json!({
        "requests": { "memory": resources.memory, "cpu": resources.cpu_request },
        "limits": { "memory": resources.memory, "cpu": resources.cpu_limit },
    });

    let Some(script) = script else { return };
    let Some(volumes) = spec["template"]["spec"]["volumes"].as_array_mut() else {
        return;
    };
    if let Some(cloud_init) = volumes
        .iter_mut()
        .find_map(|v| v.get_mut("cloudInitNoCloud"))
    {
        let existing = cloud_init["userData"].as_str().unwrap_or_default().to_string();
        cloud_init["userData"] = json!(merge_cloud_init(&existing, script));
    }
}

/// A TemplateInstance named `name` embedding `template`, with its
/// VirtualMachine patched by [`VmResources`] and an optional first-boot script.
///
/// Fails if the template contains no VirtualMachine.
pub fn build_template_instance(
    name: &str,
    namespace: &str,
    template: &DynamicObject,
    resources: &VmResources,
    script: Option<&str>,
) -> Result<DynamicObject, Error> {
    let mut objects = template
        .data
        .get("objects")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut patched = 0;
    for object in objects
        .iter_mut()
        .filter(|o| o["kind"] == VirtualMachine::KIND)
    {
        patch_virtual_machine(object, resources, script);
        patched += 1;
    }
    if patched == 0 {
        return Err(Error::validation_for_field(
            "template",
            format!(
                "template {} contains no {}",
                template.metadata.name.as_deref().unwrap_or_default(),
                VirtualMachine::KIND
            ),
        ));
    }

    // Server-populated metadata must not be sent back
    let mut embedded = template.data.clone();
    embedded["objects"] = Value::Array(objects);
    embedded["apiVersion"] = json!(Template::API_VERSION);
    embedded["kind"] = json!(Template::KIND);
    embedded["metadata"] = json!({ "name": template.metadata.name });

    Ok(DynamicObject::new(name, &TemplateInstance::api_resource())
        .within(namespace)
        .data(json!({ "spec": { "template": embedded } })))
}

/// Name of the VirtualMachine a template will create, if fixed in the template
pub fn template_vm_name(instance: &DynamicObject) -> Option<String> {
    instance.data["spec"]["template"]["objects"]
        .as_array()?
        .iter()
        .find(|o| o["kind"] == VirtualMachine::KIND)
        .and_then(|vm| vm["metadata"]["name"].as_str())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pod_gets_default_labels_and_never_restarts() {
        let pod = build_pod(
            "client",
            "core",
            &[ContainerConfig::new("busybox", "busybox:1.36").with_command(["sleep", "30"])],
            BTreeMap::new(),
        )
        .unwrap();

        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.get("managed").map(String::as_str), Some("openshift-testing"));
        assert_eq!(labels.get("app").map(String::as_str), Some("client"));

        let spec = pod.spec.unwrap();
        assert_eq!(spec.restart_policy.as_deref(), Some("Never"));
        assert_eq!(spec.containers[0].command, Some(vec!["sleep".into(), "30".into()]));
        assert!(spec.containers[0].args.is_none());
    }

    #[test]
    fn test_pod_keeps_caller_labels() {
        let labels = BTreeMap::from([("tier".to_string(), "db".to_string())]);
        let containers = [ContainerConfig::new("pg", "postgres")];
        let pod = build_pod("db", "core", &containers, labels).unwrap();
        let labels = pod.metadata.labels.unwrap();
        assert_eq!(labels.len(), 1);
        assert!(!labels.contains_key("managed"));
    }

    #[test]
    fn test_pod_without_containers_rejected() {
        let err = build_pod("empty", "core", &[], BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn test_service_port_protocol_fallback() {
        assert_eq!(service_port("dns", 53, 53, "udp").protocol.as_deref(), Some("UDP"));
        assert_eq!(service_port("web", 80, 8080, "SCTP").protocol.as_deref(), Some("TCP"));
        assert_eq!(
            service_port("web", 80, 8080, "TCP").target_port,
            Some(IntOrString::Int(8080))
        );
    }

    #[test]
    fn test_service_default_selector() {
        let svc = build_service("web", "core", "LoadBalancer", vec![], BTreeMap::new());
        let spec = svc.spec.unwrap();
        assert_eq!(spec.type_.as_deref(), Some("LoadBalancer"));
        assert_eq!(spec.selector.unwrap().get("app").map(String::as_str), Some("web"));
    }

    #[test]
    fn test_route_target_port_forms() {
        let named = build_route("web", "core", "web", IntOrString::String("http".into()), None);
        assert_eq!(named.data["spec"]["port"]["targetPort"], "http");
        assert!(named.data["spec"].get("host").is_none());
        assert_eq!(named.data["spec"]["to"]["name"], "web");

        let host = Some("web.apps.example.com");
        let numbered = build_route("web", "core", "web", IntOrString::Int(8080), host);
        assert_eq!(numbered.data["spec"]["port"]["targetPort"], 8080);
        assert_eq!(numbered.data["spec"]["host"], "web.apps.example.com");
        assert_eq!(numbered.metadata.namespace.as_deref(), Some("core"));
    }

    #[test]
    fn test_namespace_allow_policy() {
        let policy = build_namespace_allow_policy(
            "allow-http",
            "core",
            vec![network_policy_port(80, "tcp"), network_policy_port(53, "UDP")],
        );
        assert_eq!(policy.metadata.namespace.as_deref(), Some("core"));

        let spec = policy.spec.unwrap();
        assert_eq!(spec.pod_selector, LabelSelector::default());
        assert_eq!(spec.policy_types, Some(vec!["Ingress".to_string()]));

        let rule = &spec.ingress.unwrap()[0];
        let ports = rule.ports.as_ref().unwrap();
        assert_eq!(ports[0].port, Some(IntOrString::Int(80)));
        assert_eq!(ports[0].protocol.as_deref(), Some("TCP"));
        assert_eq!(ports[1].protocol.as_deref(), Some("UDP"));

        let selector = rule.from.as_ref().unwrap()[0].namespace_selector.as_ref().unwrap();
        let requirement = &selector.match_expressions.as_ref().unwrap()[0];
        assert_eq!(requirement.key, NAMESPACE_NAME_LABEL);
        assert_eq!(requirement.operator, "NotIn");
        assert_eq!(requirement.values, Some(vec!["core".to_string()]));
    }

    #[test]
    fn test_policy_port_protocol_fallback() {
        assert_eq!(network_policy_port(443, "SCTP").protocol.as_deref(), Some("TCP"));
    }

    #[test]
    fn test_cloud_init_created_from_empty() {
        let merged = merge_cloud_init("", "echo hi");
        assert_eq!(
            merged,
            "#cloud-config\n\nwrite_files:\n  - path: /tmp/myscript.sh\n    permissions: '0755'\n    content: |\n        echo hi\nruncmd:\n  - bash /tmp/myscript.sh"
        );
    }

    #[test]
    fn test_cloud_init_reuses_existing_sections() {
        let existing = "#cloud-config\nuser: cloud-user\nwrite_files:\n  - path: /etc/motd\n    content: hello\nruncmd:\n  - systemctl restart sshd\n";
        let merged = merge_cloud_init(existing, "echo one\necho two");

        assert_eq!(merged.matches("write_files:").count(), 1);
        assert_eq!(merged.matches("runcmd:").count(), 1);
        assert!(merged.contains("        echo one\n        echo two"));
        assert!(merged.contains("runcmd:\n  - bash /tmp/myscript.sh\n  - systemctl restart sshd"));
        assert!(merged.contains("  - path: /etc/motd"));
    }

    #[test]
    fn test_cloud_init_header_added_once() {
        let merged = merge_cloud_init("user: fedora", "true");
        assert!(merged.starts_with("#cloud-config\nuser: fedora"));
        assert_eq!(merged.matches("#cloud-config").count(), 1);
    }

    fn rhel_template() -> DynamicObject {
        DynamicObject::new("rhel8-4-az-a", &Template::api_resource())
            .within("openshift")
            .data(json!({
                "objects": [
                    {
                        "apiVersion": "kubevirt.io/v1",
                        "kind": "VirtualMachine",
                        "metadata": { "name": "rhel-vm" },
                        "spec": {
                            "running": false,
                            "template": { "spec": {
                                "domain": { "devices": {} },
                                "volumes": [
                                    { "name": "root", "containerDisk": { "image": "rhel" } },
                                    {
                                        "name": "init",
                                        "cloudInitNoCloud": {
                                            "userData": "#cloud-config\nuser: cloud-user"
                                        }
                                    }
                                ]
                            }}
                        }
                    },
                    { "apiVersion": "v1", "kind": "Secret", "metadata": { "name": "keys" } }
                ],
                "parameters": [{ "name": "NAME" }]
            }))
    }

    #[test]
    fn test_template_instance_patches_vm() {
        let instance = build_template_instance(
            "vm-abc",
            "core",
            &rhel_template(),
            &VmResources::default(),
            Some("echo ready"),
        )
        .unwrap();

        assert_eq!(instance.metadata.name.as_deref(), Some("vm-abc"));
        let template = &instance.data["spec"]["template"];
        assert_eq!(template["kind"], "Template");
        assert_eq!(template["parameters"][0]["name"], "NAME");

        let vm = &template["objects"][0];
        assert_eq!(vm["spec"]["running"], true);
        let resources = &vm["spec"]["template"]["spec"]["domain"]["resources"];
        assert_eq!(resources["requests"]["cpu"], "500m");
        assert_eq!(resources["limits"]["cpu"], "1000m");
        assert_eq!(resources["limits"]["memory"], "2Gi");

        let user_data = vm["spec"]["template"]["spec"]["volumes"][1]["cloudInitNoCloud"]["userData"]
            .as_str()
            .unwrap();
        assert!(user_data.contains("user: cloud-user"));
        assert!(user_data.contains("bash /tmp/myscript.sh"));

        // non-VM objects pass through untouched
        assert_eq!(template["objects"][1]["kind"], "Secret");
        assert!(template["objects"][1].get("spec").is_none());

        assert_eq!(template_vm_name(&instance).as_deref(), Some("rhel-vm"));
    }

    #[test]
    fn test_template_instance_respects_run_strategy() {
        let mut template = rhel_template();
        let vm_spec = &mut template.data["objects"][0]["spec"];
        vm_spec.as_object_mut().unwrap().remove("running");
        vm_spec["runStrategy"] = json!("Halted");

        let resources = VmResources::default();
        let instance =
            build_template_instance("vm-abc", "core", &template, &resources, None).unwrap();
        let vm = &instance.data["spec"]["template"]["objects"][0];
        assert_eq!(vm["spec"]["runStrategy"], "Always");
        assert!(vm["spec"].get("running").is_none());
    }

    #[test]
    fn test_template_without_vm_rejected() {
        let template = DynamicObject::new("empty", &Template::api_resource())
            .data(json!({ "objects": [{ "kind": "Secret" }] }));
        let err = build_template_instance("x", "core", &template, &VmResources::default(), None)
            .unwrap_err();
        assert!(err.to_string().contains("contains no VirtualMachine"));
    }
}
