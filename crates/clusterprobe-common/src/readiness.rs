//! Per-resource-kind readiness classification
//!
//! Each classifier takes the state the API returned and maps it onto
//! [`Readiness`]. They are pure so every policy can be tested without a
//! cluster; the provider types in [`crate::provider`] do the fetching.

use std::fmt;
use std::str::FromStr;

use k8s_openapi::api::core::v1::{Pod, Service};
use kube::api::DynamicObject;
use tracing::{debug, info, warn};

use crate::kube_utils::STATUS_TRUE;
use crate::poll::Readiness;
use crate::Error;

/// Pod phase reported while containers are running
pub const POD_PHASE_RUNNING: &str = "Running";
/// Pod phase reported when all containers exited successfully
pub const POD_PHASE_SUCCEEDED: &str = "Succeeded";
/// Pod phase reported when a container exited with an error
pub const POD_PHASE_FAILED: &str = "Failed";

/// Condition set on a TemplateInstance once every object was created
pub const TEMPLATE_INSTANCE_READY: &str = "Ready";
/// Condition set on a TemplateInstance when instantiation gave up
pub const TEMPLATE_INSTANCE_FAILED: &str = "InstantiateFailure";

/// Kinds of resources the harness provisions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// core/v1 Pod
    Pod,
    /// kubevirt.io/v1 VirtualMachine
    VirtualMachine,
    /// template.openshift.io/v1 TemplateInstance
    TemplateInstance,
    /// core/v1 Service
    Service,
    /// route.openshift.io/v1 Route
    Route,
    /// networking.k8s.io/v1 NetworkPolicy
    NetworkPolicy,
}

impl ResourceKind {
    /// Lowercase name used in messages and on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::VirtualMachine => "vm",
            ResourceKind::TemplateInstance => "templateinstance",
            ResourceKind::Service => "service",
            ResourceKind::Route => "route",
            ResourceKind::NetworkPolicy => "networkpolicy",
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pod" | "pods" | "po" => Ok(ResourceKind::Pod),
            "vm" | "vms" | "virtualmachine" | "virtualmachines" => Ok(ResourceKind::VirtualMachine),
            "templateinstance" | "templateinstances" | "ti" => Ok(ResourceKind::TemplateInstance),
            "service" | "services" | "svc" => Ok(ResourceKind::Service),
            "route" | "routes" => Ok(ResourceKind::Route),
            "networkpolicy" | "networkpolicies" | "netpol" => Ok(ResourceKind::NetworkPolicy),
            other => Err(Error::validation_for_field(
                "kind",
                format!("unknown resource kind '{}'", other),
            )),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identifies one created resource.
///
/// Returned by a provider's `create` and handed back to its readiness check
/// and `delete`, so all three agree on what they are talking about.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    /// Resource kind
    pub kind: ResourceKind,
    /// Namespace the resource lives in
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceHandle {
    /// Create a handle
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// What a failed pod means to the caller.
///
/// Most scenarios need the pod to come up; some (policy denial, one-shot
/// client pods whose logs are inspected afterwards) only need it to stop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    /// A failed pod ends the wait with an error
    #[default]
    Reject,
    /// A failed pod counts as a terminal state and ends the wait successfully
    Tolerate,
}

/// Classify a pod by phase.
///
/// `Running` and `Succeeded` are ready, `Failed` depends on `policy`, anything
/// else (including a pod with no status yet) is pending.
pub fn classify_pod(pod: &Pod, policy: FailurePolicy) -> Readiness {
    let name = pod.metadata.name.as_deref().unwrap_or_default();
    let phase = pod
        .status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or_default();

    match phase {
        POD_PHASE_RUNNING | POD_PHASE_SUCCEEDED => {
            info!(pod = %name, phase = %phase, "pod reached a ready phase");
            Readiness::Ready(())
        }
        POD_PHASE_FAILED => match policy {
            FailurePolicy::Reject => Readiness::failed(format!("pod {} has failed", name)),
            FailurePolicy::Tolerate => {
                warn!(pod = %name, "pod failed, accepted as a terminal state");
                Readiness::Ready(())
            }
        },
        other => {
            debug!(pod = %name, phase = %other, "pod not ready yet");
            Readiness::Pending
        }
    }
}

/// Classify a KubeVirt VirtualMachine by its `status.ready` flag
pub fn classify_virtual_machine(vm: &DynamicObject) -> Readiness {
    let ready = vm
        .data
        .get("status")
        .and_then(|s| s.get("ready"))
        .and_then(|r| r.as_bool())
        .unwrap_or(false);

    if ready {
        info!(vm = %vm.metadata.name.as_deref().unwrap_or_default(), "vm is ready");
        Readiness::Ready(())
    } else {
        Readiness::Pending
    }
}

/// Classify an OpenShift TemplateInstance by its status conditions.
///
/// Ready once `condition` has status "True". An `InstantiateFailure`
/// condition with status "True" is terminal.
pub fn classify_template_instance(instance: &DynamicObject, condition: &str) -> Readiness {
    let conditions = instance
        .data
        .get("status")
        .and_then(|s| s.get("conditions"))
        .and_then(|c| c.as_array());

    let Some(conditions) = conditions else {
        return Readiness::Pending;
    };

    let is_true = |c: &serde_json::Value, ty: &str| {
        c.get("type").and_then(|t| t.as_str()) == Some(ty)
            && c.get("status").and_then(|s| s.as_str()) == Some(STATUS_TRUE)
    };

    if conditions.iter().any(|c| is_true(c, condition)) {
        return Readiness::Ready(());
    }

    if let Some(failure) = conditions
        .iter()
        .find(|c| is_true(c, TEMPLATE_INSTANCE_FAILED))
    {
        let message = failure
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("instantiation failed");
        return Readiness::failed(message);
    }

    Readiness::Pending
}

/// Classify a LoadBalancer service by its published ingress addresses.
///
/// Ready with the first non-empty IP or hostname. Never fails on its own; the
/// provider may simply be slow to allocate.
pub fn classify_load_balancer(service: &Service) -> Readiness<String> {
    let address = service
        .status
        .as_ref()
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .and_then(|ingress| {
            ingress.iter().find_map(|i| {
                i.ip.as_deref()
                    .filter(|ip| !ip.is_empty())
                    .or_else(|| i.hostname.as_deref().filter(|h| !h.is_empty()))
            })
        });

    match address {
        Some(addr) => Readiness::Ready(addr.to_string()),
        None => Readiness::Pending,
    }
}

/// Classify an OpenShift Route by whether the router assigned it a host
pub fn classify_route(route: &DynamicObject) -> Readiness<String> {
    route
        .data
        .get("spec")
        .and_then(|s| s.get("host"))
        .and_then(|h| h.as_str())
        .filter(|h| !h.is_empty())
        .map(|h| Readiness::Ready(h.to_string()))
        .unwrap_or(Readiness::Pending)
}
