//! Resource providers backed by the Kubernetes API
//!
//! A [`ResourceProvider`] knows how to create one kind of resource, how to
//! judge its readiness, and how to remove it again. The provisioning loop in
//! [`crate::provision`] only ever talks to this trait.

use std::fmt::Debug;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Pod, Service};
use k8s_openapi::api::networking::v1::NetworkPolicy;
use kube::api::{Api, DeleteParams, DynamicObject, PostParams};
use kube::{Client, Resource};
#[cfg(test)]
use mockall::automock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::kube_utils::{HasApiResource, Route, TemplateInstance, VirtualMachine};
use crate::poll::{wait_for, PollSpec, Readiness};
use crate::readiness::{
    classify_load_balancer, classify_pod, classify_route, classify_template_instance,
    classify_virtual_machine, FailurePolicy, ResourceHandle, ResourceKind,
    TEMPLATE_INSTANCE_READY,
};
use crate::Error;

/// Interval between checks while waiting for a deleted resource to disappear
pub const DELETE_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// How long a deleted resource may take to disappear
pub const DELETE_TIMEOUT: Duration = Duration::from_secs(120);

/// Creates, checks and removes one kind of resource.
///
/// This trait abstracts the cluster for testability.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// What this provider creates, for messages (e.g. "pod core/web")
    fn target(&self) -> String;

    /// Create the resource and return its handle
    async fn create(&self) -> Result<ResourceHandle, Error>;

    /// Query the resource and classify its current state
    async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error>;

    /// Remove the resource and wait until it is gone
    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error>;
}

// =============================================================================
// Readiness queries
// =============================================================================

/// Fetch a pod and classify it
pub async fn check_pod(
    api: &Api<Pod>,
    handle: &ResourceHandle,
    policy: FailurePolicy,
) -> Result<Readiness, Error> {
    let pod = api
        .get(&handle.name)
        .await
        .map_err(|e| Error::from_kube_query(handle.to_string(), e))?;
    Ok(classify_pod(&pod, policy))
}

/// Fetch a KubeVirt VirtualMachine and classify it
pub async fn check_virtual_machine(
    api: &Api<DynamicObject>,
    handle: &ResourceHandle,
) -> Result<Readiness, Error> {
    let vm = api
        .get(&handle.name)
        .await
        .map_err(|e| Error::from_kube_query(handle.to_string(), e))?;
    Ok(classify_virtual_machine(&vm))
}

/// Fetch a TemplateInstance and classify it against `condition`
pub async fn check_template_instance(
    api: &Api<DynamicObject>,
    handle: &ResourceHandle,
    condition: &str,
) -> Result<Readiness, Error> {
    let instance = api
        .get(&handle.name)
        .await
        .map_err(|e| Error::from_kube_query(handle.to_string(), e))?;
    Ok(classify_template_instance(&instance, condition))
}

/// Fetch a service and return its external address once one is published
pub async fn check_load_balancer(
    api: &Api<Service>,
    handle: &ResourceHandle,
) -> Result<Readiness<String>, Error> {
    let service = api
        .get(&handle.name)
        .await
        .map_err(|e| Error::from_kube_query(handle.to_string(), e))?;
    Ok(classify_load_balancer(&service))
}

/// Fetch a route and return its host once the router assigned one
pub async fn check_route(
    api: &Api<DynamicObject>,
    handle: &ResourceHandle,
) -> Result<Readiness<String>, Error> {
    let route = api
        .get(&handle.name)
        .await
        .map_err(|e| Error::from_kube_query(handle.to_string(), e))?;
    Ok(classify_route(&route))
}

// =============================================================================
// Create / delete helpers
// =============================================================================

async fn create_resource<K>(
    api: &Api<K>,
    kind: ResourceKind,
    object: &K,
) -> Result<ResourceHandle, Error>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug,
{
    let created = api.create(&PostParams::default(), object).await?;
    let meta = created.meta();
    let handle = ResourceHandle::new(
        kind,
        meta.namespace.clone().unwrap_or_default(),
        meta.name.clone().unwrap_or_default(),
    );
    info!(resource = %handle, "created");
    Ok(handle)
}

/// Delete a resource and wait until the API no longer returns it.
///
/// A resource that is already gone counts as deleted.
pub async fn delete_and_wait<K>(api: &Api<K>, handle: &ResourceHandle) -> Result<(), Error>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    match api.delete(&handle.name, &DeleteParams::background()).await {
        Ok(_) => debug!(resource = %handle, "delete requested"),
        Err(kube::Error::Api(e)) if e.code == 404 => return Ok(()),
        Err(e) => return Err(e.into()),
    }

    let target = handle.to_string();
    let spec = PollSpec::with_timeout(DELETE_POLL_INTERVAL, DELETE_TIMEOUT)?;
    wait_for(&target, &spec, &CancellationToken::new(), || {
        let api = api.clone();
        let name = handle.name.clone();
        let target = target.clone();
        async move {
            match api.get_opt(&name).await {
                Ok(None) => Ok(Readiness::Ready(())),
                Ok(Some(_)) => Ok(Readiness::Pending),
                Err(e) => Err(Error::from_kube_query(target, e)),
            }
        }
    })
    .await?;

    info!(resource = %handle, "deleted");
    Ok(())
}

fn object_name<K: Resource>(object: &K) -> &str {
    object.meta().name.as_deref().unwrap_or_default()
}

// =============================================================================
// Providers
// =============================================================================

/// Provides pods
pub struct PodProvider {
    api: Api<Pod>,
    namespace: String,
    pod: Pod,
    policy: FailurePolicy,
}

impl PodProvider {
    /// Create a provider for `pod` in `namespace`
    pub fn new(client: Client, namespace: &str, pod: Pod, policy: FailurePolicy) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            pod,
            policy,
        }
    }
}

#[async_trait]
impl ResourceProvider for PodProvider {
    fn target(&self) -> String {
        ResourceHandle::new(ResourceKind::Pod, &self.namespace, object_name(&self.pod)).to_string()
    }

    async fn create(&self) -> Result<ResourceHandle, Error> {
        create_resource(&self.api, ResourceKind::Pod, &self.pod).await
    }

    async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error> {
        check_pod(&self.api, handle, self.policy).await
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        delete_and_wait(&self.api, handle).await
    }
}

/// Provides OpenShift TemplateInstances (and through them, VMs)
pub struct TemplateInstanceProvider {
    api: Api<DynamicObject>,
    namespace: String,
    instance: DynamicObject,
    condition: String,
}

impl TemplateInstanceProvider {
    /// Create a provider for `instance` in `namespace`, ready on the `Ready` condition
    pub fn new(client: Client, namespace: &str, instance: DynamicObject) -> Self {
        Self {
            api: Api::namespaced_with(client, namespace, &TemplateInstance::api_resource()),
            namespace: namespace.to_string(),
            instance,
            condition: TEMPLATE_INSTANCE_READY.to_string(),
        }
    }

    /// Wait on a different condition type
    pub fn with_condition(mut self, condition: impl Into<String>) -> Self {
        self.condition = condition.into();
        self
    }
}

#[async_trait]
impl ResourceProvider for TemplateInstanceProvider {
    fn target(&self) -> String {
        ResourceHandle::new(
            ResourceKind::TemplateInstance,
            &self.namespace,
            object_name(&self.instance),
        )
        .to_string()
    }

    async fn create(&self) -> Result<ResourceHandle, Error> {
        create_resource(&self.api, ResourceKind::TemplateInstance, &self.instance).await
    }

    async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error> {
        check_template_instance(&self.api, handle, &self.condition).await
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        delete_and_wait(&self.api, handle).await
    }
}

/// Provides services, ready once a load balancer address is published
pub struct LoadBalancerProvider {
    api: Api<Service>,
    namespace: String,
    service: Service,
}

impl LoadBalancerProvider {
    /// Create a provider for `service` in `namespace`
    pub fn new(client: Client, namespace: &str, service: Service) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
            service,
        }
    }
}

impl LoadBalancerProvider {
    /// The published external address, if any
    pub async fn address(&self, handle: &ResourceHandle) -> Result<Option<String>, Error> {
        match check_load_balancer(&self.api, handle).await? {
            Readiness::Ready(address) => Ok(Some(address)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ResourceProvider for LoadBalancerProvider {
    fn target(&self) -> String {
        ResourceHandle::new(ResourceKind::Service, &self.namespace, object_name(&self.service))
            .to_string()
    }

    async fn create(&self) -> Result<ResourceHandle, Error> {
        create_resource(&self.api, ResourceKind::Service, &self.service).await
    }

    async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error> {
        Ok(check_load_balancer(&self.api, handle).await?.map(|_| ()))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        delete_and_wait(&self.api, handle).await
    }
}

/// Provides OpenShift routes, ready once a host is assigned
pub struct RouteProvider {
    api: Api<DynamicObject>,
    namespace: String,
    route: DynamicObject,
}

impl RouteProvider {
    /// Create a provider for `route` in `namespace`
    pub fn new(client: Client, namespace: &str, route: DynamicObject) -> Self {
        Self {
            api: Api::namespaced_with(client, namespace, &Route::api_resource()),
            namespace: namespace.to_string(),
            route,
        }
    }
}

impl RouteProvider {
    /// The host assigned by the router, if any
    pub async fn host(&self, handle: &ResourceHandle) -> Result<Option<String>, Error> {
        match check_route(&self.api, handle).await? {
            Readiness::Ready(host) => Ok(Some(host)),
            _ => Ok(None),
        }
    }
}

#[async_trait]
impl ResourceProvider for RouteProvider {
    fn target(&self) -> String {
        ResourceHandle::new(ResourceKind::Route, &self.namespace, object_name(&self.route))
            .to_string()
    }

    async fn create(&self) -> Result<ResourceHandle, Error> {
        create_resource(&self.api, ResourceKind::Route, &self.route).await
    }

    async fn check(&self, handle: &ResourceHandle) -> Result<Readiness, Error> {
        Ok(check_route(&self.api, handle).await?.map(|_| ()))
    }

    async fn delete(&self, handle: &ResourceHandle) -> Result<(), Error> {
        delete_and_wait(&self.api, handle).await
    }
}

/// Readiness check for the VirtualMachine a template instance produced.
///
/// The VM is owned by its TemplateInstance, so it is only ever waited on,
/// never created or deleted directly.
pub struct VirtualMachineCheck {
    api: Api<DynamicObject>,
    handle: ResourceHandle,
}

impl VirtualMachineCheck {
    /// Check VM `name` in `namespace`
    pub fn new(client: Client, namespace: &str, name: &str) -> Self {
        Self {
            api: Api::namespaced_with(client, namespace, &VirtualMachine::api_resource()),
            handle: ResourceHandle::new(ResourceKind::VirtualMachine, namespace, name),
        }
    }

    /// Handle of the VM being checked
    pub fn handle(&self) -> &ResourceHandle {
        &self.handle
    }

    /// Query the VM once
    pub async fn check(&self) -> Result<Readiness, Error> {
        check_virtual_machine(&self.api, &self.handle).await
    }

    /// Wait until the VM reports ready
    pub async fn wait(&self, spec: &PollSpec, cancel: &CancellationToken) -> Result<(), Error> {
        wait_for(&self.handle.to_string(), spec, cancel, || self.check()).await?;
        info!(resource = %self.handle, "virtual machine ready");
        Ok(())
    }
}

/// Api handle for a resource kind in a namespace, for lookups and cleanup
pub fn dynamic_api(
    client: Client,
    namespace: &str,
    kind: ResourceKind,
) -> Option<Api<DynamicObject>> {
    let ar = match kind {
        ResourceKind::VirtualMachine => VirtualMachine::api_resource(),
        ResourceKind::TemplateInstance => TemplateInstance::api_resource(),
        ResourceKind::Route => Route::api_resource(),
        ResourceKind::Pod | ResourceKind::Service | ResourceKind::NetworkPolicy => return None,
    };
    Some(Api::namespaced_with(client, namespace, &ar))
}

/// Create a network policy in its own namespace.
///
/// Policies carry no status, so there is nothing to wait on; the network
/// plugin applies them some time after creation.
pub async fn create_network_policy(
    client: Client,
    policy: &NetworkPolicy,
) -> Result<ResourceHandle, Error> {
    let namespace = policy.metadata.namespace.as_deref().ok_or_else(|| {
        Error::validation_for_field("namespace", "network policy has no namespace")
    })?;
    let api: Api<NetworkPolicy> = Api::namespaced(client, namespace);
    create_resource(&api, ResourceKind::NetworkPolicy, policy).await
}

/// Delete any supported resource by handle and wait until it is gone
pub async fn delete_resource(client: Client, handle: &ResourceHandle) -> Result<(), Error> {
    match handle.kind {
        ResourceKind::Pod => {
            let api: Api<Pod> = Api::namespaced(client, &handle.namespace);
            delete_and_wait(&api, handle).await
        }
        ResourceKind::Service => {
            let api: Api<Service> = Api::namespaced(client, &handle.namespace);
            delete_and_wait(&api, handle).await
        }
        ResourceKind::NetworkPolicy => {
            let api: Api<NetworkPolicy> = Api::namespaced(client, &handle.namespace);
            delete_and_wait(&api, handle).await
        }
        kind => {
            let api = dynamic_api(client, &handle.namespace, kind).ok_or_else(|| {
                Error::internal_with_context("delete_resource", format!("no api for {}", kind))
            })?;
            delete_and_wait(&api, handle).await
        }
    }
}
