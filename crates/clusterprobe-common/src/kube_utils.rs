//! Kubernetes client and API resource helpers using kube-rs

use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{debug, info};

use crate::retry::{retry_with_backoff, RetryConfig};
use crate::Error;

/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Non-core API types
// =============================================================================
//
// KubeVirt and OpenShift types are not part of k8s-openapi. They are accessed
// through `DynamicObject` with an `ApiResource` built from these markers, and
// readiness is read straight out of the JSON.

/// Types with a compile-time known API version and kind.
pub trait HasApiResource {
    /// Full API version (e.g. "kubevirt.io/v1")
    const API_VERSION: &'static str;
    /// Resource kind (e.g. "VirtualMachine")
    const KIND: &'static str;

    /// Build an ApiResource from the type's constants.
    fn api_resource() -> ApiResource {
        build_api_resource(Self::API_VERSION, Self::KIND)
    }
}

/// KubeVirt VirtualMachine
pub struct VirtualMachine;

impl HasApiResource for VirtualMachine {
    const API_VERSION: &'static str = "kubevirt.io/v1";
    const KIND: &'static str = "VirtualMachine";
}

/// OpenShift Template
pub struct Template;

impl HasApiResource for Template {
    const API_VERSION: &'static str = "template.openshift.io/v1";
    const KIND: &'static str = "Template";
}

/// OpenShift TemplateInstance
pub struct TemplateInstance;

impl HasApiResource for TemplateInstance {
    const API_VERSION: &'static str = "template.openshift.io/v1";
    const KIND: &'static str = "TemplateInstance";
}

/// OpenShift Route
pub struct Route;

impl HasApiResource for Route {
    const API_VERSION: &'static str = "route.openshift.io/v1";
    const KIND: &'static str = "Route";
}

/// Build an ApiResource from a known apiVersion and kind.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Split "group/version" into its parts; core types have an empty group.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Lowercase plural resource name for a kind.
///
/// Every kind the harness reaches through [`HasApiResource`] pluralizes by
/// the English suffix rules below.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

// =============================================================================
// Client construction
// =============================================================================

/// Create a kube client from an optional kubeconfig path with default timeouts.
///
/// Without a path the config is inferred: in-cluster service account first,
/// then `KUBECONFIG` / `~/.kube/config`.
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from an optional kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: Option<&Path>,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig {}: {}", path.display(), e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };

    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    debug!(cluster_url = %config.cluster_url, "building kube client");

    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Check that the API server answers by listing namespaces.
///
/// Retries transient failures with backoff, up to `attempts` tries.
pub async fn verify_connection(client: &Client, attempts: u32) -> Result<(), Error> {
    let namespaces: Api<Namespace> = Api::all(client.clone());
    retry_with_backoff(
        &RetryConfig::with_max_attempts(attempts),
        "verify_connection",
        || {
            let namespaces = namespaces.clone();
            async move {
                namespaces
                    .list(&ListParams::default().limit(1))
                    .await
                    .map_err(|e| {
                        Error::internal_with_context(
                            "verify_connection",
                            format!("failed to list namespaces: {}", e),
                        )
                    })
            }
        },
    )
    .await?;

    info!("kubernetes connection verified");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Pod"), "pods");
        assert_eq!(pluralize_kind("Service"), "services");
        assert_eq!(pluralize_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize_kind("VirtualMachine"), "virtualmachines");
        assert_eq!(pluralize_kind("TemplateInstance"), "templateinstances");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
        assert_eq!(pluralize_kind("Gateway"), "gateways");
    }

    #[test]
    fn test_parse_api_version_with_group() {
        let (group, version) = parse_api_version("kubevirt.io/v1");
        assert_eq!(group, "kubevirt.io");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_parse_api_version_core() {
        let (group, version) = parse_api_version("v1");
        assert_eq!(group, "");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_marker_api_resources() {
        let vm = VirtualMachine::api_resource();
        assert_eq!(vm.group, "kubevirt.io");
        assert_eq!(vm.plural, "virtualmachines");

        let ti = TemplateInstance::api_resource();
        assert_eq!(ti.api_version, "template.openshift.io/v1");
        assert_eq!(ti.plural, "templateinstances");

        let route = Route::api_resource();
        assert_eq!(route.group, "route.openshift.io");
        assert_eq!(route.kind, "Route");
    }
}
