//! Common building blocks for clusterprobe: bounded polling, readiness
//! predicates, retry-provisioning, endpoint probes, guest SSH access and the
//! resource builders the integration scenarios use.

#![deny(missing_docs)]

pub mod content;
pub mod endpoint;
pub mod error;
pub mod kube_utils;
pub mod names;
pub mod poll;
pub mod provider;
pub mod provision;
pub mod readiness;
pub mod resources;
pub mod retry;
pub mod ssh;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Prefix for names of harness-created resources
pub const TEST_PREFIX: &str = "functional-test";

/// Namespace scenarios run in unless told otherwise
pub const DEFAULT_NAMESPACE: &str = "core";

/// Namespace holding the shared OpenShift VM templates
pub const DEFAULT_TEMPLATE_NAMESPACE: &str = "openshift";

/// VM template used when none is given
pub const DEFAULT_TEMPLATE_NAME: &str = "rhel8-4-az-a";

/// Label key marking harness-created resources
pub const MANAGED_LABEL_KEY: &str = "managed";

/// Value of [`MANAGED_LABEL_KEY`] on harness-created resources
pub const MANAGED_LABEL_VALUE: &str = "openshift-testing";
