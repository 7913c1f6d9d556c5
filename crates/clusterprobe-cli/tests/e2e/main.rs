//! Cluster-backed scenarios
//!
//! Need a live OpenShift cluster with KubeVirt and the VM templates installed,
//! reachable through the current kubeconfig.
//!
//! ```bash
//! cargo test -p clusterprobe-cli --features cluster-e2e --test e2e -- --ignored --nocapture
//! ```

mod helpers;
mod network_e2e;
mod pod_e2e;
mod vm_e2e;
