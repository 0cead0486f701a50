//! CloudStackIsolatedNetwork CRD

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ReconcilePhase};

/// CloudStackIsolatedNetwork is a per-cluster network created on demand.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackIsolatedNetwork",
    namespaced,
    status = "CloudStackIsolatedNetworkStatus",
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackIsolatedNetworkSpec {
    /// Network name on the cloud
    pub name: String,

    /// Failure domain whose zone and endpoint host the network
    pub failure_domain_name: String,
}

/// CloudStackIsolatedNetwork status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackIsolatedNetworkStatus {
    /// Network exists on the cloud
    #[serde(default)]
    pub ready: bool,

    /// Current phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Cloud-assigned network ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
