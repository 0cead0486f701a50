//! CloudStackAffinityGroup CRD

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ReconcilePhase};

/// Finalizer guarding remote deletion of an affinity group
pub const AFFINITY_GROUP_FINALIZER: &str = "affinitygroup.infrastructure.cluster.x-k8s.io";

/// CloudStackAffinityGroup is a host placement group scoped to one failure domain.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackAffinityGroup",
    namespaced,
    status = "CloudStackAffinityGroupStatus",
    printcolumn = r#"{"name":"Type","type":"string","jsonPath":".spec.type"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackAffinityGroupSpec {
    /// Group name on the cloud
    pub name: String,

    /// Policy tag, e.g. "host anti-affinity"
    #[serde(rename = "type")]
    pub type_: String,

    /// Failure domain whose endpoint owns the group
    pub failure_domain_name: String,
}

/// CloudStackAffinityGroup status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackAffinityGroupStatus {
    /// Group exists on the cloud
    #[serde(default)]
    pub ready: bool,

    /// Current phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Cloud-assigned group ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
