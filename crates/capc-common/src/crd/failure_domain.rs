//! CloudStackFailureDomain CRD
//!
//! One zone of a cluster together with the endpoint credentials used to reach
//! it. Created by the cluster reconciler, one per zone.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, ReconcilePhase, SecretRef, Zone};

/// CloudStackFailureDomain binds a zone to a cloud endpoint.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackFailureDomain",
    namespaced,
    status = "CloudStackFailureDomainStatus",
    printcolumn = r#"{"name":"Zone","type":"string","jsonPath":".spec.zone.name"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackFailureDomainSpec {
    /// Failure domain name as advertised to CAPI
    pub name: String,

    /// Zone and network
    pub zone: Zone,

    /// Account to place resources in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Domain path of the account
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,

    /// Secret with the cloud endpoint and keys
    pub acs_endpoint: SecretRef,
}

/// CloudStackFailureDomain status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackFailureDomainStatus {
    /// Zone, network and account are resolved
    #[serde(default)]
    pub ready: bool,

    /// Current phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Resolved network ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network_id: Option<String>,

    /// Resolved domain ID, when an account is configured
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain_id: Option<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}
