//! CloudStackCluster CRD
//!
//! The infrastructure half of a CAPI Cluster: zones to spread machines over,
//! the control plane endpoint, and the credentials used to talk to the cloud.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{
    ApiEndpoint, Condition, IdentityRef, ReconcilePhase, SecretRef, Zone,
    IDENTITY_REF_SECRET_KIND,
};
use crate::Error;

/// Secret name used when a cluster carries no identity reference
pub const DEFAULT_CREDENTIALS_SECRET: &str = "cloudstack-credentials";

/// CloudStackCluster describes the cloud footprint of one workload cluster.
///
/// Example:
/// ```yaml
/// apiVersion: infrastructure.cluster.x-k8s.io/v1beta2
/// kind: CloudStackCluster
/// metadata:
///   name: test-cluster
///   namespace: default
/// spec:
///   zones:
///     - name: zone1
///       network:
///         name: guest-net
///   controlPlaneEndpoint:
///     host: 10.0.0.10
///     port: 6443
///   identityRef:
///     kind: Secret
///     name: acs-credentials
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackCluster",
    namespaced,
    status = "CloudStackClusterStatus",
    printcolumn = r#"{"name":"Host","type":"string","jsonPath":".spec.controlPlaneEndpoint.host"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackClusterSpec {
    /// Zones machines may be placed in; immutable after creation
    #[serde(default)]
    pub zones: Vec<Zone>,

    /// API server endpoint; immutable after creation
    #[serde(default)]
    pub control_plane_endpoint: ApiEndpoint,

    /// Secret holding the cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,

    /// Account to place resources in, created on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account: Option<String>,

    /// Domain path ("ROOT/a/b") of the account, created on demand
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

/// Failure domain as advertised to CAPI
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FailureDomainAdvert {
    /// Whether control plane machines may be placed here
    #[serde(default)]
    pub control_plane: bool,
}

/// CloudStackCluster status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackClusterStatus {
    /// Infrastructure is provisioned
    #[serde(default)]
    pub ready: bool,

    /// Current phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Failure domains keyed by name, read by CAPI for machine placement
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub failure_domains: BTreeMap<String, FailureDomainAdvert>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CloudStackClusterSpec {
    /// Check the invariants admission enforces, for objects that predate the webhook
    pub fn validate(&self) -> Result<(), Error> {
        if self.zones.is_empty() {
            return Err(Error::validation_for_field(
                "spec",
                "spec.zones",
                "at least one zone is required",
            ));
        }
        if let Some(zone) = self.zones.iter().find(|z| z.network.is_none()) {
            return Err(Error::validation_for_field(
                "spec",
                "spec.zones",
                format!("zone {:?} has no network", zone.name),
            ));
        }
        if let Some(identity) = &self.identity_ref {
            if identity.kind != IDENTITY_REF_SECRET_KIND {
                return Err(Error::validation_for_field(
                    "spec",
                    "spec.identityRef.kind",
                    "must be a Secret",
                ));
            }
        }
        Ok(())
    }
}

impl CloudStackCluster {
    /// Secret holding the cloud credentials for this cluster's failure domains
    pub fn credentials_secret(&self) -> SecretRef {
        SecretRef {
            name: self
                .spec
                .identity_ref
                .as_ref()
                .map(|r| r.name.clone())
                .unwrap_or_else(|| DEFAULT_CREDENTIALS_SECRET.to_string()),
            namespace: self.metadata.namespace.clone().unwrap_or_default(),
        }
    }
}
