//! Partial typed views of the Cluster API kinds this provider reads
//!
//! Only the fields the reconcilers consume are modelled; everything else is
//! ignored on deserialization. These CRDs are installed by CAPI itself, so
//! schema generation is disabled.

use kube::CustomResource;
use serde::{Deserialize, Serialize};

use crate::CONTROL_PLANE_LABEL;

/// Core CAPI API group
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Kubeadm control plane provider API group
pub const CONTROL_PLANE_GROUP: &str = "controlplane.cluster.x-k8s.io";

/// Etcdadm provider API group
pub const ETCD_CLUSTER_GROUP: &str = "etcdcluster.cluster.x-k8s.io";

/// Typed reference to another object
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// API version of the referent
    #[serde(default)]
    pub api_version: String,
    /// Kind of the referent
    #[serde(default)]
    pub kind: String,
    /// Name of the referent
    #[serde(default)]
    pub name: String,
    /// Namespace of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Bootstrap data pointer of a CAPI Machine
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    /// Secret holding the rendered bootstrap data once the bootstrap provider is done
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

/// CAPI Machine, as seen by the infrastructure provider.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,
    /// Bootstrap data pointer
    #[serde(default)]
    pub bootstrap: Bootstrap,
    /// Failure domain chosen by CAPI
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain: Option<String>,
    /// Infrastructure machine backing this Machine
    #[serde(default)]
    pub infrastructure_ref: ObjectReference,
}

impl Machine {
    /// True for machines that are members of a control plane
    pub fn is_control_plane(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .is_some_and(|labels| labels.contains_key(CONTROL_PLANE_LABEL))
    }
}

/// CAPI MachineSet; only its existence matters here.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "MachineSet",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSetSpec {
    /// Owning cluster
    #[serde(default)]
    pub cluster_name: String,
    /// Desired replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
}

/// Kubeadm control plane; lingers while its machines drain.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "controlplane.cluster.x-k8s.io",
    version = "v1beta1",
    kind = "KubeadmControlPlane",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct KubeadmControlPlaneSpec {
    /// Desired control plane replicas
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicas: Option<i32>,
    /// Kubernetes version
    #[serde(default)]
    pub version: String,
}

/// CAPI Cluster, the owner of every CloudStackCluster.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Reconciliation is paused
    #[serde(default)]
    pub paused: bool,
    /// Infrastructure cluster backing this Cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    #[test]
    fn control_plane_membership_comes_from_label() {
        let mut machine = Machine {
            metadata: ObjectMeta::default(),
            spec: MachineSpec::default(),
        };
        assert!(!machine.is_control_plane());

        machine.metadata.labels = Some(BTreeMap::from([(
            CONTROL_PLANE_LABEL.to_string(),
            String::new(),
        )]));
        assert!(machine.is_control_plane());
    }

    #[test]
    fn machine_parses_with_unknown_fields() {
        let json = serde_json::json!({
            "apiVersion": "cluster.x-k8s.io/v1beta1",
            "kind": "Machine",
            "metadata": {"name": "m1", "namespace": "default"},
            "spec": {
                "clusterName": "test-cluster",
                "version": "v1.32.0",
                "bootstrap": {"dataSecretName": "m1-bootstrap"},
                "infrastructureRef": {
                    "apiVersion": "infrastructure.cluster.x-k8s.io/v1beta2",
                    "kind": "CloudStackMachine",
                    "name": "m1"
                }
            }
        });
        let machine: Machine = serde_json::from_value(json).unwrap();
        assert_eq!(machine.spec.cluster_name, "test-cluster");
        assert_eq!(
            machine.spec.bootstrap.data_secret_name.as_deref(),
            Some("m1-bootstrap")
        );
        assert_eq!(machine.spec.infrastructure_ref.kind, "CloudStackMachine");
    }
}
