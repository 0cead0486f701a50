//! CloudStackMachine CRD
//!
//! One compute instance. Offering, template, details, disk offering and
//! affinity are baked into the instance at deploy time and cannot change.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, IdentityRef, ReconcilePhase, ResourceIdentifier};

/// Instance state reported by the cloud once the VM is up
pub const INSTANCE_STATE_RUNNING: &str = "Running";

/// Prefix of the provider ID CAPI uses to match nodes to machines
pub const PROVIDER_ID_PREFIX: &str = "cloudstack:///";

/// Host placement policy for a machine's owner group
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Affinity {
    /// No placement constraint
    #[default]
    No,
    /// Place machines of one owner on the same host
    Pro,
    /// Spread machines of one owner over distinct hosts
    Anti,
}

impl Affinity {
    /// Affinity group type understood by the cloud, if any
    pub fn group_type(&self) -> Option<&'static str> {
        match self {
            Self::No => None,
            Self::Pro => Some("host affinity"),
            Self::Anti => Some("host anti-affinity"),
        }
    }
}

/// Data disk attached at deploy time
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DiskOffering {
    /// Offering ID or name
    #[serde(flatten)]
    pub offering: ResourceIdentifier,
    /// Size in GB for custom-size offerings
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_size_in_gb: Option<i64>,
    /// Where the disk is mounted
    #[serde(default)]
    pub mount_path: String,
    /// Block device path
    #[serde(default)]
    pub device: String,
    /// Filesystem to format with
    #[serde(default)]
    pub filesystem: String,
    /// Filesystem label
    #[serde(default)]
    pub label: String,
}

/// CloudStackMachine describes one compute instance.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1beta2",
    kind = "CloudStackMachine",
    namespaced,
    status = "CloudStackMachineStatus",
    printcolumn = r#"{"name":"InstanceState","type":"string","jsonPath":".status.instanceState"}"#,
    printcolumn = r#"{"name":"Ready","type":"boolean","jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"ProviderID","type":"string","jsonPath":".spec.providerID"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackMachineSpec {
    /// Provider ID set once the instance exists
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Failure domain to deploy into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain_name: Option<String>,

    /// Compute offering
    #[serde(default)]
    pub offering: ResourceIdentifier,

    /// VM template
    #[serde(default)]
    pub template: ResourceIdentifier,

    /// Optional data disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_offering: Option<DiskOffering>,

    /// SSH key pair name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key: Option<String>,

    /// Extra instance details passed to the hypervisor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, String>,

    /// Placement policy shared with sibling machines
    #[serde(default)]
    pub affinity: Affinity,

    /// Pre-existing affinity group IDs
    #[serde(default, rename = "affinityGroupIDs", skip_serializing_if = "Vec::is_empty")]
    pub affinity_group_ids: Vec<String>,

    /// Secret holding the cloud credentials
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identity_ref: Option<IdentityRef>,
}

/// CloudStackMachine status
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CloudStackMachineStatus {
    /// Instance is running
    #[serde(default)]
    pub ready: bool,

    /// Current phase
    #[serde(default)]
    pub phase: ReconcilePhase,

    /// Cloud instance ID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Failure domain the instance was deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_domain_name: Option<String>,

    /// Last instance state reported by the cloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state: Option<String>,

    /// When `instance_state` last changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_state_last_updated: Option<DateTime<Utc>>,

    /// Addresses reported for the instance
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<String>,

    /// Status conditions
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl CloudStackMachineSpec {
    /// The data disk to attach; a block without an offering means none
    pub fn data_disk(&self) -> Option<&DiskOffering> {
        self.disk_offering
            .as_ref()
            .filter(|d| !d.offering.is_empty())
    }
}

impl CloudStackMachineStatus {
    /// Time elapsed since the instance state last changed.
    ///
    /// Negative when the state has never been recorded, so callers can tell
    /// "never updated" apart from "updated long ago".
    pub fn time_since_last_state_change(&self) -> TimeDelta {
        match self.instance_state_last_updated {
            Some(at) => Utc::now() - at,
            None => TimeDelta::nanoseconds(-1),
        }
    }

    /// Record a state reported by the cloud, stamping the time only on change
    pub fn set_instance_state(&mut self, state: impl Into<String>) -> bool {
        let state = state.into();
        if self.instance_state.as_deref() == Some(state.as_str()) {
            return false;
        }
        self.instance_state = Some(state);
        self.instance_state_last_updated = Some(Utc::now());
        true
    }

    /// True once the cloud reports the instance as running
    pub fn is_running(&self) -> bool {
        self.instance_state.as_deref() == Some(INSTANCE_STATE_RUNNING)
    }
}
