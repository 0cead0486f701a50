//! Shared types used across the infrastructure CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Kind an identity reference must point at
pub const IDENTITY_REF_SECRET_KIND: &str = "Secret";

/// Reconciliation phase recorded on every infrastructure object
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ReconcilePhase {
    /// Observed but not yet reconciled
    #[default]
    Pending,
    /// Remote resources are being resolved or created
    Reconciling,
    /// All remote resources exist and status is current
    Ready,
    /// A validation-class error surfaced late; needs a spec change
    Failed,
}

impl std::fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Reconciling => write!(f, "Reconciling"),
            Self::Ready => write!(f, "Ready"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Reference to the Secret holding cloud credentials
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRef {
    /// Kind of the referenced object; only "Secret" is accepted
    pub kind: String,
    /// Name of the referenced object
    pub name: String,
}

impl IdentityRef {
    /// Reference a Secret by name
    pub fn secret(name: impl Into<String>) -> Self {
        Self {
            kind: IDENTITY_REF_SECRET_KIND.to_string(),
            name: name.into(),
        }
    }
}

/// Namespaced reference to a Secret
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Secret name
    pub name: String,
    /// Secret namespace
    pub namespace: String,
}

/// A cloud resource addressed by ID or by name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceIdentifier {
    /// Cloud-assigned ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Resource name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

impl ResourceIdentifier {
    /// Identify a resource by name only
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
        }
    }

    /// True when neither an ID nor a name is set
    pub fn is_empty(&self) -> bool {
        self.id.is_empty() && self.name.is_empty()
    }
}

/// Host and port the workload cluster's API server is reachable on
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    /// Hostname or IP
    #[serde(default)]
    pub host: String,
    /// Port
    #[serde(default)]
    pub port: i32,
}

/// Network placement policy of a cloud network
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum NetworkType {
    /// Pre-existing network shared between accounts; looked up, never created
    #[default]
    Shared,
    /// Network owned by one cluster; created on demand
    Isolated,
}

/// Network a zone's machines attach to
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Network name
    pub name: String,
    /// Cloud-assigned ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Shared or isolated
    #[serde(default, rename = "type")]
    pub type_: NetworkType,
}

/// An availability zone and the network used inside it
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Zone {
    /// Zone name
    #[serde(default)]
    pub name: String,
    /// Cloud-assigned zone ID
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    /// Network for machines in this zone
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkSpec>,
}

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition holds
    True,
    /// Condition does not hold
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

/// Status condition
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
pub struct Condition {
    /// Type of condition (e.g., Ready)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last time the condition transitioned
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
        }
    }

    /// The Ready condition matching a phase
    pub fn ready_for(phase: ReconcilePhase, message: impl Into<String>) -> Self {
        let (status, reason) = match phase {
            ReconcilePhase::Pending => (ConditionStatus::Unknown, "AwaitingReconcile"),
            ReconcilePhase::Reconciling => (ConditionStatus::False, "Reconciling"),
            ReconcilePhase::Ready => (ConditionStatus::True, "Ready"),
            ReconcilePhase::Failed => (ConditionStatus::False, "ValidationFailed"),
        };
        Self::new("Ready", status, reason, message)
    }

    /// Same type, status, reason and message; transition time is ignored
    pub fn same_as(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// True when two condition lists differ in anything but transition times
pub fn conditions_changed(old: &[Condition], new: &[Condition]) -> bool {
    old.len() != new.len() || old.iter().zip(new).any(|(a, b)| !a.same_as(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_identifier_emptiness() {
        assert!(ResourceIdentifier::default().is_empty());
        assert!(!ResourceIdentifier::named("Large").is_empty());
        assert!(!ResourceIdentifier {
            id: "abc".to_string(),
            name: String::new()
        }
        .is_empty());
    }

    #[test]
    fn ready_condition_tracks_phase() {
        let ready = Condition::ready_for(ReconcilePhase::Ready, "all good");
        assert_eq!(ready.status, ConditionStatus::True);
        let failed = Condition::ready_for(ReconcilePhase::Failed, "no zones");
        assert_eq!(failed.status, ConditionStatus::False);
        assert_eq!(failed.reason, "ValidationFailed");
    }

    #[test]
    fn condition_comparison_ignores_timestamps() {
        let a = vec![Condition::ready_for(ReconcilePhase::Ready, "ok")];
        let mut b = a.clone();
        b[0].last_transition_time = a[0].last_transition_time - chrono::TimeDelta::hours(1);
        assert!(!conditions_changed(&a, &b));

        b[0].message = "changed".to_string();
        assert!(conditions_changed(&a, &b));
    }

    #[test]
    fn network_type_serializes_as_variant_name() {
        let net = NetworkSpec {
            name: "isolated-net".to_string(),
            id: String::new(),
            type_: NetworkType::Isolated,
        };
        let value = serde_json::to_value(&net).unwrap();
        assert_eq!(value["type"], "Isolated");
        assert!(value.get("id").is_none());
    }
}
