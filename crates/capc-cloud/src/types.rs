//! Remote resource models
//!
//! Broker inputs (`Domain`, `Account`, `User`, `AffinityGroup`, `Network`)
//! are filled in place as identities are resolved. `*Record` types are what
//! the [`CloudApi`](crate::CloudApi) returns.

use std::collections::BTreeMap;

use capc_common::crd::{NetworkType, ResourceIdentifier};

/// A domain in the organizational hierarchy
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Domain {
    /// Last path segment
    pub name: String,
    /// Full path, e.g. "ROOT/a/b"
    pub path: String,
    /// Cloud-assigned ID, set once resolved
    pub id: String,
}

impl Domain {
    /// Domain addressed by path
    pub fn at_path(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }
}

/// An account inside a domain
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    /// Account name, unique within its domain
    pub name: String,
    /// Owning domain
    pub domain: Domain,
    /// Cloud-assigned ID, set once resolved
    pub id: String,
}

/// A user of an account with its API key pair
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    /// Owning account
    pub account: Account,
    /// Cloud-assigned ID
    pub id: String,
    /// Login name; defaults to the account name
    pub username: String,
    /// API key
    pub api_key: String,
    /// Secret key
    pub secret_key: String,
}

/// A host placement group
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AffinityGroup {
    /// Group name
    pub name: String,
    /// Policy tag, e.g. "host anti-affinity"
    pub type_: String,
    /// Cloud-assigned ID
    pub id: String,
    /// Failure domain whose endpoint owns the group
    pub failure_domain_name: String,
}

/// A guest network
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Network {
    /// Network name
    pub name: String,
    /// Cloud-assigned ID
    pub id: String,
    /// Shared or isolated
    pub type_: NetworkType,
}

/// Domain as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainRecord {
    /// Cloud ID
    pub id: String,
    /// Domain name
    pub name: String,
    /// Full path
    pub path: String,
}

/// Account as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccountRecord {
    /// Cloud ID
    pub id: String,
    /// Account name
    pub name: String,
    /// Owning domain ID
    pub domain_id: String,
}

/// User as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    /// Cloud ID
    pub id: String,
    /// Login name
    pub username: String,
    /// Owning account name
    pub account: String,
    /// Owning domain ID
    pub domain_id: String,
}

/// API key pair of a user
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiKeys {
    /// API key
    pub api_key: String,
    /// Secret key
    pub secret_key: String,
}

/// Zone as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ZoneRecord {
    /// Cloud ID
    pub id: String,
    /// Zone name
    pub name: String,
}

/// Affinity group as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AffinityGroupRecord {
    /// Cloud ID
    pub id: String,
    /// Group name
    pub name: String,
    /// Policy tag
    pub type_: String,
}

/// Network as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkRecord {
    /// Cloud ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Shared or isolated
    pub type_: NetworkType,
    /// Zone the network lives in
    pub zone_id: String,
}

/// Compute instance as returned by the cloud
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VmRecord {
    /// Cloud ID
    pub id: String,
    /// Instance name
    pub name: String,
    /// Lifecycle state, e.g. "Running"
    pub state: String,
    /// NIC addresses
    pub addresses: Vec<String>,
}

/// Everything needed to deploy one instance
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeployVmRequest {
    /// Instance name, also the lookup identity
    pub name: String,
    /// Zone to deploy in
    pub zone_id: String,
    /// Network to attach
    pub network_id: String,
    /// Compute offering
    pub offering: ResourceIdentifier,
    /// VM template
    pub template: ResourceIdentifier,
    /// Optional data disk offering
    pub disk_offering: Option<ResourceIdentifier>,
    /// Size for custom disk offerings
    pub disk_size_gb: Option<i64>,
    /// SSH key pair
    pub ssh_key: Option<String>,
    /// Hypervisor details
    pub details: BTreeMap<String, String>,
    /// Affinity groups to join
    pub affinity_group_ids: Vec<String>,
    /// Gzipped, base64-encoded user data
    pub user_data: String,
}
