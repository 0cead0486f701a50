//! In-memory [`CloudApi`] used by tests across the workspace
//!
//! Behaves like a single cloud endpoint: the root domain exists up front,
//! lookups miss with `NotFound`, creations collide with `AlreadyExists`.
//! Failures can be injected per operation and a creation race can be staged.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use capc_common::crd::NetworkType;

use crate::client::CloudApi;
use crate::error::CloudError;
use crate::path::{OrgPath, ROOT_DOMAIN};
use crate::types::{
    AccountRecord, AffinityGroupRecord, ApiKeys, DeployVmRequest, DomainRecord, NetworkRecord,
    UserRecord, VmRecord, ZoneRecord,
};

/// ID of the preinstalled root domain
pub const ROOT_DOMAIN_ID: &str = "root-domain-id";

/// Thread-safe fake cloud
#[derive(Default)]
pub struct MemoryCloud {
    next_id: AtomicU64,
    race_next_create: AtomicBool,
    // keyed by normalized path
    domains: DashMap<String, DomainRecord>,
    // keyed by (domain id, name)
    accounts: DashMap<(String, String), AccountRecord>,
    // keyed by (domain id, account, username)
    users: DashMap<(String, String, String), UserRecord>,
    keys: DashMap<String, ApiKeys>,
    zones: DashMap<String, ZoneRecord>,
    affinity_groups: DashMap<String, AffinityGroupRecord>,
    // keyed by (zone id, name)
    networks: DashMap<(String, String), NetworkRecord>,
    vms: DashMap<String, VmRecord>,
    failures: DashMap<&'static str, CloudError>,
    creates: DashMap<&'static str, usize>,
}

impl MemoryCloud {
    /// Fresh cloud holding only the root domain
    pub fn new() -> Self {
        let cloud = Self::default();
        cloud.domains.insert(
            OrgPath::root().to_string(),
            DomainRecord {
                id: ROOT_DOMAIN_ID.to_string(),
                name: ROOT_DOMAIN.to_string(),
                path: ROOT_DOMAIN.to_string(),
            },
        );
        cloud
    }

    /// Register a zone
    pub fn with_zone(self, name: &str, id: &str) -> Self {
        self.zones.insert(
            name.to_string(),
            ZoneRecord {
                id: id.to_string(),
                name: name.to_string(),
            },
        );
        self
    }

    /// Register a pre-existing shared network
    pub fn with_shared_network(self, name: &str, zone_id: &str) -> Self {
        let id = self.allocate("network");
        self.networks.insert(
            (zone_id.to_string(), name.to_string()),
            NetworkRecord {
                id,
                name: name.to_string(),
                type_: NetworkType::Shared,
                zone_id: zone_id.to_string(),
            },
        );
        self
    }

    /// Fail the next call to `operation` (a [`CloudApi`] method name) with `err`
    pub fn inject_failure(&self, operation: &'static str, err: CloudError) {
        self.failures.insert(operation, err);
    }

    /// Make the next creation lose a race: the resource appears, yet the
    /// caller is told it already exists
    pub fn race_next_create(&self) {
        self.race_next_create.store(true, Ordering::SeqCst);
    }

    /// Number of successful or raced creations of `kind`
    pub fn create_count(&self, kind: &'static str) -> usize {
        self.creates.get(kind).map(|c| *c).unwrap_or(0)
    }

    /// Total creations across all kinds
    pub fn total_creates(&self) -> usize {
        self.creates.iter().map(|c| *c.value()).sum()
    }

    /// Set the lifecycle state of a deployed instance
    pub fn set_vm_state(&self, name: &str, state: &str) {
        if let Some(mut vm) = self.vms.get_mut(name) {
            vm.state = state.to_string();
        }
    }

    /// True when an affinity group with this name exists
    pub fn has_affinity_group(&self, name: &str) -> bool {
        self.affinity_groups.contains_key(name)
    }

    /// True when an instance with this name exists
    pub fn has_vm(&self, name: &str) -> bool {
        self.vms.contains_key(name)
    }

    fn allocate(&self, kind: &str) -> String {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", kind, n)
    }

    fn injected(&self, operation: &'static str) -> Result<(), CloudError> {
        match self.failures.remove(operation) {
            Some((_, err)) => Err(err),
            None => Ok(()),
        }
    }

    fn record_create(&self, kind: &'static str) {
        *self.creates.entry(kind).or_insert(0) += 1;
    }

    /// Consume a staged race: returns true when the caller should report
    /// `AlreadyExists` after inserting the resource
    fn take_race(&self) -> bool {
        self.race_next_create.swap(false, Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudApi for MemoryCloud {
    async fn find_domain_by_path(&self, path: &OrgPath) -> Result<DomainRecord, CloudError> {
        self.injected("find_domain_by_path")?;
        self.domains
            .get(&path.to_string())
            .map(|d| d.clone())
            .ok_or_else(|| CloudError::not_found("domain", path.to_string()))
    }

    async fn create_domain(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<DomainRecord, CloudError> {
        self.injected("create_domain")?;
        let parent_path = self
            .domains
            .iter()
            .find(|d| d.id == parent_id)
            .map(|d| d.key().clone())
            .ok_or_else(|| CloudError::Api {
                command: "createDomain".to_string(),
                code: 431,
                message: format!("parent domain {} does not exist", parent_id),
            })?;
        let path = OrgPath::parse(&parent_path).child(name).to_string();
        if self.domains.contains_key(&path) {
            return Err(CloudError::already_exists("domain", path));
        }
        let record = DomainRecord {
            id: self.allocate("domain"),
            name: name.to_string(),
            path: path.clone(),
        };
        self.domains.insert(path.clone(), record.clone());
        self.record_create("domain");
        if self.take_race() {
            return Err(CloudError::already_exists("domain", path));
        }
        Ok(record)
    }

    async fn find_account(&self, name: &str, domain_id: &str) -> Result<AccountRecord, CloudError> {
        self.injected("find_account")?;
        self.accounts
            .get(&(domain_id.to_string(), name.to_string()))
            .map(|a| a.clone())
            .ok_or_else(|| CloudError::not_found("account", name))
    }

    async fn create_account(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<AccountRecord, CloudError> {
        self.injected("create_account")?;
        let key = (domain_id.to_string(), name.to_string());
        if self.accounts.contains_key(&key) {
            return Err(CloudError::already_exists("account", name));
        }
        let record = AccountRecord {
            id: self.allocate("account"),
            name: name.to_string(),
            domain_id: domain_id.to_string(),
        };
        self.accounts.insert(key, record.clone());
        self.record_create("account");
        if self.take_race() {
            return Err(CloudError::already_exists("account", name));
        }
        Ok(record)
    }

    async fn find_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError> {
        self.injected("find_user")?;
        self.users
            .get(&(
                domain_id.to_string(),
                account.to_string(),
                username.to_string(),
            ))
            .map(|u| u.clone())
            .ok_or_else(|| CloudError::not_found("user", username))
    }

    async fn create_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError> {
        self.injected("create_user")?;
        let key = (
            domain_id.to_string(),
            account.to_string(),
            username.to_string(),
        );
        if self.users.contains_key(&key) {
            return Err(CloudError::already_exists("user", username));
        }
        let record = UserRecord {
            id: self.allocate("user"),
            username: username.to_string(),
            account: account.to_string(),
            domain_id: domain_id.to_string(),
        };
        self.users.insert(key, record.clone());
        self.record_create("user");
        if self.take_race() {
            return Err(CloudError::already_exists("user", username));
        }
        Ok(record)
    }

    async fn get_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError> {
        self.injected("get_user_keys")?;
        self.keys
            .get(user_id)
            .map(|k| k.clone())
            .ok_or_else(|| CloudError::not_found("user keys", user_id))
    }

    async fn register_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError> {
        self.injected("register_user_keys")?;
        let keys = ApiKeys {
            api_key: format!("api-key-{}", user_id),
            secret_key: format!("secret-key-{}", user_id),
        };
        self.keys.insert(user_id.to_string(), keys.clone());
        self.record_create("user keys");
        Ok(keys)
    }

    async fn find_zone(&self, name: &str) -> Result<ZoneRecord, CloudError> {
        self.injected("find_zone")?;
        self.zones
            .get(name)
            .map(|z| z.clone())
            .ok_or_else(|| CloudError::not_found("zone", name))
    }

    async fn find_affinity_group(&self, name: &str) -> Result<AffinityGroupRecord, CloudError> {
        self.injected("find_affinity_group")?;
        self.affinity_groups
            .get(name)
            .map(|g| g.clone())
            .ok_or_else(|| CloudError::not_found("affinity group", name))
    }

    async fn create_affinity_group(
        &self,
        name: &str,
        group_type: &str,
    ) -> Result<AffinityGroupRecord, CloudError> {
        self.injected("create_affinity_group")?;
        if self.affinity_groups.contains_key(name) {
            return Err(CloudError::already_exists("affinity group", name));
        }
        let record = AffinityGroupRecord {
            id: self.allocate("affinity-group"),
            name: name.to_string(),
            type_: group_type.to_string(),
        };
        self.affinity_groups.insert(name.to_string(), record.clone());
        self.record_create("affinity group");
        if self.take_race() {
            return Err(CloudError::already_exists("affinity group", name));
        }
        Ok(record)
    }

    async fn delete_affinity_group(&self, id: &str) -> Result<(), CloudError> {
        self.injected("delete_affinity_group")?;
        let name = self
            .affinity_groups
            .iter()
            .find(|g| g.id == id)
            .map(|g| g.key().clone())
            .ok_or_else(|| CloudError::not_found("affinity group", id))?;
        self.affinity_groups.remove(&name);
        Ok(())
    }

    async fn find_network(&self, name: &str, zone_id: &str) -> Result<NetworkRecord, CloudError> {
        self.injected("find_network")?;
        self.networks
            .get(&(zone_id.to_string(), name.to_string()))
            .map(|n| n.clone())
            .ok_or_else(|| CloudError::not_found("network", name))
    }

    async fn create_isolated_network(
        &self,
        name: &str,
        zone_id: &str,
    ) -> Result<NetworkRecord, CloudError> {
        self.injected("create_isolated_network")?;
        let key = (zone_id.to_string(), name.to_string());
        if self.networks.contains_key(&key) {
            return Err(CloudError::already_exists("network", name));
        }
        let record = NetworkRecord {
            id: self.allocate("network"),
            name: name.to_string(),
            type_: NetworkType::Isolated,
            zone_id: zone_id.to_string(),
        };
        self.networks.insert(key, record.clone());
        self.record_create("network");
        if self.take_race() {
            return Err(CloudError::already_exists("network", name));
        }
        Ok(record)
    }

    async fn find_vm(&self, name: &str) -> Result<VmRecord, CloudError> {
        self.injected("find_vm")?;
        self.vms
            .get(name)
            .map(|v| v.clone())
            .ok_or_else(|| CloudError::not_found("virtual machine", name))
    }

    async fn deploy_vm(&self, request: &DeployVmRequest) -> Result<VmRecord, CloudError> {
        self.injected("deploy_vm")?;
        if self.vms.contains_key(&request.name) {
            return Err(CloudError::already_exists("virtual machine", &request.name));
        }
        let n = self.next_id.load(Ordering::SeqCst) + 1;
        let record = VmRecord {
            id: self.allocate("vm"),
            name: request.name.clone(),
            state: "Running".to_string(),
            addresses: vec![format!("10.0.0.{}", n % 250 + 2)],
        };
        self.vms.insert(request.name.clone(), record.clone());
        self.record_create("virtual machine");
        if self.take_race() {
            return Err(CloudError::already_exists("virtual machine", &request.name));
        }
        Ok(record)
    }

    async fn destroy_vm(&self, id: &str) -> Result<(), CloudError> {
        self.injected("destroy_vm")?;
        let name = self
            .vms
            .iter()
            .find(|v| v.id == id)
            .map(|v| v.key().clone())
            .ok_or_else(|| CloudError::not_found("virtual machine", id))?;
        self.vms.remove(&name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_domain_is_preinstalled() {
        let cloud = MemoryCloud::new();
        let root = cloud.find_domain_by_path(&OrgPath::root()).await.unwrap();
        assert_eq!(root.id, ROOT_DOMAIN_ID);
        assert_eq!(cloud.total_creates(), 0);
    }

    #[tokio::test]
    async fn duplicate_domain_collides() {
        let cloud = MemoryCloud::new();
        cloud.create_domain(ROOT_DOMAIN_ID, "a").await.unwrap();
        let err = cloud.create_domain(ROOT_DOMAIN_ID, "a").await.unwrap_err();
        assert!(err.is_already_exists());
        assert_eq!(cloud.create_count("domain"), 1);
    }

    #[tokio::test]
    async fn injected_failure_fires_once() {
        let cloud = MemoryCloud::new();
        cloud.inject_failure(
            "find_zone",
            CloudError::Transport {
                command: "listZones".to_string(),
                message: "reset".to_string(),
            },
        );
        assert!(cloud.find_zone("Zone1").await.unwrap_err().is_transient());
        assert!(cloud.find_zone("Zone1").await.unwrap_err().is_not_found());
    }
}
