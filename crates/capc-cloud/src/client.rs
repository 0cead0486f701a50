//! Capability set consumed from the remote cloud

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use crate::error::CloudError;
use crate::path::OrgPath;
use crate::types::{
    AccountRecord, AffinityGroupRecord, ApiKeys, DeployVmRequest, DomainRecord, NetworkRecord,
    UserRecord, VmRecord, ZoneRecord,
};

/// Remote cloud operations.
///
/// Lookups return [`CloudError::NotFound`] on a miss; creations return
/// [`CloudError::AlreadyExists`] on a collision. Implementations never
/// classify any other failure as either.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CloudApi: Send + Sync {
    /// Find a domain by full path
    async fn find_domain_by_path(&self, path: &OrgPath) -> Result<DomainRecord, CloudError>;

    /// Create one domain segment under an existing parent
    async fn create_domain(&self, parent_id: &str, name: &str)
        -> Result<DomainRecord, CloudError>;

    /// Find an account by name within a domain
    async fn find_account(&self, name: &str, domain_id: &str)
        -> Result<AccountRecord, CloudError>;

    /// Create an account within a domain
    async fn create_account(
        &self,
        name: &str,
        domain_id: &str,
    ) -> Result<AccountRecord, CloudError>;

    /// Find a user of an account
    async fn find_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError>;

    /// Create a user in an account
    async fn create_user(
        &self,
        username: &str,
        account: &str,
        domain_id: &str,
    ) -> Result<UserRecord, CloudError>;

    /// Read a user's key pair; `NotFound` when none was ever generated
    async fn get_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError>;

    /// Generate a key pair for a user
    async fn register_user_keys(&self, user_id: &str) -> Result<ApiKeys, CloudError>;

    /// Find a zone by name
    async fn find_zone(&self, name: &str) -> Result<ZoneRecord, CloudError>;

    /// Find an affinity group by name
    async fn find_affinity_group(&self, name: &str) -> Result<AffinityGroupRecord, CloudError>;

    /// Create an affinity group
    async fn create_affinity_group(
        &self,
        name: &str,
        group_type: &str,
    ) -> Result<AffinityGroupRecord, CloudError>;

    /// Delete an affinity group by ID
    async fn delete_affinity_group(&self, id: &str) -> Result<(), CloudError>;

    /// Find a network by name within a zone
    async fn find_network(&self, name: &str, zone_id: &str) -> Result<NetworkRecord, CloudError>;

    /// Create an isolated network in a zone
    async fn create_isolated_network(
        &self,
        name: &str,
        zone_id: &str,
    ) -> Result<NetworkRecord, CloudError>;

    /// Find a compute instance by name
    async fn find_vm(&self, name: &str) -> Result<VmRecord, CloudError>;

    /// Deploy a compute instance
    async fn deploy_vm(&self, request: &DeployVmRequest) -> Result<VmRecord, CloudError>;

    /// Destroy and expunge a compute instance
    async fn destroy_vm(&self, id: &str) -> Result<(), CloudError>;
}
