//! Idempotent resource broker
//!
//! Every operation looks a resource up by its stable identity and creates it
//! only when absent. A creation that collides with a concurrent creator is
//! resolved by looking the resource up again, so duplicate or concurrent
//! invocations converge on one remote resource. Any other remote error is
//! returned unchanged; backoff belongs to the caller.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, instrument};

use capc_common::crd::Zone;

use crate::client::CloudApi;
use crate::error::CloudError;
use crate::path::OrgPath;
use crate::types::{Account, AffinityGroup, DeployVmRequest, Domain, Network, User, VmRecord};

/// Look up, else create, else (on a lost race) look up again.
///
/// A collision whose re-lookup still misses returns the original
/// `AlreadyExists` so the caller sees why nothing was resolved.
async fn get_or_create<T, L, LFut, C, CFut>(lookup: L, create: C) -> Result<T, CloudError>
where
    L: Fn() -> LFut,
    LFut: Future<Output = Result<T, CloudError>>,
    C: FnOnce() -> CFut,
    CFut: Future<Output = Result<T, CloudError>>,
{
    match lookup().await {
        Ok(found) => return Ok(found),
        Err(e) if !e.is_not_found() => return Err(e),
        Err(_) => {}
    }

    match create().await {
        Ok(created) => Ok(created),
        Err(collision) if collision.is_already_exists() => {
            debug!(error = %collision, "lost creation race, looking up winner");
            match lookup().await {
                Ok(found) => Ok(found),
                Err(e) if e.is_not_found() => Err(collision),
                Err(e) => Err(e),
            }
        }
        Err(e) => Err(e),
    }
}

/// Get-or-create front end over one cloud endpoint
#[derive(Clone)]
pub struct Broker {
    cloud: Arc<dyn CloudApi>,
}

impl Broker {
    /// Broker over `cloud`
    pub fn new(cloud: Arc<dyn CloudApi>) -> Self {
        Self { cloud }
    }

    /// The underlying capability set
    pub fn cloud(&self) -> &Arc<dyn CloudApi> {
        &self.cloud
    }

    // =========================================================================
    // Domains
    // =========================================================================

    /// ID of the domain at `path`, or `None` when no such domain exists
    pub async fn get_domain_by_path(&self, path: &OrgPath) -> Result<Option<String>, CloudError> {
        match self.cloud.find_domain_by_path(path).await {
            Ok(record) => Ok(Some(record.id)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Create exactly one domain segment under `parent_id`.
    ///
    /// A collision surfaces as [`CloudError::AlreadyExists`].
    pub async fn create_domain_under_parent(
        &self,
        parent_id: &str,
        name: &str,
    ) -> Result<String, CloudError> {
        let record = self.cloud.create_domain(parent_id, name).await?;
        info!(domain = %record.path, id = %record.id, "created domain");
        Ok(record.id)
    }

    /// Resolve `domain` by path, creating every missing level top-down.
    ///
    /// The path falls back to the name when empty. On success the ID is set
    /// and name/path are normalized (name is the last path segment). The bare
    /// root path resolves without any creation.
    #[instrument(skip(self, domain), fields(path = %domain.path))]
    pub async fn get_or_create_domain(&self, domain: &mut Domain) -> Result<(), CloudError> {
        let raw = if domain.path.trim().is_empty() {
            domain.name.as_str()
        } else {
            domain.path.as_str()
        };
        let target = OrgPath::parse(raw);

        let mut parent_id = self.cloud.find_domain_by_path(&OrgPath::root()).await?.id;
        for level in target.descendants_from_root() {
            let record = get_or_create(
                || self.cloud.find_domain_by_path(&level),
                || self.cloud.create_domain(&parent_id, level.name()),
            )
            .await?;
            parent_id = record.id;
        }

        domain.id = parent_id;
        domain.name = target.name().to_string();
        domain.path = target.to_string();
        debug!(domain = %domain.path, id = %domain.id, "resolved domain");
        Ok(())
    }

    // =========================================================================
    // Accounts and users
    // =========================================================================

    /// Resolve the account's domain, then the account within it
    #[instrument(skip(self, account), fields(account = %account.name))]
    pub async fn get_or_create_account(&self, account: &mut Account) -> Result<(), CloudError> {
        if account.name.is_empty() {
            return Err(CloudError::InvalidInput(
                "account name must not be empty".to_string(),
            ));
        }
        self.get_or_create_domain(&mut account.domain).await?;

        let domain_id = account.domain.id.as_str();
        let name = account.name.as_str();
        let record = get_or_create(
            || self.cloud.find_account(name, domain_id),
            || self.cloud.create_account(name, domain_id),
        )
        .await?;

        account.id = record.id;
        Ok(())
    }

    /// Resolve the account, then a user of it together with its key pair.
    ///
    /// The user is only filled in once both the user and its keys exist. A
    /// user left keyless by an earlier failed run gets its keys here.
    #[instrument(skip(self, user), fields(account = %user.account.name))]
    pub async fn get_or_create_user_with_key(&self, user: &mut User) -> Result<(), CloudError> {
        self.get_or_create_account(&mut user.account).await?;

        let username = if user.username.is_empty() {
            user.account.name.clone()
        } else {
            user.username.clone()
        };
        let account = user.account.name.as_str();
        let domain_id = user.account.domain.id.as_str();

        let record = get_or_create(
            || self.cloud.find_user(&username, account, domain_id),
            || self.cloud.create_user(&username, account, domain_id),
        )
        .await?;

        let keys = match self.cloud.get_user_keys(&record.id).await {
            Ok(keys) => keys,
            Err(e) if e.is_not_found() => {
                info!(user = %record.username, "generating user keys");
                self.cloud.register_user_keys(&record.id).await?
            }
            Err(e) => return Err(e),
        };

        user.id = record.id;
        user.username = record.username;
        user.api_key = keys.api_key;
        user.secret_key = keys.secret_key;
        Ok(())
    }

    // =========================================================================
    // Affinity groups
    // =========================================================================

    /// Resolve the group by name within its failure domain's endpoint
    #[instrument(skip(self, group), fields(group = %group.name, failure_domain = %group.failure_domain_name))]
    pub async fn get_or_create_affinity_group(
        &self,
        group: &mut AffinityGroup,
    ) -> Result<(), CloudError> {
        if group.failure_domain_name.is_empty() {
            return Err(CloudError::InvalidInput(format!(
                "affinity group {} has no failure domain",
                group.name
            )));
        }
        if group.name.is_empty() {
            return Err(CloudError::InvalidInput(
                "affinity group name must not be empty".to_string(),
            ));
        }

        let name = group.name.as_str();
        let group_type = group.type_.as_str();
        let record = get_or_create(
            || self.cloud.find_affinity_group(name),
            || self.cloud.create_affinity_group(name, group_type),
        )
        .await?;

        group.id = record.id;
        if group.type_.is_empty() {
            group.type_ = record.type_;
        }
        Ok(())
    }

    /// Delete the group; a group that is already gone counts as deleted
    pub async fn delete_affinity_group(&self, group: &AffinityGroup) -> Result<(), CloudError> {
        let id = if group.id.is_empty() {
            match self.cloud.find_affinity_group(&group.name).await {
                Ok(record) => record.id,
                Err(e) if e.is_not_found() => return Ok(()),
                Err(e) => return Err(e),
            }
        } else {
            group.id.clone()
        };

        match self.cloud.delete_affinity_group(&id).await {
            Ok(()) => {
                info!(group = %group.name, id = %id, "deleted affinity group");
                Ok(())
            }
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }

    // =========================================================================
    // Zones and networks
    // =========================================================================

    /// ID of `zone`, looked up by name unless already known
    pub async fn resolve_zone_id(&self, zone: &Zone) -> Result<String, CloudError> {
        if !zone.id.is_empty() {
            return Ok(zone.id.clone());
        }
        Ok(self.cloud.find_zone(&zone.name).await?.id)
    }

    /// Look up a pre-existing network by name; never creates
    pub async fn resolve_shared_network(
        &self,
        network: &mut Network,
        zone_id: &str,
    ) -> Result<(), CloudError> {
        let record = self.cloud.find_network(&network.name, zone_id).await?;
        network.id = record.id;
        network.type_ = record.type_;
        Ok(())
    }

    /// Resolve an isolated network by name, creating it when absent
    #[instrument(skip(self, network), fields(network = %network.name))]
    pub async fn get_or_create_isolated_network(
        &self,
        network: &mut Network,
        zone_id: &str,
    ) -> Result<(), CloudError> {
        let name = network.name.as_str();
        let record = get_or_create(
            || self.cloud.find_network(name, zone_id),
            || self.cloud.create_isolated_network(name, zone_id),
        )
        .await?;
        network.id = record.id;
        network.type_ = record.type_;
        Ok(())
    }

    // =========================================================================
    // Instances
    // =========================================================================

    /// Resolve an instance by name, deploying it when absent
    #[instrument(skip(self, request), fields(instance = %request.name))]
    pub async fn get_or_create_vm_instance(
        &self,
        request: &DeployVmRequest,
    ) -> Result<VmRecord, CloudError> {
        get_or_create(
            || self.cloud.find_vm(&request.name),
            || self.cloud.deploy_vm(request),
        )
        .await
    }

    /// Destroy an instance; an instance that is already gone counts as destroyed
    pub async fn destroy_vm_instance(&self, id: &str) -> Result<(), CloudError> {
        match self.cloud.destroy_vm(id).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockCloudApi;
    use crate::memory::{MemoryCloud, ROOT_DOMAIN_ID};
    use crate::types::{AffinityGroupRecord, DomainRecord};
    use capc_common::crd::NetworkType;

    fn broker(cloud: &Arc<MemoryCloud>) -> Broker {
        Broker::new(cloud.clone())
    }

    fn nested_domain() -> Domain {
        Domain {
            name: "tooBlah".to_string(),
            path: "ROOT/someNewDomain/tooBlah".to_string(),
            id: String::new(),
        }
    }

    fn transport(command: &str) -> CloudError {
        CloudError::Transport {
            command: command.to_string(),
            message: "connection reset by peer".to_string(),
        }
    }

    // ==========================================================================
    // Story Tests: Domain Path Resolution
    // ==========================================================================

    /// Story: absence of a domain is an answer, not a failure
    #[tokio::test]
    async fn story_domain_lookup_reports_absence() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let root = broker.get_domain_by_path(&OrgPath::parse("ROOT/")).await.unwrap();
        assert_eq!(root.as_deref(), Some(ROOT_DOMAIN_ID));

        let missing = broker
            .get_domain_by_path(&OrgPath::parse("ROOT/blahnotpresent"))
            .await
            .unwrap();
        assert_eq!(missing, None);
    }

    /// Story: a nested path is materialized one level at a time, and only
    /// the missing levels are created
    #[tokio::test]
    async fn story_nested_path_creates_only_missing_levels() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut domain = nested_domain();
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(cloud.create_count("domain"), 2);
        assert_eq!(domain.name, "tooBlah");
        assert_eq!(domain.path, "ROOT/someNewDomain/tooBlah");
        assert!(!domain.id.is_empty());

        // Parent exists, leaf missing: one creation
        let cloud = Arc::new(MemoryCloud::new());
        let broker = Broker::new(cloud.clone());
        let parent_id = broker
            .create_domain_under_parent(ROOT_DOMAIN_ID, "someNewDomain")
            .await
            .unwrap();
        let before = cloud.create_count("domain");
        let mut domain = nested_domain();
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(cloud.create_count("domain") - before, 1);
        assert_ne!(domain.id, parent_id);
    }

    /// Story: re-running resolution is a no-op with the same identity
    #[tokio::test]
    async fn story_domain_resolution_is_idempotent() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut first = nested_domain();
        broker.get_or_create_domain(&mut first).await.unwrap();
        let creates = cloud.total_creates();

        let mut second = nested_domain();
        broker.get_or_create_domain(&mut second).await.unwrap();
        assert_eq!(cloud.total_creates(), creates);
        assert_eq!(first, second);
    }

    /// Story: a relative path is anchored at the root and normalized
    #[tokio::test]
    async fn story_relative_path_is_normalized() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut domain = Domain {
            name: "blah".to_string(),
            path: "blah".to_string(),
            id: String::new(),
        };
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(domain.name, "blah");
        assert_eq!(domain.path, "ROOT/blah");

        let id = domain.id.clone();
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(domain.id, id);
        assert_eq!(domain.path, "ROOT/blah");
    }

    /// Story: the bare root needs no creation at all
    #[tokio::test]
    async fn story_root_path_resolves_without_creation() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut domain = Domain::at_path("ROOT/");
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(domain.id, ROOT_DOMAIN_ID);
        assert_eq!(domain.name, "ROOT");
        assert_eq!(domain.path, "ROOT");
        assert_eq!(cloud.total_creates(), 0);
    }

    /// Story: losing a creation race to another reconciler is success
    #[tokio::test]
    async fn story_creation_race_converges() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        cloud.race_next_create();
        let mut loser = Domain::at_path("ROOT/raced");
        broker.get_or_create_domain(&mut loser).await.unwrap();

        let mut winner = Domain::at_path("ROOT/raced");
        broker.get_or_create_domain(&mut winner).await.unwrap();
        assert_eq!(loser.id, winner.id);
        assert_eq!(cloud.create_count("domain"), 1);
    }

    /// Story: concurrent resolutions of one path agree on one identity
    #[tokio::test]
    async fn story_concurrent_resolution_agrees() {
        let cloud = Arc::new(MemoryCloud::new());
        let a = broker(&cloud);
        let b = broker(&cloud);

        let mut left = nested_domain();
        let mut right = nested_domain();
        let (l, r) = tokio::join!(
            a.get_or_create_domain(&mut left),
            b.get_or_create_domain(&mut right)
        );
        l.unwrap();
        r.unwrap();
        assert_eq!(left.id, right.id);
        assert_eq!(cloud.create_count("domain"), 2);
    }

    /// Story: a collision whose winner cannot be found is reported
    #[tokio::test]
    async fn story_collision_without_winner_is_an_error() {
        let mut mock = MockCloudApi::new();
        mock.expect_find_domain_by_path().returning(|path| {
            if path.is_root() {
                Ok(DomainRecord {
                    id: "root".to_string(),
                    name: "ROOT".to_string(),
                    path: "ROOT".to_string(),
                })
            } else {
                Err(CloudError::not_found("domain", path.to_string()))
            }
        });
        mock.expect_create_domain()
            .times(1)
            .returning(|_, name| Err(CloudError::already_exists("domain", name)));

        let broker = Broker::new(Arc::new(mock));
        let mut domain = Domain::at_path("ROOT/ghost");
        let err = broker.get_or_create_domain(&mut domain).await.unwrap_err();
        assert!(err.is_already_exists());
        assert!(domain.id.is_empty());
    }

    /// Story: remote errors other than absence and collision pass through
    #[tokio::test]
    async fn story_transient_errors_propagate_unchanged() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        cloud.inject_failure("create_domain", transport("createDomain"));
        let mut domain = nested_domain();
        let err = broker.get_or_create_domain(&mut domain).await.unwrap_err();
        assert_eq!(err, transport("createDomain"));
        assert!(domain.id.is_empty());

        // The retry picks up where the failure left off
        broker.get_or_create_domain(&mut domain).await.unwrap();
        assert_eq!(cloud.create_count("domain"), 2);
    }

    // ==========================================================================
    // Story Tests: Accounts and Users
    // ==========================================================================

    /// Story: an account resolves its domain first
    #[tokio::test]
    async fn story_account_resolves_domain_then_account() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut account = Account {
            name: "TempTestAccount".to_string(),
            domain: Domain::at_path("ROOT/someNewDomain/tooBlah"),
            id: String::new(),
        };
        broker.get_or_create_account(&mut account).await.unwrap();
        assert!(!account.id.is_empty());
        assert_eq!(account.domain.name, "tooBlah");
        assert_eq!(cloud.create_count("account"), 1);

        let id = account.id.clone();
        broker.get_or_create_account(&mut account).await.unwrap();
        assert_eq!(account.id, id);
        assert_eq!(cloud.create_count("account"), 1);
    }

    /// Story: an account collision converges on the existing account
    #[tokio::test]
    async fn story_account_collision_is_success() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut account = Account {
            name: "raced".to_string(),
            domain: Domain::at_path("ROOT"),
            id: String::new(),
        };
        cloud.race_next_create();
        broker.get_or_create_account(&mut account).await.unwrap();
        assert!(!account.id.is_empty());
    }

    /// Story: a user comes back with keys, and the username defaults to the
    /// account name
    #[tokio::test]
    async fn story_user_is_created_with_keys() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut user = User {
            account: Account {
                name: "TempTestAccount".to_string(),
                domain: Domain::at_path("ROOT/someNewDomain/tooBlah"),
                id: String::new(),
            },
            ..Default::default()
        };
        broker.get_or_create_user_with_key(&mut user).await.unwrap();
        assert_eq!(user.username, "TempTestAccount");
        assert!(!user.id.is_empty());
        assert!(!user.api_key.is_empty());
        assert!(!user.secret_key.is_empty());

        let mut again = User {
            account: user.account.clone(),
            ..Default::default()
        };
        broker.get_or_create_user_with_key(&mut again).await.unwrap();
        assert_eq!(again, user);
        assert_eq!(cloud.create_count("user"), 1);
        assert_eq!(cloud.create_count("user keys"), 1);
    }

    /// Story: a failed key generation leaves the caller's user untouched, and
    /// the retry finishes the job
    #[tokio::test]
    async fn story_user_is_never_partially_visible() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut user = User {
            account: Account {
                name: "acct".to_string(),
                domain: Domain::at_path("ROOT"),
                id: String::new(),
            },
            ..Default::default()
        };
        cloud.inject_failure("register_user_keys", transport("registerUserKeys"));
        assert!(broker.get_or_create_user_with_key(&mut user).await.is_err());
        assert!(user.id.is_empty());
        assert!(user.api_key.is_empty());

        broker.get_or_create_user_with_key(&mut user).await.unwrap();
        assert!(!user.id.is_empty());
        assert!(!user.api_key.is_empty());
        assert_eq!(cloud.create_count("user"), 1);
    }

    // ==========================================================================
    // Story Tests: Affinity Groups
    // ==========================================================================

    /// Story: an affinity group is created once and reused
    #[tokio::test]
    async fn story_affinity_group_get_or_create() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let mut group = AffinityGroup {
            name: "fakeaffinitygroup".to_string(),
            type_: "host anti-affinity".to_string(),
            failure_domain_name: "fd1".to_string(),
            ..Default::default()
        };
        broker.get_or_create_affinity_group(&mut group).await.unwrap();
        assert!(!group.id.is_empty());

        let mut again = AffinityGroup {
            id: String::new(),
            ..group.clone()
        };
        broker.get_or_create_affinity_group(&mut again).await.unwrap();
        assert_eq!(again.id, group.id);
        assert_eq!(cloud.create_count("affinity group"), 1);
    }

    /// Story: a group outside any failure domain is rejected before any call
    #[tokio::test]
    async fn story_affinity_group_requires_failure_domain() {
        let mock = MockCloudApi::new();
        let broker = Broker::new(Arc::new(mock));

        let mut group = AffinityGroup {
            name: "g".to_string(),
            ..Default::default()
        };
        let err = broker.get_or_create_affinity_group(&mut group).await.unwrap_err();
        assert!(matches!(err, CloudError::InvalidInput(_)));
    }

    /// Story: deleting a group twice is fine
    #[tokio::test]
    async fn story_affinity_group_delete_is_idempotent() {
        let mut mock = MockCloudApi::new();
        mock.expect_find_affinity_group().returning(|name| {
            Ok(AffinityGroupRecord {
                id: "ag-1".to_string(),
                name: name.to_string(),
                type_: "host affinity".to_string(),
            })
        });
        mock.expect_delete_affinity_group()
            .times(1)
            .returning(|id| Err(CloudError::not_found("affinity group", id)));

        let broker = Broker::new(Arc::new(mock));
        let group = AffinityGroup {
            name: "g".to_string(),
            failure_domain_name: "fd1".to_string(),
            ..Default::default()
        };
        broker.delete_affinity_group(&group).await.unwrap();
    }

    // ==========================================================================
    // Story Tests: Networks and Instances
    // ==========================================================================

    /// Story: shared networks are only ever looked up
    #[tokio::test]
    async fn story_shared_network_is_never_created() {
        let cloud = Arc::new(MemoryCloud::new().with_zone("Zone1", "z1"));
        let broker = broker(&cloud);

        let mut network = Network {
            name: "SharedGuestNet1".to_string(),
            ..Default::default()
        };
        let err = broker
            .resolve_shared_network(&mut network, "z1")
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(cloud.total_creates(), 0);

        let cloud = Arc::new(
            MemoryCloud::new()
                .with_zone("Zone1", "z1")
                .with_shared_network("SharedGuestNet1", "z1"),
        );
        let broker = Broker::new(cloud.clone());
        broker.resolve_shared_network(&mut network, "z1").await.unwrap();
        assert!(!network.id.is_empty());
        assert_eq!(network.type_, NetworkType::Shared);
    }

    /// Story: isolated networks are created on demand
    #[tokio::test]
    async fn story_isolated_network_get_or_create() {
        let cloud = Arc::new(MemoryCloud::new().with_zone("Zone2", "z2"));
        let broker = broker(&cloud);

        let zone = Zone {
            name: "Zone2".to_string(),
            id: String::new(),
            network: None,
        };
        let zone_id = broker.resolve_zone_id(&zone).await.unwrap();
        assert_eq!(zone_id, "z2");

        let mut network = Network {
            name: "isoguestnet1".to_string(),
            ..Default::default()
        };
        broker
            .get_or_create_isolated_network(&mut network, &zone_id)
            .await
            .unwrap();
        broker
            .get_or_create_isolated_network(&mut network, &zone_id)
            .await
            .unwrap();
        assert_eq!(network.type_, NetworkType::Isolated);
        assert_eq!(cloud.create_count("network"), 1);
    }

    /// Story: an instance is deployed once per name
    #[tokio::test]
    async fn story_instance_get_or_create_and_destroy() {
        let cloud = Arc::new(MemoryCloud::new());
        let broker = broker(&cloud);

        let request = DeployVmRequest {
            name: "test-machine".to_string(),
            ..Default::default()
        };
        let vm = broker.get_or_create_vm_instance(&request).await.unwrap();
        let again = broker.get_or_create_vm_instance(&request).await.unwrap();
        assert_eq!(vm.id, again.id);
        assert_eq!(cloud.create_count("virtual machine"), 1);

        broker.destroy_vm_instance(&vm.id).await.unwrap();
        broker.destroy_vm_instance(&vm.id).await.unwrap();
        assert!(!cloud.has_vm("test-machine"));
    }
}
