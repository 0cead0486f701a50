//! Cloud clients per failure domain
//!
//! A failure domain names the Secret holding its endpoint and root keys.
//! When it also names an account, the root client is only used to resolve
//! (or create) that account's user, and resources are managed with the
//! user's own keys.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capc_cloud::{Account, Broker, CloudApi, CloudCredentials, Domain, HttpCloudClient, User};
use capc_common::crd::{CloudStackFailureDomainSpec, SecretRef};
use capc_common::Error;

use crate::client::KubeClient;

/// Builds cloud clients from endpoint secrets
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClientFactory: Send + Sync {
    /// Client authenticated with the keys stored in `secret`
    async fn endpoint_client(&self, secret: &SecretRef) -> Result<Arc<dyn CloudApi>, Error>;

    /// Client at the endpoint of `secret`, authenticated with the given keys
    async fn user_client(
        &self,
        secret: &SecretRef,
        api_key: &str,
        secret_key: &str,
    ) -> Result<Arc<dyn CloudApi>, Error>;
}

/// [`ClientFactory`] reading secrets through the cluster API
pub struct ClientFactoryImpl {
    kube: Arc<dyn KubeClient>,
}

impl ClientFactoryImpl {
    /// Create a factory reading secrets with `kube`
    pub fn new(kube: Arc<dyn KubeClient>) -> Self {
        Self { kube }
    }

    async fn credentials(&self, secret: &SecretRef) -> Result<CloudCredentials, Error> {
        let data = self
            .kube
            .get_secret_data(&secret.name, &secret.namespace)
            .await?
            .ok_or_else(|| {
                Error::cloud_permanent(
                    "credentials",
                    format!("secret {}/{} not found", secret.namespace, secret.name),
                )
            })?;
        Ok(CloudCredentials::from_secret_data(&data)?)
    }
}

#[async_trait]
impl ClientFactory for ClientFactoryImpl {
    async fn endpoint_client(&self, secret: &SecretRef) -> Result<Arc<dyn CloudApi>, Error> {
        let credentials = self.credentials(secret).await?;
        Ok(Arc::new(HttpCloudClient::new(credentials)?))
    }

    async fn user_client(
        &self,
        secret: &SecretRef,
        api_key: &str,
        secret_key: &str,
    ) -> Result<Arc<dyn CloudApi>, Error> {
        let credentials = self.credentials(secret).await?.with_keys(api_key, secret_key);
        Ok(Arc::new(HttpCloudClient::new(credentials)?))
    }
}

/// Broker acting for a failure domain.
///
/// Without an account this is the endpoint's root identity. With one, the
/// account's domain, the account and a keyed user are resolved first and the
/// broker acts as that user.
pub async fn broker_for_failure_domain(
    clouds: &dyn ClientFactory,
    spec: &CloudStackFailureDomainSpec,
) -> Result<Broker, Error> {
    let root = Broker::new(clouds.endpoint_client(&spec.acs_endpoint).await?);

    let Some(account_name) = spec.account.as_deref().filter(|a| !a.is_empty()) else {
        return Ok(root);
    };

    let mut user = User {
        account: Account {
            name: account_name.to_string(),
            domain: Domain::at_path(spec.domain.clone().unwrap_or_default()),
            ..Default::default()
        },
        ..Default::default()
    };
    root.get_or_create_user_with_key(&mut user).await?;
    debug!(
        account = %user.account.name,
        domain = %user.account.domain.path,
        user = %user.username,
        "acting as account user"
    );

    let cloud = clouds
        .user_client(&spec.acs_endpoint, &user.api_key, &user.secret_key)
        .await?;
    Ok(Broker::new(cloud))
}

#[cfg(test)]
mod tests {
    use super::*;
    use capc_cloud::memory::MemoryCloud;
    use capc_common::crd::Zone;
    use capc_common::fixtures;

    fn factory_for(cloud: Arc<MemoryCloud>) -> MockClientFactory {
        let mut clouds = MockClientFactory::new();
        let endpoint = cloud.clone();
        clouds
            .expect_endpoint_client()
            .returning(move |_| Ok(endpoint.clone() as Arc<dyn CloudApi>));
        clouds
            .expect_user_client()
            .returning(move |_, _, _| Ok(cloud.clone() as Arc<dyn CloudApi>));
        clouds
    }

    // ==========================================================================
    // Story Tests: Acting for a Failure Domain
    // ==========================================================================

    /// Story: without an account the endpoint keys are used directly
    #[tokio::test]
    async fn story_root_identity_without_account() {
        let cloud = Arc::new(MemoryCloud::new());
        let spec = fixtures::failure_domain("fd1", fixtures::zone1()).spec;

        broker_for_failure_domain(&factory_for(cloud.clone()), &spec)
            .await
            .unwrap();
        assert_eq!(cloud.total_creates(), 0);
    }

    /// Story: an account is provisioned down to a keyed user, once
    #[tokio::test]
    async fn story_account_user_is_provisioned() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut spec = fixtures::failure_domain("fd1", Zone::default()).spec;
        spec.account = Some("capc-account".to_string());
        spec.domain = Some("ROOT/tenants/team-a".to_string());

        let clouds = factory_for(cloud.clone());
        broker_for_failure_domain(&clouds, &spec).await.unwrap();
        assert_eq!(cloud.create_count("domain"), 2);
        assert_eq!(cloud.create_count("account"), 1);
        assert_eq!(cloud.create_count("user"), 1);

        broker_for_failure_domain(&clouds, &spec).await.unwrap();
        assert_eq!(cloud.create_count("domain"), 2);
        assert_eq!(cloud.create_count("user"), 1);
    }

    /// Story: a missing endpoint secret surfaces as a permanent error
    #[tokio::test]
    async fn story_missing_secret_is_permanent() {
        use crate::client::MockKubeClient;

        let mut kube = MockKubeClient::new();
        kube.expect_get_secret_data().returning(|_, _| Ok(None));
        let factory = ClientFactoryImpl::new(Arc::new(kube));

        let secret = SecretRef {
            name: fixtures::ENDPOINT_SECRET.to_string(),
            namespace: fixtures::NAMESPACE.to_string(),
        };
        let err = factory.endpoint_client(&secret).await.err().unwrap();
        assert!(err.to_string().contains("not found"));
        assert!(!err.is_retryable());
    }

    /// Story: endpoint secrets build a real HTTP client
    #[tokio::test]
    async fn story_endpoint_secret_builds_client() {
        use crate::client::MockKubeClient;

        let mut kube = MockKubeClient::new();
        kube.expect_get_secret_data()
            .returning(|_, _| Ok(Some(fixtures::endpoint_secret_data())));
        let factory = ClientFactoryImpl::new(Arc::new(kube));

        let secret = SecretRef {
            name: fixtures::ENDPOINT_SECRET.to_string(),
            namespace: fixtures::NAMESPACE.to_string(),
        };
        assert!(factory.endpoint_client(&secret).await.is_ok());
        assert!(factory.user_client(&secret, "k", "s").await.is_ok());
    }
}
