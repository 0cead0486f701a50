//! Kubernetes access used by the reconcilers
//!
//! Every read and write a reconciler performs goes through [`KubeClient`] so
//! reconcile logic can be tested against a mock.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, DeleteParams, Patch, PatchParams};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capc_common::crd::capi::Machine;
use capc_common::crd::{
    CloudStackAffinityGroup, CloudStackAffinityGroupStatus, CloudStackCluster,
    CloudStackClusterStatus, CloudStackFailureDomain, CloudStackFailureDomainStatus,
    CloudStackIsolatedNetwork, CloudStackIsolatedNetworkStatus, CloudStackMachine,
    CloudStackMachineStatus,
};
use capc_common::{Error, FIELD_MANAGER};

/// Key of the rendered bootstrap data in a bootstrap secret
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Trait abstracting Kubernetes client operations for the reconcilers
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Patch the status of a CloudStackCluster
    async fn patch_cluster_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackClusterStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a CloudStackFailureDomain
    async fn patch_failure_domain_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackFailureDomainStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a CloudStackIsolatedNetwork
    async fn patch_isolated_network_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackIsolatedNetworkStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a CloudStackAffinityGroup
    async fn patch_affinity_group_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackAffinityGroupStatus,
    ) -> Result<(), Error>;

    /// Patch the status of a CloudStackMachine
    async fn patch_machine_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackMachineStatus,
    ) -> Result<(), Error>;

    /// Record the provider ID on a CloudStackMachine spec
    async fn patch_machine_provider_id(
        &self,
        name: &str,
        namespace: &str,
        provider_id: &str,
    ) -> Result<(), Error>;

    /// Create or update a failure domain (server-side apply)
    async fn apply_failure_domain(&self, domain: &CloudStackFailureDomain) -> Result<(), Error>;

    /// Create or update an isolated network (server-side apply)
    async fn apply_isolated_network(
        &self,
        network: &CloudStackIsolatedNetwork,
    ) -> Result<(), Error>;

    /// Create or update an affinity group (server-side apply)
    async fn apply_affinity_group(&self, group: &CloudStackAffinityGroup) -> Result<(), Error>;

    /// Get a failure domain by name
    async fn get_failure_domain(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackFailureDomain>, Error>;

    /// Get an isolated network by name
    async fn get_isolated_network(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackIsolatedNetwork>, Error>;

    /// Get an affinity group by name
    async fn get_affinity_group(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackAffinityGroup>, Error>;

    /// Decoded contents of a Secret, `None` when it does not exist
    async fn get_secret_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error>;

    /// Rendered bootstrap data held by a bootstrap secret
    async fn get_bootstrap_data(&self, name: &str, namespace: &str)
        -> Result<Option<String>, Error>;

    /// Add a finalizer to a CloudStackAffinityGroup
    async fn add_affinity_group_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a CloudStackAffinityGroup
    async fn remove_affinity_group_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Add a finalizer to a CloudStackMachine
    async fn add_machine_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Remove a finalizer from a CloudStackMachine
    async fn remove_machine_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>;

    /// Delete a CAPI Machine so its manager replaces it
    ///
    /// A machine that is already gone counts as deleted.
    async fn delete_capi_machine(&self, name: &str, namespace: &str) -> Result<(), Error>;
}

/// Real Kubernetes client implementation
pub struct KubeClientImpl {
    client: Client,
}

impl KubeClientImpl {
    /// Create a new KubeClientImpl wrapping the given kube Client
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>,
    {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn patch_status<K, S>(&self, name: &str, namespace: &str, status: &S) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
        S: Serialize + Sync,
    {
        let status_patch = serde_json::json!({
            "status": status
        });

        self.api::<K>(namespace)
            .patch_status(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&status_patch),
            )
            .await?;

        Ok(())
    }

    async fn apply<K>(&self, obj: &K) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Serialize
            + Debug,
    {
        let name = obj.name_any();
        let namespace = obj.namespace().ok_or_else(|| {
            Error::internal_with_context("apply", format!("{} has no namespace", name))
        })?;

        self.api::<K>(&namespace)
            .patch(
                &name,
                &PatchParams::apply(FIELD_MANAGER).force(),
                &Patch::Apply(obj),
            )
            .await?;

        debug!(name = %name, namespace = %namespace, kind = %K::kind(&()), "applied");
        Ok(())
    }

    async fn get<K>(&self, name: &str, namespace: &str) -> Result<Option<K>, Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        Ok(self.api::<K>(namespace).get_opt(name).await?)
    }

    async fn add_finalizer<K>(&self, name: &str, namespace: &str, finalizer: &str) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api = self.api::<K>(namespace);

        // Get current object to read existing finalizers
        let obj = api.get(name).await?;
        let mut finalizers = obj.meta().finalizers.clone().unwrap_or_default();

        if finalizers.iter().any(|f| f == finalizer) {
            return Ok(());
        }
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }

    async fn remove_finalizer<K>(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error>
    where
        K: Resource<Scope = NamespaceResourceScope, DynamicType = ()>
            + Clone
            + DeserializeOwned
            + Debug,
    {
        let api = self.api::<K>(namespace);

        let Some(obj) = api.get_opt(name).await? else {
            return Ok(());
        };
        let finalizers: Vec<String> = obj
            .meta()
            .finalizers
            .clone()
            .unwrap_or_default()
            .into_iter()
            .filter(|f| f != finalizer)
            .collect();

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });

        api.patch(
            name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&patch),
        )
        .await?;

        Ok(())
    }
}

#[async_trait]
impl KubeClient for KubeClientImpl {
    async fn patch_cluster_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackClusterStatus,
    ) -> Result<(), Error> {
        self.patch_status::<CloudStackCluster, _>(name, namespace, status)
            .await
    }

    async fn patch_failure_domain_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackFailureDomainStatus,
    ) -> Result<(), Error> {
        self.patch_status::<CloudStackFailureDomain, _>(name, namespace, status)
            .await
    }

    async fn patch_isolated_network_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackIsolatedNetworkStatus,
    ) -> Result<(), Error> {
        self.patch_status::<CloudStackIsolatedNetwork, _>(name, namespace, status)
            .await
    }

    async fn patch_affinity_group_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackAffinityGroupStatus,
    ) -> Result<(), Error> {
        self.patch_status::<CloudStackAffinityGroup, _>(name, namespace, status)
            .await
    }

    async fn patch_machine_status(
        &self,
        name: &str,
        namespace: &str,
        status: &CloudStackMachineStatus,
    ) -> Result<(), Error> {
        self.patch_status::<CloudStackMachine, _>(name, namespace, status)
            .await
    }

    async fn patch_machine_provider_id(
        &self,
        name: &str,
        namespace: &str,
        provider_id: &str,
    ) -> Result<(), Error> {
        let patch = serde_json::json!({
            "spec": {
                "providerID": provider_id
            }
        });

        self.api::<CloudStackMachine>(namespace)
            .patch(
                name,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;

        Ok(())
    }

    async fn apply_failure_domain(&self, domain: &CloudStackFailureDomain) -> Result<(), Error> {
        self.apply(domain).await
    }

    async fn apply_isolated_network(
        &self,
        network: &CloudStackIsolatedNetwork,
    ) -> Result<(), Error> {
        self.apply(network).await
    }

    async fn apply_affinity_group(&self, group: &CloudStackAffinityGroup) -> Result<(), Error> {
        self.apply(group).await
    }

    async fn get_failure_domain(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackFailureDomain>, Error> {
        self.get(name, namespace).await
    }

    async fn get_isolated_network(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackIsolatedNetwork>, Error> {
        self.get(name, namespace).await
    }

    async fn get_affinity_group(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<CloudStackAffinityGroup>, Error> {
        self.get(name, namespace).await
    }

    async fn get_secret_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<BTreeMap<String, String>>, Error> {
        let Some(secret) = self.get::<Secret>(name, namespace).await? else {
            return Ok(None);
        };
        Ok(Some(decode_secret_data(&secret)?))
    }

    async fn get_bootstrap_data(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Option<String>, Error> {
        Ok(self
            .get_secret_data(name, namespace)
            .await?
            .and_then(|mut data| data.remove(BOOTSTRAP_DATA_KEY)))
    }

    async fn add_affinity_group_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.add_finalizer::<CloudStackAffinityGroup>(name, namespace, finalizer)
            .await
    }

    async fn remove_affinity_group_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.remove_finalizer::<CloudStackAffinityGroup>(name, namespace, finalizer)
            .await
    }

    async fn add_machine_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.add_finalizer::<CloudStackMachine>(name, namespace, finalizer)
            .await
    }

    async fn remove_machine_finalizer(
        &self,
        name: &str,
        namespace: &str,
        finalizer: &str,
    ) -> Result<(), Error> {
        self.remove_finalizer::<CloudStackMachine>(name, namespace, finalizer)
            .await
    }

    async fn delete_capi_machine(&self, name: &str, namespace: &str) -> Result<(), Error> {
        match self
            .api::<Machine>(namespace)
            .delete(name, &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Flatten a Secret's `data` and `stringData` into UTF-8 strings
pub fn decode_secret_data(secret: &Secret) -> Result<BTreeMap<String, String>, Error> {
    let mut out = BTreeMap::new();
    for (key, value) in secret.data.iter().flatten() {
        let text = String::from_utf8(value.0.clone()).map_err(|e| {
            Error::serialization_for_kind("Secret", format!("key {}: {}", key, e))
        })?;
        out.insert(key.clone(), text);
    }
    for (key, value) in secret.string_data.iter().flatten() {
        out.insert(key.clone(), value.clone());
    }
    Ok(out)
}
