//! Owner graph resolution
//!
//! Infrastructure objects point back at the CAPI objects that caused them
//! through owner references. This module answers three questions about that
//! graph: which object manages a machine, what is the owner of a given kind,
//! and has a machine's manager finished deleting.
//!
//! Control planes and machine sets delete differently. A KubeadmControlPlane
//! lingers with a deletion timestamp until its machines are gone, so only a
//! control plane without one counts as alive. A MachineSet disappears as soon
//! as it is deleted, so its existence alone is the signal.

use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::{Api, DynamicObject, GroupVersionKind};
use kube::discovery::ApiResource;
use kube::{Client, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use capc_common::crd::capi::{Machine, CAPI_GROUP, CONTROL_PLANE_GROUP, ETCD_CLUSTER_GROUP};
use capc_common::error::OwnershipFailure;
use capc_common::kube_utils::{api_resource_for, parse_api_version};
use capc_common::scheme::Scheme;
use capc_common::Error;

/// Kinds that can manage a CAPI machine
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OwnerKind {
    /// Kubeadm control plane, manager of control plane machines
    KubeadmControlPlane,
    /// Worker machine set
    MachineSet,
    /// External etcd cluster
    EtcdadmCluster,
}

/// Managers consulted for a control plane machine
const CONTROL_PLANE_PRIORITY: &[OwnerKind] = &[OwnerKind::KubeadmControlPlane];

/// Managers consulted for any other machine, first match wins
const WORKER_PRIORITY: &[OwnerKind] = &[OwnerKind::MachineSet, OwnerKind::EtcdadmCluster];

impl OwnerKind {
    /// Kubernetes kind name
    pub const fn kind(self) -> &'static str {
        match self {
            Self::KubeadmControlPlane => "KubeadmControlPlane",
            Self::MachineSet => "MachineSet",
            Self::EtcdadmCluster => "EtcdadmCluster",
        }
    }

    /// API group serving the kind
    pub const fn group(self) -> &'static str {
        match self {
            Self::KubeadmControlPlane => CONTROL_PLANE_GROUP,
            Self::MachineSet => CAPI_GROUP,
            Self::EtcdadmCluster => ETCD_CLUSTER_GROUP,
        }
    }

    /// Managers to look for, in priority order
    pub fn priority(control_plane: bool) -> &'static [OwnerKind] {
        if control_plane {
            CONTROL_PLANE_PRIORITY
        } else {
            WORKER_PRIORITY
        }
    }

    /// True when the reference names this kind
    pub fn matches(self, reference: &OwnerReference) -> bool {
        reference.kind == self.kind()
    }

    /// True when the reference names this kind in its own API group
    pub fn matches_exactly(self, reference: &OwnerReference) -> bool {
        let (group, _) = parse_api_version(&reference.api_version);
        self.matches(reference) && group == self.group()
    }

    /// REST resource for this kind at the version the reference carries
    pub fn api_resource(self, reference: &OwnerReference) -> ApiResource {
        let (_, version) = parse_api_version(&reference.api_version);
        api_resource_for(&GroupVersionKind::gvk(self.group(), &version, self.kind()))
    }
}

/// Read access to arbitrary owner objects
///
/// Returns `Ok(None)` when the object does not exist; every other failure is
/// an error.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait OwnerLookup: Send + Sync {
    /// Fetch one object of `resource` by namespace and name
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error>;
}

/// [`OwnerLookup`] backed by the API server
pub struct KubeOwnerLookup {
    client: Client,
}

impl KubeOwnerLookup {
    /// Create a lookup using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OwnerLookup for KubeOwnerLookup {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, Error> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, resource);
        Ok(api.get_opt(name).await?)
    }
}

/// The owner reference of the object managing `machine`.
///
/// A control plane machine is managed by its KubeadmControlPlane even when it
/// also carries a MachineSet reference. Other machines are managed by their
/// MachineSet, failing that by an EtcdadmCluster.
pub fn management_owner_ref(machine: &Machine) -> Option<&OwnerReference> {
    let references = machine.owner_references();
    OwnerKind::priority(machine.is_control_plane())
        .iter()
        .find_map(|kind| references.iter().find(|r| kind.matches(r)))
}

/// Fetch the owner of `owned` whose kind is registered for `K`.
///
/// The owner is looked up by the reference's name in the namespace of
/// `owned`. Fails when `K` maps to zero or several kinds, when no reference
/// of that kind exists, or when the fetch fails.
pub async fn get_owner_of_kind<K>(
    scheme: &Scheme,
    lookup: &dyn OwnerLookup,
    owned: &ObjectMeta,
) -> Result<K, Error>
where
    K: DeserializeOwned + 'static,
{
    let name = owned.name.clone().unwrap_or_default();
    let namespace = owned.namespace.clone().unwrap_or_default();

    let gvk = match scheme.object_kinds::<K>() {
        [gvk] => gvk,
        [] => {
            return Err(Error::ownership(
                OwnershipFailure::UnregisteredKind,
                &name,
                std::any::type_name::<K>(),
                &namespace,
                format!("finding owner kind for {}/{}: type is not registered", name, namespace),
            ))
        }
        _ => {
            return Err(Error::ownership(
                OwnershipFailure::AmbiguousKind,
                &name,
                std::any::type_name::<K>(),
                &namespace,
                format!(
                    "found more than one GVK for owner when finding owner kind for {}/{}",
                    name, namespace
                ),
            ))
        }
    };

    let Some(reference) = owned
        .owner_references
        .iter()
        .flatten()
        .find(|r| r.kind == gvk.kind)
    else {
        return Err(Error::ownership(
            OwnershipFailure::NoReference,
            &name,
            &gvk.kind,
            &namespace,
            format!("couldn't find owner of kind {} in namespace {}", gvk.kind, namespace),
        ));
    };

    let fetch_error = |detail: String| {
        Error::ownership(
            OwnershipFailure::Fetch,
            &name,
            &gvk.kind,
            &namespace,
            format!(
                "finding owner of kind {} in namespace {}: {}",
                gvk.kind, namespace, detail
            ),
        )
    };

    let owner = lookup
        .get(&api_resource_for(gvk), &namespace, &reference.name)
        .await
        .map_err(|e| fetch_error(e.to_string()))?
        .ok_or_else(|| fetch_error(format!("{} {:?} not found", gvk.kind, reference.name)))?;

    let value = serde_json::to_value(&owner)
        .map_err(|e| Error::serialization_for_kind(&gvk.kind, e.to_string()))?;
    serde_json::from_value(value).map_err(|e| Error::serialization_for_kind(&gvk.kind, e.to_string()))
}

/// Whether the object managing `machine` has finished deleting.
///
/// A machine without a manager of the expected kind counts as orphaned, and
/// therefore as deleted.
pub async fn is_owner_deleted(lookup: &dyn OwnerLookup, machine: &Machine) -> Result<bool, Error> {
    let manager = if machine.is_control_plane() {
        OwnerKind::KubeadmControlPlane
    } else {
        OwnerKind::MachineSet
    };

    let Some(reference) = management_owner_ref(machine) else {
        debug!(machine = %machine.name_any(), "no management owner");
        return Ok(true);
    };
    if !manager.matches_exactly(reference) {
        return Ok(true);
    }

    let namespace = machine.namespace().unwrap_or_default();
    let owner = lookup
        .get(&manager.api_resource(reference), &namespace, &reference.name)
        .await?;

    Ok(match (manager, owner) {
        (_, None) => true,
        (OwnerKind::KubeadmControlPlane, Some(cp)) => cp.metadata.deletion_timestamp.is_some(),
        (_, Some(_)) => false,
    })
}
