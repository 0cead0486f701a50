//! Registry mapping Rust types to the Kubernetes kinds they represent
//!
//! Owner lookups are driven by a prototype type (`get_owner_of_kind::<Machine>`).
//! The scheme resolves that type to exactly one registered kind; an
//! unregistered or aliased type is a configuration error.

use std::any::TypeId;
use std::collections::HashMap;

use kube::api::GroupVersionKind;
use kube::Resource;

use crate::crd::capi::{Cluster, KubeadmControlPlane, Machine, MachineSet};
use crate::crd::{
    CloudStackAffinityGroup, CloudStackCluster, CloudStackFailureDomain,
    CloudStackIsolatedNetwork, CloudStackMachine, CloudStackMachineTemplate,
};

/// Type-to-kind registry, built once at startup and shared read-only.
#[derive(Debug, Default, Clone)]
pub struct Scheme {
    kinds: HashMap<TypeId, Vec<GroupVersionKind>>,
}

impl Scheme {
    /// Create an empty scheme
    pub fn new() -> Self {
        Self::default()
    }

    /// Scheme with every kind the provider reconciles or reads
    pub fn with_provider_kinds() -> Self {
        Self::new()
            .register::<CloudStackCluster>()
            .register::<CloudStackMachine>()
            .register::<CloudStackMachineTemplate>()
            .register::<CloudStackFailureDomain>()
            .register::<CloudStackAffinityGroup>()
            .register::<CloudStackIsolatedNetwork>()
            .register::<Cluster>()
            .register::<Machine>()
            .register::<MachineSet>()
            .register::<KubeadmControlPlane>()
    }

    /// Register a statically typed resource under its own kind
    pub fn register<K>(self) -> Self
    where
        K: Resource<DynamicType = ()> + 'static,
    {
        let gvk = GroupVersionKind::gvk(&K::group(&()), &K::version(&()), &K::kind(&()));
        self.register_kind::<K>(gvk)
    }

    /// Register an additional kind for a type
    pub fn register_kind<K: 'static>(mut self, gvk: GroupVersionKind) -> Self {
        let entry = self.kinds.entry(TypeId::of::<K>()).or_default();
        if !entry.contains(&gvk) {
            entry.push(gvk);
        }
        self
    }

    /// All kinds registered for a type; empty when unregistered
    pub fn object_kinds<K: 'static>(&self) -> &[GroupVersionKind] {
        self.kinds
            .get(&TypeId::of::<K>())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Number of registered types
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kinds_resolve_to_one_kind_each() {
        let scheme = Scheme::with_provider_kinds();
        assert_eq!(scheme.len(), 10);

        let kinds = scheme.object_kinds::<KubeadmControlPlane>();
        assert_eq!(kinds.len(), 1);
        assert_eq!(kinds[0].kind, "KubeadmControlPlane");
        assert_eq!(kinds[0].group, "controlplane.cluster.x-k8s.io");

        assert_eq!(scheme.object_kinds::<Machine>()[0].group, "cluster.x-k8s.io");
    }

    #[test]
    fn unregistered_types_have_no_kinds() {
        let scheme = Scheme::new().register::<Machine>();
        assert!(scheme.object_kinds::<MachineSet>().is_empty());
    }

    #[test]
    fn aliasing_a_type_yields_multiple_kinds() {
        let scheme = Scheme::new()
            .register::<Machine>()
            .register_kind::<Machine>(GroupVersionKind::gvk("cluster.x-k8s.io", "v1alpha4", "Machine"));
        assert_eq!(scheme.object_kinds::<Machine>().len(), 2);

        // re-registering the same kind is idempotent
        let scheme = scheme.register::<Machine>();
        assert_eq!(scheme.object_kinds::<Machine>().len(), 2);
    }
}
