//! Custom Resource Definitions for the CloudStack provider
//!
//! The infrastructure CRDs served by this provider, plus partial views of
//! the CAPI kinds it reads.

mod affinity_group;
pub mod capi;
mod cluster;
mod failure_domain;
mod isolated_network;
mod machine;
mod machine_template;
mod types;

use kube::CustomResourceExt;

pub use affinity_group::{
    CloudStackAffinityGroup, CloudStackAffinityGroupSpec, CloudStackAffinityGroupStatus,
    AFFINITY_GROUP_FINALIZER,
};
pub use cluster::{
    CloudStackCluster, CloudStackClusterSpec, CloudStackClusterStatus, FailureDomainAdvert,
    DEFAULT_CREDENTIALS_SECRET,
};
pub use failure_domain::{
    CloudStackFailureDomain, CloudStackFailureDomainSpec, CloudStackFailureDomainStatus,
};
pub use isolated_network::{
    CloudStackIsolatedNetwork, CloudStackIsolatedNetworkSpec, CloudStackIsolatedNetworkStatus,
};
pub use machine::{
    Affinity, CloudStackMachine, CloudStackMachineSpec, CloudStackMachineStatus, DiskOffering,
    INSTANCE_STATE_RUNNING, PROVIDER_ID_PREFIX,
};
pub use machine_template::{
    CloudStackMachineTemplate, CloudStackMachineTemplateResource, CloudStackMachineTemplateSpec,
};
pub use types::{
    conditions_changed, ApiEndpoint, Condition, ConditionStatus, IdentityRef, NetworkSpec,
    NetworkType, ReconcilePhase, ResourceIdentifier, SecretRef, Zone, IDENTITY_REF_SECRET_KIND,
};

/// All CRDs this provider installs, in install order
pub fn all_crds(
) -> Vec<k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition>
{
    vec![
        CloudStackCluster::crd(),
        CloudStackFailureDomain::crd(),
        CloudStackIsolatedNetwork::crd(),
        CloudStackAffinityGroup::crd(),
        CloudStackMachine::crd(),
        CloudStackMachineTemplate::crd(),
    ]
}
