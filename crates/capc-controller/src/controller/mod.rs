//! Per-kind reconcilers
//!
//! Every reconciler walks its object through `Pending -> Reconciling -> Ready`.
//! Transient failures are returned to the controller runtime, which requeues
//! through [`error_policy`]. Errors that need a spec change mark the object
//! `Failed` and wait for the next edit.

pub mod affinity_group;
pub mod cluster;
pub mod failure_domain;
pub mod isolated_network;
pub mod machine;

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::error;

use capc_common::crd::{conditions_changed, Condition, ReconcilePhase};
use capc_common::kube_utils::{sanitize_name, with_cluster_suffix};
use capc_common::{Error, CLUSTER_NAME_LABEL};

use crate::context::Context;

/// Requeue delay after a failed reconcile
pub const ERROR_REQUEUE: Duration = Duration::from_secs(5);

/// Error policy shared by every controller
pub fn error_policy<K>(obj: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action
where
    K: Resource<DynamicType = ()>,
{
    error!(
        ?error,
        kind = %K::kind(&()),
        name = %obj.name_any(),
        namespace = ?obj.namespace(),
        "reconciliation failed"
    );
    Action::requeue(ERROR_REQUEUE)
}

/// Name and namespace of a namespaced object
pub(crate) fn object_key<K: ResourceExt>(obj: &K) -> Result<(String, String), Error> {
    let name = obj.name_any();
    let namespace = obj.namespace().ok_or_else(|| {
        Error::validation_for_field(&name, "metadata.namespace", "object has no namespace")
    })?;
    Ok((name, namespace))
}

/// Workload cluster an object belongs to, from the CAPI cluster-name label
pub(crate) fn cluster_name_of<K: ResourceExt>(obj: &K) -> Result<String, Error> {
    obj.labels()
        .get(CLUSTER_NAME_LABEL)
        .filter(|name| !name.is_empty())
        .cloned()
        .ok_or_else(|| {
            Error::validation_for_field(
                obj.name_any(),
                format!("metadata.labels[{}]", CLUSTER_NAME_LABEL),
                "missing cluster name label",
            )
        })
}

/// Object name of the CloudStackFailureDomain for a failure domain name
pub fn failure_domain_object_name(failure_domain: &str, cluster_name: &str) -> String {
    with_cluster_suffix(&sanitize_name(failure_domain), cluster_name)
}

/// Ready condition for `phase`, keeping the previous one when nothing but
/// its timestamp would change
pub(crate) fn ready_conditions(
    old: &[Condition],
    phase: ReconcilePhase,
    message: &str,
) -> Vec<Condition> {
    let new = vec![Condition::ready_for(phase, message)];
    if conditions_changed(old, &new) {
        new
    } else {
        old.to_vec()
    }
}

/// True for errors that a retry cannot fix
pub(crate) fn needs_spec_change(error: &Error) -> bool {
    matches!(error, Error::Validation { .. })
}


#[cfg(test)]
mod tests {
    use super::*;
    use capc_common::fixtures;

    #[test]
    fn failure_domain_names_carry_the_cluster() {
        assert_eq!(
            failure_domain_object_name("fd1", "test-cluster"),
            "fd1-test-cluster"
        );
        assert_eq!(
            failure_domain_object_name("Zone1", "test-cluster"),
            "zone1-test-cluster"
        );
        assert_eq!(
            failure_domain_object_name("fd1-test-cluster", "test-cluster"),
            "fd1-test-cluster"
        );
    }

    #[test]
    fn cluster_name_comes_from_label() {
        let group = fixtures::affinity_group();
        assert_eq!(cluster_name_of(&group).unwrap(), fixtures::CLUSTER_NAME);

        let mut unlabeled = group.clone();
        unlabeled.metadata.labels = None;
        assert!(needs_spec_change(&cluster_name_of(&unlabeled).unwrap_err()));
    }

    #[test]
    fn unchanged_conditions_keep_their_timestamps() {
        let old = ready_conditions(&[], ReconcilePhase::Ready, "ready");
        let again = ready_conditions(&old, ReconcilePhase::Ready, "ready");
        assert_eq!(old, again);

        let changed = ready_conditions(&old, ReconcilePhase::Reconciling, "waiting");
        assert_ne!(old, changed);
    }

    #[test]
    fn error_policy_requeues() {
        let machine = Arc::new(fixtures::machine("m1"));
        let ctx = Arc::new(crate::test_context());
        let action = error_policy(machine, &Error::internal("boom"), ctx);
        assert_eq!(action, Action::requeue(ERROR_REQUEUE));
    }
}
