//! CloudStackAffinityGroup reconciler
//!
//! Groups are created on demand by machines that ask for host affinity and
//! are removed from the cloud before their object is released. The
//! finalizer holds the object until the remote group is gone.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument, warn};

use capc_cloud::AffinityGroup;
use capc_common::crd::{
    CloudStackAffinityGroup, CloudStackAffinityGroupStatus, CloudStackFailureDomain,
    ReconcilePhase, AFFINITY_GROUP_FINALIZER,
};
use capc_common::Error;

use super::{cluster_name_of, failure_domain_object_name, object_key, ready_conditions};
use crate::cloud_factory::broker_for_failure_domain;
use crate::context::Context;

fn has_finalizer(group: &CloudStackAffinityGroup) -> bool {
    group.finalizers().iter().any(|f| f == AFFINITY_GROUP_FINALIZER)
}

fn remote_group(group: &CloudStackAffinityGroup) -> AffinityGroup {
    AffinityGroup {
        name: group.spec.name.clone(),
        type_: group.spec.type_.clone(),
        id: group
            .status
            .as_ref()
            .and_then(|s| s.id.clone())
            .unwrap_or_default(),
        failure_domain_name: group.spec.failure_domain_name.clone(),
    }
}

async fn failure_domain_of(
    group: &CloudStackAffinityGroup,
    ctx: &Context,
) -> Result<Option<CloudStackFailureDomain>, Error> {
    let (_, namespace) = object_key(group)?;
    let cluster_name = cluster_name_of(group)?;
    let name = failure_domain_object_name(&group.spec.failure_domain_name, &cluster_name);
    ctx.kube.get_failure_domain(&name, &namespace).await
}

/// Reconcile a CloudStackAffinityGroup
#[instrument(skip(group, ctx), fields(group = %group.name_any()))]
pub async fn reconcile(
    group: Arc<CloudStackAffinityGroup>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let (name, namespace) = object_key(group.as_ref())?;

    if group.metadata.deletion_timestamp.is_some() {
        return delete(&group, &ctx, &name, &namespace).await;
    }

    if !has_finalizer(&group) {
        ctx.kube
            .add_affinity_group_finalizer(&name, &namespace, AFFINITY_GROUP_FINALIZER)
            .await?;
    }

    let current = group.status.clone().unwrap_or_default();
    let Some(domain) = failure_domain_of(&group, &ctx).await? else {
        update_status(
            &group,
            &ctx,
            &current,
            ReconcilePhase::Pending,
            &format!(
                "waiting for failure domain {}",
                group.spec.failure_domain_name
            ),
            None,
        )
        .await?;
        return Ok(Action::requeue(ctx.config.pending_requeue));
    };

    let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
    let mut remote = remote_group(&group);
    broker.get_or_create_affinity_group(&mut remote).await?;

    update_status(
        &group,
        &ctx,
        &current,
        ReconcilePhase::Ready,
        "affinity group available",
        Some(remote.id),
    )
    .await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn delete(
    group: &CloudStackAffinityGroup,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, Error> {
    if !has_finalizer(group) {
        return Ok(Action::await_change());
    }

    match failure_domain_of(group, ctx).await? {
        Some(domain) => {
            let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
            broker.delete_affinity_group(&remote_group(group)).await?;
            info!(group = %group.spec.name, "removed affinity group from cloud");
        }
        None => warn!(
            group = %group.spec.name,
            failure_domain = %group.spec.failure_domain_name,
            "failure domain gone, releasing affinity group without remote cleanup"
        ),
    }

    ctx.kube
        .remove_affinity_group_finalizer(name, namespace, AFFINITY_GROUP_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

async fn update_status(
    group: &CloudStackAffinityGroup,
    ctx: &Context,
    current: &CloudStackAffinityGroupStatus,
    phase: ReconcilePhase,
    message: &str,
    id: Option<String>,
) -> Result<(), Error> {
    let (name, namespace) = object_key(group)?;
    let status = CloudStackAffinityGroupStatus {
        ready: phase == ReconcilePhase::Ready,
        phase,
        id,
        conditions: ready_conditions(&current.conditions, phase, message),
    };
    if &status == current {
        return Ok(());
    }
    if current.phase != phase {
        info!(group = %name, from = %current.phase, to = %phase, "phase transition");
    }
    ctx.kube
        .patch_affinity_group_status(&name, &namespace, &status)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::cloud_factory::MockClientFactory;
    use crate::controller::test_support::StatusCapture;
    use crate::ownership::MockOwnerLookup;
    use capc_cloud::memory::MemoryCloud;
    use capc_cloud::CloudApi;
    use capc_common::fixtures;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;

    fn context(kube: MockKubeClient, cloud: Arc<MemoryCloud>) -> Arc<Context> {
        let mut clouds = MockClientFactory::new();
        clouds
            .expect_endpoint_client()
            .returning(move |_| Ok(cloud.clone() as Arc<dyn CloudApi>));
        Arc::new(Context::for_testing(
            Arc::new(kube),
            Arc::new(MockOwnerLookup::new()),
            Arc::new(clouds),
        ))
    }

    fn finalized() -> CloudStackAffinityGroup {
        let mut group = fixtures::affinity_group();
        group.metadata.finalizers = Some(vec![AFFINITY_GROUP_FINALIZER.to_string()]);
        group
    }

    fn deleting() -> CloudStackAffinityGroup {
        let mut group = finalized();
        group.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        group
    }

    fn with_domain(kube: &mut MockKubeClient, present: bool) {
        kube.expect_get_failure_domain()
            .withf(|name, _| name == "fd1-test-cluster")
            .returning(move |_, _| {
                Ok(present.then(|| fixtures::failure_domain("fd1", fixtures::zone1())))
            });
    }

    fn capturing(kube: &mut MockKubeClient, capture: &StatusCapture<CloudStackAffinityGroupStatus>) {
        let capture = capture.clone();
        kube.expect_patch_affinity_group_status()
            .returning(move |_, _, status| {
                capture.record(status.clone());
                Ok(())
            });
    }

    // ==========================================================================
    // Story Tests: Affinity Group Lifecycle
    // ==========================================================================

    /// Story: a new group gains its finalizer and is created in the cloud
    #[tokio::test]
    async fn story_group_is_created_and_held() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new());
        let mut kube = MockKubeClient::new();
        kube.expect_add_affinity_group_finalizer()
            .withf(|name, _, finalizer| {
                name == fixtures::AFFINITY_GROUP_NAME && finalizer == AFFINITY_GROUP_FINALIZER
            })
            .times(1)
            .returning(|_, _, _| Ok(()));
        with_domain(&mut kube, true);
        capturing(&mut kube, &capture);
        let ctx = context(kube, cloud.clone());

        let action = reconcile(Arc::new(fixtures::affinity_group()), ctx.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_interval));
        assert!(cloud.has_affinity_group(fixtures::AFFINITY_GROUP_NAME));

        let status = capture.last().unwrap();
        assert!(status.ready);
        assert!(status.id.is_some());
    }

    /// Story: a finalized group is not patched again and not recreated
    #[tokio::test]
    async fn story_existing_group_is_adopted() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new());
        let mut kube = MockKubeClient::new();
        kube.expect_add_affinity_group_finalizer().never();
        with_domain(&mut kube, true);
        capturing(&mut kube, &capture);
        let ctx = context(kube, cloud.clone());

        reconcile(Arc::new(finalized()), ctx.clone()).await.unwrap();
        reconcile(Arc::new(finalized()), ctx).await.unwrap();
        assert_eq!(cloud.create_count("affinity group"), 1);
    }

    /// Story: a group waits until its failure domain exists
    #[tokio::test]
    async fn story_waits_for_failure_domain() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new());
        let mut kube = MockKubeClient::new();
        with_domain(&mut kube, false);
        capturing(&mut kube, &capture);
        let ctx = context(kube, cloud.clone());

        let action = reconcile(Arc::new(finalized()), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.pending_requeue));
        assert_eq!(capture.last_phase(|s| s.phase), Some(ReconcilePhase::Pending));
        assert_eq!(cloud.total_creates(), 0);
    }

    /// Story: deletion removes the remote group before the finalizer
    #[tokio::test]
    async fn story_deletion_cleans_up_cloud() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut kube = MockKubeClient::new();
        with_domain(&mut kube, true);
        capturing(&mut kube, &StatusCapture::new());
        let remote = cloud.clone();
        kube.expect_remove_affinity_group_finalizer()
            .times(1)
            .returning(move |_, _, _| {
                assert!(!remote.has_affinity_group(fixtures::AFFINITY_GROUP_NAME));
                Ok(())
            });
        let ctx = context(kube, cloud.clone());

        reconcile(Arc::new(finalized()), ctx.clone()).await.unwrap();
        assert!(cloud.has_affinity_group(fixtures::AFFINITY_GROUP_NAME));

        let action = reconcile(Arc::new(deleting()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(!cloud.has_affinity_group(fixtures::AFFINITY_GROUP_NAME));
    }

    /// Story: a group already gone from the cloud still releases its object
    #[tokio::test]
    async fn story_deleting_missing_group_succeeds() {
        let cloud = Arc::new(MemoryCloud::new());
        let mut kube = MockKubeClient::new();
        with_domain(&mut kube, true);
        kube.expect_remove_affinity_group_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = context(kube, cloud);

        let action = reconcile(Arc::new(deleting()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }

    /// Story: a failed remote delete keeps the finalizer for a retry
    #[tokio::test]
    async fn story_failed_delete_keeps_finalizer() {
        let cloud = Arc::new(MemoryCloud::new());
        cloud.inject_failure(
            "find_affinity_group",
            capc_cloud::CloudError::Transport {
                command: "listAffinityGroups".to_string(),
                message: "timeout".to_string(),
            },
        );
        let mut kube = MockKubeClient::new();
        with_domain(&mut kube, true);
        kube.expect_remove_affinity_group_finalizer().never();
        let ctx = context(kube, cloud);

        let err = reconcile(Arc::new(deleting()), ctx).await.unwrap_err();
        assert!(err.is_retryable());
    }

    /// Story: a group whose failure domain is gone is released without cleanup
    #[tokio::test]
    async fn story_orphaned_group_is_released() {
        let mut kube = MockKubeClient::new();
        with_domain(&mut kube, false);
        kube.expect_remove_affinity_group_finalizer()
            .times(1)
            .returning(|_, _, _| Ok(()));
        let ctx = context(kube, Arc::new(MemoryCloud::new()));

        let action = reconcile(Arc::new(deleting()), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
    }
}
