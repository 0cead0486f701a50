//! CloudStackIsolatedNetwork reconciler
//!
//! Creates the isolated guest network in its failure domain's zone. The
//! failure domain is looked up by name within the same cluster; until it
//! exists the network stays Pending.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{info, instrument};

use capc_cloud::Network;
use capc_common::crd::{
    CloudStackIsolatedNetwork, CloudStackIsolatedNetworkStatus, NetworkType, ReconcilePhase,
};
use capc_common::Error;

use super::{cluster_name_of, failure_domain_object_name, object_key, ready_conditions};
use crate::cloud_factory::broker_for_failure_domain;
use crate::context::Context;

/// Reconcile a CloudStackIsolatedNetwork
#[instrument(skip(network, ctx), fields(network = %network.name_any()))]
pub async fn reconcile(
    network: Arc<CloudStackIsolatedNetwork>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let current = network.status.clone().unwrap_or_default();
    if network.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let (_, namespace) = object_key(network.as_ref())?;
    let cluster_name = cluster_name_of(network.as_ref())?;
    let domain_name = failure_domain_object_name(&network.spec.failure_domain_name, &cluster_name);

    let Some(domain) = ctx.kube.get_failure_domain(&domain_name, &namespace).await? else {
        update_status(
            &network,
            &ctx,
            &current,
            ReconcilePhase::Pending,
            &format!("waiting for failure domain {}", domain_name),
            None,
        )
        .await?;
        return Ok(Action::requeue(ctx.config.pending_requeue));
    };

    let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
    let zone_id = broker.resolve_zone_id(&domain.spec.zone).await?;

    let mut remote = Network {
        name: network.spec.name.clone(),
        type_: NetworkType::Isolated,
        ..Default::default()
    };
    broker
        .get_or_create_isolated_network(&mut remote, &zone_id)
        .await?;

    update_status(
        &network,
        &ctx,
        &current,
        ReconcilePhase::Ready,
        "network available",
        Some(remote.id),
    )
    .await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn update_status(
    network: &CloudStackIsolatedNetwork,
    ctx: &Context,
    current: &CloudStackIsolatedNetworkStatus,
    phase: ReconcilePhase,
    message: &str,
    network_id: Option<String>,
) -> Result<(), Error> {
    let (name, namespace) = object_key(network)?;
    let status = CloudStackIsolatedNetworkStatus {
        ready: phase == ReconcilePhase::Ready,
        phase,
        network_id,
        conditions: ready_conditions(&current.conditions, phase, message),
    };
    if &status == current {
        return Ok(());
    }
    if current.phase != phase {
        info!(network = %name, from = %current.phase, to = %phase, "phase transition");
    }
    ctx.kube
        .patch_isolated_network_status(&name, &namespace, &status)
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

    fn kube_with_domain(
        capture: &StatusCapture<CloudStackIsolatedNetworkStatus>,
        present: bool,
    ) -> MockKubeClient {
        let mut kube = MockKubeClient::new();
        kube.expect_get_failure_domain()
            .withf(|name, _| name == "fd2-test-cluster")
            .returning(move |_, _| {
                Ok(present.then(|| fixtures::failure_domain("fd2", fixtures::zone2())))
            });
        let capture = capture.clone();
        kube.expect_patch_isolated_network_status()
            .returning(move |_, _, status| {
                capture.record(status.clone());
                Ok(())
            });
        kube
    }

    // ==========================================================================
    // Story Tests: Isolated Networks
    // ==========================================================================

    /// Story: the network is created once and adopted on later passes
    #[tokio::test]
    async fn story_network_is_created_once() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new().with_zone("Zone2", "FakeZone2ID"));
        let ctx = context(kube_with_domain(&capture, true), cloud.clone());
        let network = Arc::new(fixtures::isolated_network());

        reconcile(network.clone(), ctx.clone()).await.unwrap();
        let first = capture.last().unwrap();
        assert!(first.ready);
        assert_eq!(cloud.create_count("network"), 1);

        let mut converged = fixtures::isolated_network();
        converged.status = Some(first.clone());
        reconcile(Arc::new(converged), ctx).await.unwrap();
        assert_eq!(cloud.create_count("network"), 1);
        assert_eq!(capture.last().unwrap().network_id, first.network_id);
    }

    /// Story: a lost creation race adopts the network the other writer made
    #[tokio::test]
    async fn story_creation_race_converges() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new().with_zone("Zone2", "FakeZone2ID"));
        cloud.race_next_create();
        let ctx = context(kube_with_domain(&capture, true), cloud.clone());

        reconcile(Arc::new(fixtures::isolated_network()), ctx)
            .await
            .unwrap();
        let status = capture.last().unwrap();
        assert!(status.ready);
        assert!(status.network_id.is_some());
        assert_eq!(cloud.create_count("network"), 1);
    }

    /// Story: the network waits for its failure domain
    #[tokio::test]
    async fn story_waits_for_failure_domain() {
        let capture = StatusCapture::new();
        let cloud = Arc::new(MemoryCloud::new());
        let ctx = context(kube_with_domain(&capture, false), cloud.clone());

        let action = reconcile(Arc::new(fixtures::isolated_network()), ctx.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(ctx.config.pending_requeue));
        assert_eq!(capture.last_phase(|s| s.phase), Some(ReconcilePhase::Pending));
        assert_eq!(cloud.total_creates(), 0);
    }

    /// Story: an unlabeled network cannot be placed in a cluster
    #[tokio::test]
    async fn story_unlabeled_network_is_rejected() {
        let ctx = context(MockKubeClient::new(), Arc::new(MemoryCloud::new()));

        let mut network = fixtures::isolated_network();
        network.metadata.labels = None;
        let err = reconcile(Arc::new(network), ctx).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
