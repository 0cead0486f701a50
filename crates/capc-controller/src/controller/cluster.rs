//! CloudStackCluster reconciler
//!
//! Waits for CAPI to adopt the cluster, fans its zones out into one
//! CloudStackFailureDomain each, and reports the failure domains back to CAPI
//! once all of them are ready.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument, warn};

use capc_common::crd::capi::Cluster;
use capc_common::crd::{
    CloudStackCluster, CloudStackClusterStatus, CloudStackFailureDomain,
    CloudStackFailureDomainSpec, FailureDomainAdvert, ReconcilePhase, Zone,
};
use capc_common::{Error, CLUSTER_NAME_LABEL};

use super::{failure_domain_object_name, object_key, ready_conditions};
use crate::context::Context;
use crate::ownership::get_owner_of_kind;

/// Failure domain object for one zone of `cluster`
pub fn failure_domain_for_zone(cluster: &CloudStackCluster, zone: &Zone) -> CloudStackFailureDomain {
    let cluster_name = cluster.name_any();
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.clone());

    CloudStackFailureDomain {
        metadata: ObjectMeta {
            name: Some(failure_domain_object_name(&zone.name, &cluster_name)),
            namespace: cluster.namespace(),
            labels: Some(labels),
            owner_references: cluster.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: CloudStackFailureDomainSpec {
            name: zone.name.clone(),
            zone: zone.clone(),
            account: cluster.spec.account.clone(),
            domain: cluster.spec.domain.clone(),
            acs_endpoint: cluster.credentials_secret(),
        },
        status: None,
    }
}

/// Reconcile a CloudStackCluster
#[instrument(skip(cluster, ctx), fields(cluster = %cluster.name_any()))]
pub async fn reconcile(cluster: Arc<CloudStackCluster>, ctx: Arc<Context>) -> Result<Action, Error> {
    let (name, namespace) = object_key(cluster.as_ref())?;
    let current = cluster.status.clone().unwrap_or_default();

    if cluster.metadata.deletion_timestamp.is_some() {
        // failure domains are garbage collected through their owner reference
        return Ok(Action::await_change());
    }

    if let Err(e) = cluster.spec.validate() {
        warn!(error = %e, "cluster spec is invalid");
        update_status(&cluster, &ctx, &current, ReconcilePhase::Failed, &e.to_string(), BTreeMap::new())
            .await?;
        return Ok(Action::await_change());
    }

    match get_owner_of_kind::<Cluster>(&ctx.scheme, ctx.owners.as_ref(), &cluster.metadata).await {
        Ok(owner) => debug!(owner = %owner.name_any(), "cluster adopted"),
        Err(e) if e.is_missing_owner() => {
            info!("waiting for CAPI Cluster to set owner reference");
            update_status(
                &cluster,
                &ctx,
                &current,
                ReconcilePhase::Pending,
                "waiting for owner Cluster",
                BTreeMap::new(),
            )
            .await?;
            return Ok(Action::requeue(ctx.config.pending_requeue));
        }
        Err(e) => return Err(e),
    }

    let mut adverts = BTreeMap::new();
    let mut not_ready = Vec::new();
    for zone in &cluster.spec.zones {
        let desired = failure_domain_for_zone(&cluster, zone);
        ctx.kube.apply_failure_domain(&desired).await?;

        let object_name = desired.name_any();
        let ready = ctx
            .kube
            .get_failure_domain(&object_name, &namespace)
            .await?
            .and_then(|fd| fd.status)
            .is_some_and(|s| s.ready);
        if !ready {
            not_ready.push(zone.name.clone());
        }
        adverts.insert(
            zone.name.clone(),
            FailureDomainAdvert {
                control_plane: true,
            },
        );
    }

    if !not_ready.is_empty() {
        let message = format!("waiting for failure domains: {}", not_ready.join(", "));
        debug!(cluster = %name, "{}", message);
        update_status(&cluster, &ctx, &current, ReconcilePhase::Reconciling, &message, adverts)
            .await?;
        return Ok(Action::requeue(ctx.config.pending_requeue));
    }

    update_status(
        &cluster,
        &ctx,
        &current,
        ReconcilePhase::Ready,
        "all failure domains ready",
        adverts,
    )
    .await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn update_status(
    cluster: &CloudStackCluster,
    ctx: &Context,
    current: &CloudStackClusterStatus,
    phase: ReconcilePhase,
    message: &str,
    failure_domains: BTreeMap<String, FailureDomainAdvert>,
) -> Result<(), Error> {
    let (name, namespace) = object_key(cluster)?;
    let status = CloudStackClusterStatus {
        ready: phase == ReconcilePhase::Ready,
        phase,
        message: Some(message.to_string()),
        failure_domains,
        conditions: ready_conditions(&current.conditions, phase, message),
    };
    if &status == current {
        return Ok(());
    }
    if current.phase != phase {
        info!(cluster = %name, from = %current.phase, to = %phase, "phase transition");
    }
    ctx.kube.patch_cluster_status(&name, &namespace, &status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockKubeClient;
    use crate::cloud_factory::MockClientFactory;
    use crate::controller::test_support::StatusCapture;
    use crate::ownership::MockOwnerLookup;
    use capc_common::crd::{CloudStackFailureDomainStatus, IdentityRef};
    use capc_common::fixtures;
    use kube::api::DynamicObject;
    use std::sync::Mutex;

    fn owner_lookup(adopted: bool) -> MockOwnerLookup {
        let mut owners = MockOwnerLookup::new();
        owners.expect_get().returning(move |resource, namespace, name| {
            if !adopted {
                return Ok(None);
            }
            let mut obj = DynamicObject::new(name, resource).within(namespace);
            obj.data = serde_json::json!({ "spec": {} });
            Ok(Some(obj))
        });
        owners
    }

    /// Mock client that records applied failure domains and reports them
    /// with the given readiness
    fn kube_with_failure_domains(
        ready: bool,
        capture: &StatusCapture<CloudStackClusterStatus>,
        applied: Arc<Mutex<Vec<CloudStackFailureDomain>>>,
    ) -> MockKubeClient {
        let mut kube = MockKubeClient::new();
        let capture = capture.clone();
        kube.expect_patch_cluster_status()
            .returning(move |_, _, status| {
                capture.record(status.clone());
                Ok(())
            });
        let sink = applied.clone();
        kube.expect_apply_failure_domain().returning(move |fd| {
            sink.lock().unwrap().push(fd.clone());
            Ok(())
        });
        kube.expect_get_failure_domain().returning(move |name, _| {
            let found = applied
                .lock()
                .unwrap()
                .iter()
                .find(|fd| fd.name_any() == name)
                .cloned();
            Ok(found.map(|mut fd| {
                fd.status = Some(CloudStackFailureDomainStatus {
                    ready,
                    ..Default::default()
                });
                fd
            }))
        });
        kube
    }

    fn context(kube: MockKubeClient, owners: MockOwnerLookup) -> Arc<Context> {
        Arc::new(Context::for_testing(
            Arc::new(kube),
            Arc::new(owners),
            Arc::new(MockClientFactory::new()),
        ))
    }

    // ==========================================================================
    // Story Tests: Cluster Lifecycle
    // ==========================================================================

    /// Story: one failure domain per zone, named after the cluster, owned
    /// by it, and advertised to CAPI once ready
    #[tokio::test]
    async fn story_zones_become_ready_failure_domains() {
        let capture = StatusCapture::new();
        let applied = Arc::new(Mutex::new(Vec::new()));
        let kube = kube_with_failure_domains(true, &capture, applied.clone());
        let ctx = context(kube, owner_lookup(true));

        let action = reconcile(Arc::new(fixtures::cluster()), ctx.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(ctx.config.requeue_interval));

        let applied = applied.lock().unwrap();
        let names: Vec<_> = applied.iter().map(|fd| fd.name_any()).collect();
        assert_eq!(names, vec!["zone1-test-cluster", "zone2-test-cluster"]);
        assert_eq!(applied[0].spec.acs_endpoint.name, fixtures::ENDPOINT_SECRET);
        assert_eq!(applied[1].spec.zone, fixtures::zone2());

        let status = capture.last().unwrap();
        assert!(status.ready);
        assert_eq!(status.phase, ReconcilePhase::Ready);
        assert_eq!(
            status.failure_domains.keys().collect::<Vec<_>>(),
            vec!["Zone1", "Zone2"]
        );
    }

    /// Story: the cluster stays Reconciling until every failure domain is ready
    #[tokio::test]
    async fn story_unready_failure_domains_hold_the_cluster() {
        let capture = StatusCapture::new();
        let kube = kube_with_failure_domains(false, &capture, Arc::new(Mutex::new(Vec::new())));
        let ctx = context(kube, owner_lookup(true));

        let action = reconcile(Arc::new(fixtures::cluster()), ctx.clone())
            .await
            .unwrap();
        assert_eq!(action, Action::requeue(ctx.config.pending_requeue));

        let status = capture.last().unwrap();
        assert!(!status.ready);
        assert_eq!(status.phase, ReconcilePhase::Reconciling);
        assert!(status.message.unwrap().contains("Zone1, Zone2"));
    }

    /// Story: nothing is created before CAPI adopts the cluster
    #[tokio::test]
    async fn story_waits_for_owner_cluster() {
        let capture = StatusCapture::new();
        let mut kube = MockKubeClient::new();
        let sink = capture.clone();
        kube.expect_patch_cluster_status().returning(move |_, _, s| {
            sink.record(s.clone());
            Ok(())
        });
        kube.expect_apply_failure_domain().never();

        let mut cluster = fixtures::cluster();
        cluster.metadata.owner_references = None;
        let ctx = context(kube, owner_lookup(true));

        let action = reconcile(Arc::new(cluster), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::requeue(ctx.config.pending_requeue));
        assert_eq!(
            capture.last_phase(|s| s.phase),
            Some(ReconcilePhase::Pending)
        );
    }

    /// Story: an owner reference to a vanished Cluster is an error to retry
    #[tokio::test]
    async fn story_dangling_owner_is_retried() {
        let mut kube = MockKubeClient::new();
        kube.expect_apply_failure_domain().never();
        let ctx = context(kube, owner_lookup(false));

        let err = reconcile(Arc::new(fixtures::cluster()), ctx)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    /// Story: a spec that slipped past admission fails without touching anything
    #[tokio::test]
    async fn story_invalid_spec_marks_cluster_failed() {
        let capture = StatusCapture::new();
        let mut kube = MockKubeClient::new();
        let sink = capture.clone();
        kube.expect_patch_cluster_status().returning(move |_, _, s| {
            sink.record(s.clone());
            Ok(())
        });
        kube.expect_apply_failure_domain().never();

        let mut cluster = fixtures::cluster();
        cluster.spec.identity_ref = Some(IdentityRef {
            kind: "ConfigMap".to_string(),
            name: "creds".to_string(),
        });
        let ctx = context(kube, MockOwnerLookup::new());

        let action = reconcile(Arc::new(cluster), ctx).await.unwrap();
        assert_eq!(action, Action::await_change());
        let status = capture.last().unwrap();
        assert_eq!(status.phase, ReconcilePhase::Failed);
        assert!(status.message.unwrap().contains("must be a Secret"));
    }

    /// Story: a Ready cluster with nothing new is not patched again
    #[tokio::test]
    async fn story_steady_state_is_a_noop() {
        let capture = StatusCapture::new();
        let applied = Arc::new(Mutex::new(Vec::new()));
        let kube = kube_with_failure_domains(true, &capture, applied.clone());
        let ctx = context(kube, owner_lookup(true));

        let mut cluster = fixtures::cluster();
        reconcile(Arc::new(cluster.clone()), ctx.clone()).await.unwrap();
        cluster.status = capture.last();

        let second = StatusCapture::new();
        let kube = kube_with_failure_domains(true, &second, applied);
        let ctx = context(kube, owner_lookup(true));
        reconcile(Arc::new(cluster), ctx).await.unwrap();
        assert!(!second.was_updated());
    }

    #[test]
    fn failure_domain_inherits_account_and_domain() {
        let mut cluster = fixtures::cluster();
        cluster.spec.account = Some("acct".to_string());
        cluster.spec.domain = Some("ROOT/a".to_string());
        let fd = failure_domain_for_zone(&cluster, &fixtures::zone1());
        assert_eq!(fd.spec.account.as_deref(), Some("acct"));
        assert_eq!(fd.spec.domain.as_deref(), Some("ROOT/a"));
        assert_eq!(fd.labels()[CLUSTER_NAME_LABEL], fixtures::CLUSTER_NAME);
    }
}
