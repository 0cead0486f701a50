//! CloudStackFailureDomain reconciler
//!
//! Resolves the zone and its network on the failure domain's endpoint. A
//! shared network must already exist. An isolated network is delegated to a
//! CloudStackIsolatedNetwork child and picked up once that is ready.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{debug, info, instrument};

use capc_cloud::{Account, Domain, Network};
use capc_common::crd::{
    CloudStackFailureDomain, CloudStackFailureDomainStatus, CloudStackIsolatedNetwork,
    CloudStackIsolatedNetworkSpec, NetworkSpec, NetworkType, ReconcilePhase,
};
use capc_common::kube_utils::{sanitize_name, with_cluster_suffix};
use capc_common::{Error, CLUSTER_NAME_LABEL};

use super::{cluster_name_of, object_key, ready_conditions};
use crate::cloud_factory::broker_for_failure_domain;
use crate::context::Context;

/// Isolated network child for `network` in `domain`
pub fn isolated_network_for(
    domain: &CloudStackFailureDomain,
    network: &NetworkSpec,
    cluster_name: &str,
) -> CloudStackIsolatedNetwork {
    let mut labels = BTreeMap::new();
    labels.insert(CLUSTER_NAME_LABEL.to_string(), cluster_name.to_string());

    CloudStackIsolatedNetwork {
        metadata: ObjectMeta {
            name: Some(with_cluster_suffix(&sanitize_name(&network.name), cluster_name)),
            namespace: domain.namespace(),
            labels: Some(labels),
            owner_references: domain.controller_owner_ref(&()).map(|r| vec![r]),
            ..Default::default()
        },
        spec: CloudStackIsolatedNetworkSpec {
            name: network.name.clone(),
            failure_domain_name: domain.spec.name.clone(),
        },
        status: None,
    }
}

/// Reconcile a CloudStackFailureDomain
#[instrument(skip(domain, ctx), fields(failure_domain = %domain.name_any()))]
pub async fn reconcile(
    domain: Arc<CloudStackFailureDomain>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let mut current = domain.status.clone().unwrap_or_default();
    if domain.metadata.deletion_timestamp.is_some() {
        return Ok(Action::await_change());
    }

    let Some(network) = domain.spec.zone.network.clone() else {
        let message = format!("zone {} has no network", domain.spec.zone.name);
        update_status(&domain, &ctx, &current, ReconcilePhase::Failed, &message, None, None)
            .await?;
        return Ok(Action::await_change());
    };

    if current.phase == ReconcilePhase::Pending {
        current = update_status(
            &domain,
            &ctx,
            &current,
            ReconcilePhase::Reconciling,
            "resolving zone and network",
            None,
            None,
        )
        .await?;
    }

    let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
    let zone_id = broker.resolve_zone_id(&domain.spec.zone).await?;
    debug!(zone = %domain.spec.zone.name, zone_id = %zone_id, "resolved zone");

    let network_id = match network.type_ {
        NetworkType::Shared => {
            let mut resolved = Network {
                name: network.name.clone(),
                ..Default::default()
            };
            broker.resolve_shared_network(&mut resolved, &zone_id).await?;
            Some(resolved.id)
        }
        NetworkType::Isolated => {
            let cluster_name = cluster_name_of(domain.as_ref())?;
            let desired = isolated_network_for(&domain, &network, &cluster_name);
            let (_, namespace) = object_key(domain.as_ref())?;
            ctx.kube.apply_isolated_network(&desired).await?;
            ctx.kube
                .get_isolated_network(&desired.name_any(), &namespace)
                .await?
                .and_then(|n| n.status)
                .filter(|s| s.ready)
                .and_then(|s| s.network_id)
        }
    };

    let domain_id = match domain.spec.account.as_deref().filter(|a| !a.is_empty()) {
        Some(name) => {
            let mut account = Account {
                name: name.to_string(),
                domain: Domain::at_path(domain.spec.domain.clone().unwrap_or_default()),
                ..Default::default()
            };
            broker.get_or_create_account(&mut account).await?;
            Some(account.domain.id)
        }
        None => None,
    };

    let Some(network_id) = network_id else {
        update_status(
            &domain,
            &ctx,
            &current,
            ReconcilePhase::Reconciling,
            &format!("waiting for isolated network {}", network.name),
            None,
            domain_id,
        )
        .await?;
        return Ok(Action::requeue(ctx.config.pending_requeue));
    };

    update_status(
        &domain,
        &ctx,
        &current,
        ReconcilePhase::Ready,
        "zone and network resolved",
        Some(network_id),
        domain_id,
    )
    .await?;
    Ok(Action::requeue(ctx.config.requeue_interval))
}

async fn update_status(
    domain: &CloudStackFailureDomain,
    ctx: &Context,
    current: &CloudStackFailureDomainStatus,
    phase: ReconcilePhase,
    message: &str,
    network_id: Option<String>,
    domain_id: Option<String>,
) -> Result<CloudStackFailureDomainStatus, Error> {
    let (name, namespace) = object_key(domain)?;
    let status = CloudStackFailureDomainStatus {
        ready: phase == ReconcilePhase::Ready,
        phase,
        network_id,
        domain_id,
        conditions: ready_conditions(&current.conditions, phase, message),
    };
    if &status == current {
        return Ok(status);
    }
    if current.phase != phase {
        info!(failure_domain = %name, from = %current.phase, to = %phase, "phase transition");
    }
    ctx.kube
        .patch_failure_domain_status(&name, &namespace, &status)
        .await?;
    Ok(status)
}
