//! CloudStackMachine reconciler
//!
//! Deploys one instance per machine once its CAPI Machine, bootstrap data
//! and failure domain are in place. Machines asking for host affinity share
//! a CloudStackAffinityGroup per managing owner and failure domain.
//!
//! An instance that stays out of `Running` longer than the configured
//! timeout gets its CAPI Machine deleted, unless the machine's manager is
//! already going away, so the manager can replace it.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use capc_cloud::DeployVmRequest;
use capc_common::compress::compress_and_encode;
use capc_common::crd::capi::Machine;
use capc_common::crd::{
    CloudStackAffinityGroup, CloudStackAffinityGroupSpec, CloudStackFailureDomain,
    CloudStackMachine, CloudStackMachineStatus, ReconcilePhase, PROVIDER_ID_PREFIX,
};
use capc_common::kube_utils::{sanitize_name, with_cluster_suffix};
use capc_common::{Error, CLUSTER_NAME_LABEL};

use super::{
    cluster_name_of, failure_domain_object_name, needs_spec_change, object_key, ready_conditions,
};
use crate::cloud_factory::broker_for_failure_domain;
use crate::context::Context;
use crate::ownership::{get_owner_of_kind, is_owner_deleted, management_owner_ref};

/// Finalizer holding a machine until its instance is destroyed
pub const MACHINE_FINALIZER: &str = "cloudstackmachine.infrastructure.cluster.x-k8s.io";

fn has_finalizer(machine: &CloudStackMachine) -> bool {
    machine.finalizers().iter().any(|f| f == MACHINE_FINALIZER)
}

/// Cloud ID of the machine's instance, from status or the provider ID
fn instance_id(machine: &CloudStackMachine) -> Option<String> {
    machine
        .status
        .as_ref()
        .and_then(|s| s.instance_id.clone())
        .or_else(|| {
            machine
                .spec
                .provider_id
                .as_deref()
                .and_then(|id| id.strip_prefix(PROVIDER_ID_PREFIX))
                .filter(|id| !id.is_empty())
                .map(str::to_string)
        })
}

/// Affinity group shared by all machines of `manager` in one failure domain
pub fn affinity_group_for(
    machine: &CloudStackMachine,
    manager: &OwnerReference,
    group_type: &str,
    failure_domain: &str,
    cluster_name: &str,
) -> CloudStackAffinityGroup {
    let affinity = match group_type {
        "host affinity" => "pro",
        _ => "anti",
    };
    let name = with_cluster_suffix(
        &sanitize_name(&format!(
            "{}-affinity-{}-{}",
            affinity, manager.name, failure_domain
        )),
        cluster_name,
    );

    let owner = OwnerReference {
        controller: None,
        ..manager.clone()
    };
    CloudStackAffinityGroup {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: machine.namespace(),
            labels: Some(BTreeMap::from([(
                CLUSTER_NAME_LABEL.to_string(),
                cluster_name.to_string(),
            )])),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: CloudStackAffinityGroupSpec {
            name,
            type_: group_type.to_string(),
            failure_domain_name: failure_domain.to_string(),
        },
        status: None,
    }
}

/// Reconcile a CloudStackMachine
#[instrument(skip(machine, ctx), fields(machine = %machine.name_any()))]
pub async fn reconcile(
    machine: Arc<CloudStackMachine>,
    ctx: Arc<Context>,
) -> Result<Action, Error> {
    let (name, namespace) = object_key(machine.as_ref())?;

    if machine.metadata.deletion_timestamp.is_some() {
        return delete(&machine, &ctx, &name, &namespace).await;
    }

    if !has_finalizer(&machine) {
        ctx.kube
            .add_machine_finalizer(&name, &namespace, MACHINE_FINALIZER)
            .await?;
    }

    let current = machine.status.clone().unwrap_or_default();
    match reconcile_instance(&machine, &ctx, &namespace, &current).await {
        Err(e) if needs_spec_change(&e) => {
            warn!(error = %e, "machine needs a spec change");
            let status = CloudStackMachineStatus {
                phase: ReconcilePhase::Failed,
                ..current.clone()
            };
            update_status(&machine, &ctx, &current, status, &e.to_string()).await?;
            Ok(Action::await_change())
        }
        other => other,
    }
}

async fn wait(
    machine: &CloudStackMachine,
    ctx: &Context,
    current: &CloudStackMachineStatus,
    message: &str,
) -> Result<Action, Error> {
    debug!(machine = %machine.name_any(), message, "waiting");
    let status = CloudStackMachineStatus {
        phase: ReconcilePhase::Pending,
        ..current.clone()
    };
    update_status(machine, ctx, current, status, message).await?;
    Ok(Action::requeue(ctx.config.pending_requeue))
}

async fn reconcile_instance(
    machine: &CloudStackMachine,
    ctx: &Context,
    namespace: &str,
    current: &CloudStackMachineStatus,
) -> Result<Action, Error> {
    let owner = match get_owner_of_kind::<Machine>(&ctx.scheme, ctx.owners.as_ref(), &machine.metadata)
        .await
    {
        Ok(owner) => owner,
        Err(e) if e.is_missing_owner() => {
            return wait(machine, ctx, current, "waiting for owner Machine").await
        }
        Err(e) => return Err(e),
    };

    let Some(bootstrap_secret) = owner.spec.bootstrap.data_secret_name.clone() else {
        return wait(machine, ctx, current, "waiting for bootstrap data").await;
    };

    let failure_domain = machine
        .spec
        .failure_domain_name
        .clone()
        .or_else(|| owner.spec.failure_domain.clone())
        .filter(|fd| !fd.is_empty())
        .ok_or_else(|| {
            Error::validation_for_field(
                machine.name_any(),
                "spec.failureDomainName",
                "no failure domain set on the machine or its owner Machine",
            )
        })?;

    let cluster_name = cluster_name_of(machine)?;
    let domain_name = failure_domain_object_name(&failure_domain, &cluster_name);
    let Some((domain, network_id)) = ready_failure_domain(ctx, &domain_name, namespace).await?
    else {
        return wait(
            machine,
            ctx,
            current,
            &format!("waiting for failure domain {}", domain_name),
        )
        .await;
    };

    let mut affinity_group_ids = machine.spec.affinity_group_ids.clone();
    if let Some(group_type) = machine.spec.affinity.group_type() {
        let Some(manager) = management_owner_ref(&owner) else {
            return wait(machine, ctx, current, "waiting for a managing owner").await;
        };
        let group = affinity_group_for(machine, manager, group_type, &failure_domain, &cluster_name);
        ctx.kube.apply_affinity_group(&group).await?;

        let group_id = ctx
            .kube
            .get_affinity_group(&group.name_any(), namespace)
            .await?
            .and_then(|g| g.status)
            .filter(|s| s.ready)
            .and_then(|s| s.id);
        let Some(group_id) = group_id else {
            return wait(
                machine,
                ctx,
                current,
                &format!("waiting for affinity group {}", group.name_any()),
            )
            .await;
        };
        if !affinity_group_ids.contains(&group_id) {
            affinity_group_ids.push(group_id);
        }
    }

    let Some(bootstrap) = ctx.kube.get_bootstrap_data(&bootstrap_secret, namespace).await? else {
        return wait(
            machine,
            ctx,
            current,
            &format!("waiting for bootstrap secret {}", bootstrap_secret),
        )
        .await;
    };

    let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
    let zone_id = broker.resolve_zone_id(&domain.spec.zone).await?;

    let disk = machine.spec.data_disk();
    let request = DeployVmRequest {
        name: machine.name_any(),
        zone_id,
        network_id,
        offering: machine.spec.offering.clone(),
        template: machine.spec.template.clone(),
        disk_offering: disk.map(|d| d.offering.clone()),
        disk_size_gb: disk.and_then(|d| d.custom_size_in_gb),
        ssh_key: machine.spec.ssh_key.clone(),
        details: machine.spec.details.clone(),
        affinity_group_ids,
        user_data: compress_and_encode(&bootstrap)?,
    };
    let vm = broker.get_or_create_vm_instance(&request).await?;

    if machine.spec.provider_id.is_none() {
        let provider_id = format!("{}{}", PROVIDER_ID_PREFIX, vm.id);
        ctx.kube
            .patch_machine_provider_id(&machine.name_any(), namespace, &provider_id)
            .await?;
    }

    let mut status = CloudStackMachineStatus {
        instance_id: Some(vm.id.clone()),
        failure_domain_name: Some(failure_domain.clone()),
        addresses: vm.addresses.clone(),
        ..current.clone()
    };
    if status.set_instance_state(&vm.state) {
        info!(instance = %vm.id, state = %vm.state, "instance state changed");
    }

    if status.is_running() {
        status.phase = ReconcilePhase::Ready;
        update_status(machine, ctx, current, status, "instance running").await?;
        return Ok(Action::requeue(ctx.config.requeue_interval));
    }

    status.phase = ReconcilePhase::Reconciling;
    let message = format!("instance is {}", vm.state);
    replace_if_stuck(ctx, &owner, &status, namespace).await?;
    update_status(machine, ctx, current, status, &message).await?;
    Ok(Action::requeue(ctx.config.pending_requeue))
}

/// Failure domain and its network ID, once the domain is ready
async fn ready_failure_domain(
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Option<(CloudStackFailureDomain, String)>, Error> {
    Ok(ctx
        .kube
        .get_failure_domain(name, namespace)
        .await?
        .and_then(|domain| {
            let network_id = domain
                .status
                .as_ref()
                .filter(|s| s.ready)
                .and_then(|s| s.network_id.clone())?;
            Some((domain, network_id))
        }))
}

/// Delete the CAPI Machine of an instance stuck outside `Running`
async fn replace_if_stuck(
    ctx: &Context,
    owner: &Machine,
    status: &CloudStackMachineStatus,
    namespace: &str,
) -> Result<(), Error> {
    // negative when the state was never recorded
    let Ok(elapsed) = status.time_since_last_state_change().to_std() else {
        return Ok(());
    };
    if elapsed <= ctx.config.instance_state_timeout {
        return Ok(());
    }

    if is_owner_deleted(ctx.owners.as_ref(), owner).await? {
        debug!(machine = %owner.name_any(), "owner is deleting, leaving replacement to it");
        return Ok(());
    }

    warn!(
        machine = %owner.name_any(),
        state = ?status.instance_state,
        elapsed_secs = elapsed.as_secs(),
        "instance stuck, deleting machine for replacement"
    );
    ctx.kube.delete_capi_machine(&owner.name_any(), namespace).await
}

/// Failure domain holding the machine's instance
///
/// Resolved in deploy order: the machine's own field, the domain recorded
/// at deploy time, then the owner CAPI Machine.
async fn deployed_failure_domain(
    machine: &CloudStackMachine,
    ctx: &Context,
) -> Result<Option<String>, Error> {
    let known = machine
        .spec
        .failure_domain_name
        .clone()
        .or_else(|| machine.status.as_ref().and_then(|s| s.failure_domain_name.clone()))
        .filter(|fd| !fd.is_empty());
    if known.is_some() {
        return Ok(known);
    }

    match get_owner_of_kind::<Machine>(&ctx.scheme, ctx.owners.as_ref(), &machine.metadata).await
    {
        Ok(owner) => Ok(owner.spec.failure_domain.filter(|fd| !fd.is_empty())),
        Err(e) if e.is_missing_owner() => Ok(None),
        Err(e) => Err(e),
    }
}

async fn delete(
    machine: &CloudStackMachine,
    ctx: &Context,
    name: &str,
    namespace: &str,
) -> Result<Action, Error> {
    if !has_finalizer(machine) {
        return Ok(Action::await_change());
    }

    if let Some(id) = instance_id(machine) {
        let Some(fd) = deployed_failure_domain(machine, ctx).await? else {
            return Err(Error::validation_for_field(
                name,
                "spec.failureDomainName",
                format!("cannot determine the failure domain of instance {}", id),
            ));
        };
        let cluster_name = cluster_name_of(machine)?;
        let domain = ctx
            .kube
            .get_failure_domain(&failure_domain_object_name(&fd, &cluster_name), namespace)
            .await?;
        match domain {
            Some(domain) => {
                let broker = broker_for_failure_domain(ctx.clouds.as_ref(), &domain.spec).await?;
                broker.destroy_vm_instance(&id).await?;
                info!(instance = %id, "destroyed instance");
            }
            None => warn!(
                instance = %id,
                failure_domain = %fd,
                "failure domain gone, releasing machine without destroying instance"
            ),
        }
    }

    ctx.kube
        .remove_machine_finalizer(name, namespace, MACHINE_FINALIZER)
        .await?;
    Ok(Action::await_change())
}

async fn update_status(
    machine: &CloudStackMachine,
    ctx: &Context,
    current: &CloudStackMachineStatus,
    mut status: CloudStackMachineStatus,
    message: &str,
) -> Result<(), Error> {
    let (name, namespace) = object_key(machine)?;
    status.ready = status.phase == ReconcilePhase::Ready;
    status.conditions = ready_conditions(&current.conditions, status.phase, message);
    if &status == current {
        return Ok(());
    }
    if current.phase != status.phase {
        info!(machine = %name, from = %current.phase, to = %status.phase, "phase transition");
    }
    ctx.kube
        .patch_machine_status(&name, &namespace, &status)
        .await
}
