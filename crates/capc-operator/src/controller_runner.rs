//! Controller runner - builds one controller future per provider kind

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client, Resource};

use capc_common::crd::{
    CloudStackAffinityGroup, CloudStackCluster, CloudStackFailureDomain,
    CloudStackIsolatedNetwork, CloudStackMachine,
};
use capc_controller::controller::{
    affinity_group, cluster, error_policy, failure_domain, isolated_network, machine,
};
use capc_controller::Context;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
const WATCH_TIMEOUT_SECS: u32 = 25;

type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<Scope = kube::core::NamespaceResourceScope, DynamicType = ()>,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

fn watcher() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

/// Build controller futures for every provider kind
pub fn build_controllers(
    client: Client,
    ctx: Arc<Context>,
    namespace: Option<&str>,
) -> Vec<ControllerFuture> {
    let clusters = Controller::new(api::<CloudStackCluster>(&client, namespace), watcher())
        .owns(api::<CloudStackFailureDomain>(&client, namespace), watcher())
        .shutdown_on_signal()
        .run(cluster::reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("CloudStackCluster"));

    let failure_domains =
        Controller::new(api::<CloudStackFailureDomain>(&client, namespace), watcher())
            .owns(api::<CloudStackIsolatedNetwork>(&client, namespace), watcher())
            .shutdown_on_signal()
            .run(failure_domain::reconcile, error_policy, ctx.clone())
            .for_each(log_reconcile_result("CloudStackFailureDomain"));

    let networks = Controller::new(api::<CloudStackIsolatedNetwork>(&client, namespace), watcher())
        .shutdown_on_signal()
        .run(isolated_network::reconcile, error_policy, ctx.clone())
        .for_each(log_reconcile_result("CloudStackIsolatedNetwork"));

    let affinity_groups =
        Controller::new(api::<CloudStackAffinityGroup>(&client, namespace), watcher())
            .shutdown_on_signal()
            .run(affinity_group::reconcile, error_policy, ctx.clone())
            .for_each(log_reconcile_result("CloudStackAffinityGroup"));

    let machines = Controller::new(api::<CloudStackMachine>(&client, namespace), watcher())
        .shutdown_on_signal()
        .run(machine::reconcile, error_policy, ctx)
        .for_each(log_reconcile_result("CloudStackMachine"));

    tracing::info!("- CloudStackCluster controller");
    tracing::info!("- CloudStackFailureDomain controller");
    tracing::info!("- CloudStackIsolatedNetwork controller");
    tracing::info!("- CloudStackAffinityGroup controller");
    tracing::info!("- CloudStackMachine controller");

    vec![
        Box::pin(clusters),
        Box::pin(failure_domains),
        Box::pin(networks),
        Box::pin(affinity_groups),
        Box::pin(machines),
    ]
}

/// Creates a closure for logging reconciliation results.
fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
