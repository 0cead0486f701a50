//! Reconcilers for the CloudStack infrastructure provider
//!
//! Each CRD kind has a reconciler under [`controller`] that drives its
//! object from `Pending` to `Ready`. Kubernetes access, owner lookups and
//! cloud clients sit behind traits so the reconcilers run against mocks.

#![deny(missing_docs)]

pub mod client;
pub mod cloud_factory;
pub mod context;
pub mod controller;
pub mod ownership;

pub use client::{KubeClient, KubeClientImpl};
pub use cloud_factory::{broker_for_failure_domain, ClientFactory, ClientFactoryImpl};
pub use context::{Context, ContextBuilder, ReconcileConfig};
pub use controller::error_policy;
pub use ownership::{
    get_owner_of_kind, is_owner_deleted, management_owner_ref, KubeOwnerLookup, OwnerKind,
    OwnerLookup,
};

#[cfg(test)]
pub(crate) fn test_context() -> Context {
    use std::sync::Arc;

    Context::for_testing(
        Arc::new(client::MockKubeClient::new()),
        Arc::new(ownership::MockOwnerLookup::new()),
        Arc::new(cloud_factory::MockClientFactory::new()),
    )
}
