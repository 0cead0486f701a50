//! Shared reconciler context

use std::sync::Arc;
use std::time::Duration;

use kube::Client;

use capc_common::scheme::Scheme;

use crate::client::{KubeClient, KubeClientImpl};
use crate::cloud_factory::{ClientFactory, ClientFactoryImpl};
use crate::ownership::{KubeOwnerLookup, OwnerLookup};

/// Timing knobs shared by all reconcilers
#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    /// Requeue interval once an object is Ready
    pub requeue_interval: Duration,
    /// Requeue interval while waiting on another object
    pub pending_requeue: Duration,
    /// How long an instance may stay out of Running before its machine is replaced
    pub instance_state_timeout: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(300),
            pending_requeue: Duration::from_secs(10),
            instance_state_timeout: Duration::from_secs(5 * 60),
        }
    }
}

/// Controller context shared by every reconciler
///
/// Use [`ContextBuilder`] to construct instances:
///
/// ```text
/// let ctx = Context::builder(client)
///     .config(config)
///     .build();
/// ```
pub struct Context {
    /// Kubernetes client for API operations (trait object for testability)
    pub kube: Arc<dyn KubeClient>,
    /// Owner object reads for the owner graph
    pub owners: Arc<dyn OwnerLookup>,
    /// Cloud clients per endpoint secret
    pub clouds: Arc<dyn ClientFactory>,
    /// Type-to-kind registry for owner resolution
    pub scheme: Arc<Scheme>,
    /// Timing knobs
    pub config: ReconcileConfig,
}

impl Context {
    /// Create a builder for constructing a Context
    pub fn builder(client: Client) -> ContextBuilder {
        ContextBuilder::new(client)
    }

    /// Create a new controller context with the given Kubernetes client
    ///
    /// Equivalent to `Context::builder(client).build()`.
    pub fn new(client: Client) -> Self {
        Self::builder(client).build()
    }

    /// Create a context for testing with mock clients
    #[cfg(test)]
    pub fn for_testing(
        kube: Arc<dyn KubeClient>,
        owners: Arc<dyn OwnerLookup>,
        clouds: Arc<dyn ClientFactory>,
    ) -> Self {
        Self {
            kube,
            owners,
            clouds,
            scheme: Arc::new(Scheme::with_provider_kinds()),
            config: ReconcileConfig::default(),
        }
    }
}

/// Builder for constructing [`Context`] instances
pub struct ContextBuilder {
    client: Client,
    kube: Option<Arc<dyn KubeClient>>,
    owners: Option<Arc<dyn OwnerLookup>>,
    clouds: Option<Arc<dyn ClientFactory>>,
    config: ReconcileConfig,
}

impl ContextBuilder {
    fn new(client: Client) -> Self {
        Self {
            client,
            kube: None,
            owners: None,
            clouds: None,
            config: ReconcileConfig::default(),
        }
    }

    /// Override the Kubernetes client
    pub fn kube_client(mut self, kube: Arc<dyn KubeClient>) -> Self {
        self.kube = Some(kube);
        self
    }

    /// Override the owner lookup
    pub fn owner_lookup(mut self, owners: Arc<dyn OwnerLookup>) -> Self {
        self.owners = Some(owners);
        self
    }

    /// Override the cloud client factory
    pub fn client_factory(mut self, clouds: Arc<dyn ClientFactory>) -> Self {
        self.clouds = Some(clouds);
        self
    }

    /// Set timing knobs
    pub fn config(mut self, config: ReconcileConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the Context
    pub fn build(self) -> Context {
        let kube: Arc<dyn KubeClient> = self
            .kube
            .unwrap_or_else(|| Arc::new(KubeClientImpl::new(self.client.clone())));
        let owners = self
            .owners
            .unwrap_or_else(|| Arc::new(KubeOwnerLookup::new(self.client.clone())));
        let clouds = self
            .clouds
            .unwrap_or_else(|| Arc::new(ClientFactoryImpl::new(kube.clone())));

        Context {
            kube,
            owners,
            clouds,
            scheme: Arc::new(Scheme::with_provider_kinds()),
            config: self.config,
        }
    }
}
