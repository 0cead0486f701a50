//! Common types for the CloudStack infrastructure provider: CRDs, errors, and utilities

#![deny(missing_docs)]

pub mod compress;
pub mod crd;
pub mod error;
#[cfg(any(test, feature = "test-helpers"))]
pub mod fixtures;
pub mod kube_utils;
pub mod retry;
pub mod scheme;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group of the infrastructure CRDs served by this provider
pub const INFRA_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// API version of the infrastructure CRDs served by this provider
pub const INFRA_VERSION: &str = "v1beta2";

/// Label CAPI puts on every object belonging to a workload cluster
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Label CAPI puts on control plane Machines
pub const CONTROL_PLANE_LABEL: &str = "cluster.x-k8s.io/control-plane";

/// Field manager used for all server-side apply and status patches
pub const FIELD_MANAGER: &str = "capc-controller";
