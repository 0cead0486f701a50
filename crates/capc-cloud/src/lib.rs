//! CloudStack side of the provider: organizational paths, the remote
//! capability set, and the idempotent resource broker built on it.

#![deny(missing_docs)]

pub mod broker;
pub mod client;
pub mod credentials;
pub mod error;
pub mod http;
#[cfg(any(test, feature = "test-helpers"))]
pub mod memory;
pub mod path;
pub mod types;

pub use broker::Broker;
pub use client::CloudApi;
#[cfg(test)]
pub use client::MockCloudApi;
pub use credentials::CloudCredentials;
pub use error::CloudError;
pub use http::HttpCloudClient;
pub use path::OrgPath;
pub use types::{
    Account, AccountRecord, AffinityGroup, AffinityGroupRecord, ApiKeys, DeployVmRequest, Domain,
    DomainRecord, Network, NetworkRecord, User, UserRecord, VmRecord, ZoneRecord,
};
