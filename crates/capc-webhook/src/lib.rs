//! Admission invariant enforcement for the CloudStack infrastructure CRDs
//!
//! Create-time rules reject missing required fields and non-Secret
//! identities. Update-time rules reject changes to anything baked into a
//! cloud resource at creation. Denials carry API-server style field errors.

#![deny(missing_docs)]

pub mod cluster;
pub mod field;
pub mod handler;
pub mod machine;

pub use field::{invalid_message, FieldError, FieldErrorKind};
pub use handler::{review, router, validate_handler, WebhookError, VALIDATE_PATH};
pub use machine::MachineSpecSource;
