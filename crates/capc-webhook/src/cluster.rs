//! CloudStackCluster admission rules

use capc_common::crd::{CloudStackClusterSpec, IDENTITY_REF_SECRET_KIND};

use crate::field::{immutable, FieldError};

/// Create-time checks: zones with networks, identity is a Secret
pub fn validate_create(spec: &CloudStackClusterSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if spec.zones.is_empty() {
        errors.push(FieldError::required("spec.zones", "Zones"));
    }
    if spec.zones.iter().any(|z| z.network.is_none()) {
        errors.push(FieldError::required(
            "spec.zones.network",
            "each Zone requires a Network specification",
        ));
    }
    if let Some(identity) = &spec.identity_ref {
        if identity.kind != IDENTITY_REF_SECRET_KIND {
            errors.push(FieldError::forbidden(
                "spec.identityRef.kind",
                "must be a Secret",
            ));
        }
    }

    errors
}

/// Update-time checks: placement, endpoint and identity never change
pub fn validate_update(old: &CloudStackClusterSpec, new: &CloudStackClusterSpec) -> Vec<FieldError> {
    let mut errors = Vec::new();

    immutable(
        &mut errors,
        &old.zones,
        &new.zones,
        "spec.zones",
        "Zones and sub-attributes cannot be changed",
    );
    immutable(
        &mut errors,
        &old.control_plane_endpoint.host,
        &new.control_plane_endpoint.host,
        "spec.controlPlaneEndpoint.host",
        "controlplaneendpoint.host",
    );
    immutable(
        &mut errors,
        &old.control_plane_endpoint.port,
        &new.control_plane_endpoint.port,
        "spec.controlPlaneEndpoint.port",
        "controlplaneendpoint.port",
    );

    let kind = |s: &CloudStackClusterSpec| s.identity_ref.as_ref().map(|r| r.kind.clone());
    let name = |s: &CloudStackClusterSpec| s.identity_ref.as_ref().map(|r| r.name.clone());
    immutable(
        &mut errors,
        &kind(old),
        &kind(new),
        "spec.identityRef.kind",
        "identityRef.Kind",
    );
    immutable(
        &mut errors,
        &name(old),
        &name(new),
        "spec.identityRef.name",
        "identityRef.name",
    );

    errors
}
