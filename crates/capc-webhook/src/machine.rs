//! CloudStackMachine and CloudStackMachineTemplate admission rules
//!
//! Both kinds carry the same machine spec; a template nests it under
//! `spec.template.spec`. A disk offering block without an offering is the
//! same as no data disk.

use capc_common::crd::{CloudStackMachineSpec, IDENTITY_REF_SECRET_KIND};

use crate::field::{immutable, FieldError};

/// Which kind a machine spec arrived in
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MachineSpecSource {
    /// A CloudStackMachine, spec at `spec`
    Machine,
    /// A CloudStackMachineTemplate, spec at `spec.template.spec`
    Template,
}

impl MachineSpecSource {
    fn path(self, field: &str) -> String {
        match self {
            MachineSpecSource::Machine => format!("spec.{}", field),
            MachineSpecSource::Template => format!("spec.template.spec.{}", field),
        }
    }
}

/// Create-time checks: offering and template set, identity is a Secret
pub fn validate_create(spec: &CloudStackMachineSpec, source: MachineSpecSource) -> Vec<FieldError> {
    let mut errors = Vec::new();

    if spec.offering.is_empty() {
        errors.push(FieldError::required(source.path("offering"), "Offering"));
    }
    if spec.template.is_empty() {
        errors.push(FieldError::required(source.path("template"), "Template"));
    }
    if let Some(identity) = &spec.identity_ref {
        if identity.kind != IDENTITY_REF_SECRET_KIND {
            errors.push(FieldError::forbidden(
                source.path("identityRef.kind"),
                "must be a Secret",
            ));
        }
    }

    errors
}

/// Update-time checks: everything baked into the instance stays fixed
pub fn validate_update(
    old: &CloudStackMachineSpec,
    new: &CloudStackMachineSpec,
    source: MachineSpecSource,
) -> Vec<FieldError> {
    let mut errors = Vec::new();

    immutable(
        &mut errors,
        &old.offering,
        &new.offering,
        &source.path("offering"),
        "offering",
    );
    immutable(
        &mut errors,
        &old.template,
        &new.template,
        &source.path("template"),
        "template",
    );
    immutable(
        &mut errors,
        &old.details,
        &new.details,
        &source.path("details"),
        "details",
    );

    let kind = |s: &CloudStackMachineSpec| s.identity_ref.as_ref().map(|r| r.kind.clone());
    let name = |s: &CloudStackMachineSpec| s.identity_ref.as_ref().map(|r| r.name.clone());
    immutable(
        &mut errors,
        &kind(old),
        &kind(new),
        &source.path("identityRef.kind"),
        "identityRef.Kind",
    );
    immutable(
        &mut errors,
        &name(old),
        &name(new),
        &source.path("identityRef.name"),
        "identityRef.Name",
    );

    immutable(
        &mut errors,
        &old.affinity_group_ids,
        &new.affinity_group_ids,
        &source.path("affinityGroupIDs"),
        "AffinityGroupIDs",
    );
    immutable(
        &mut errors,
        &old.data_disk(),
        &new.data_disk(),
        &source.path("diskOffering"),
        "diskOffering",
    );

    errors
}
