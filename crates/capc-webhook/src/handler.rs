//! Validating admission handler
//!
//! Decodes the AdmissionReview, dispatches on the object kind, and denies
//! the request with the rendered field errors when any rule fails. Kinds
//! this provider does not validate are allowed through.

use axum::{routing::post, Json, Router};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use capc_common::crd::{CloudStackCluster, CloudStackMachine, CloudStackMachineTemplate};
use capc_common::INFRA_GROUP;

use crate::cluster;
use crate::field::{invalid_message, FieldError};
use crate::machine::{self, MachineSpecSource};

/// Path the validating webhook configuration points at
pub const VALIDATE_PATH: &str = "/validate";

/// Error type for webhook operations
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The admission review request was invalid or malformed
    #[error("invalid admission review: {0}")]
    InvalidReview(String),

    /// The object did not decode as its declared kind
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Router serving the validating webhook
pub fn router() -> Router {
    Router::new().route(VALIDATE_PATH, post(validate_handler))
}

/// Handle a validating admission review
pub async fn validate_handler(
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(review(&req).into_review())
}

/// Validate one admission request
pub fn review(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let kind = request.kind.kind.as_str();
    let name = object_name(request);

    let errors = match field_errors(request) {
        Ok(errors) => errors,
        Err(e) => {
            error!(uid = %request.uid, kind = %kind, error = %e, "Failed to decode object");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    if errors.is_empty() {
        debug!(uid = %request.uid, kind = %kind, name = %name, "admitted");
        return AdmissionResponse::from(request);
    }

    let message = invalid_message(kind, INFRA_GROUP, &name, &errors);
    info!(uid = %request.uid, kind = %kind, name = %name, reason = %message, "denied");
    AdmissionResponse::from(request).deny(message)
}

fn field_errors(request: &AdmissionRequest<DynamicObject>) -> Result<Vec<FieldError>, WebhookError> {
    if request.kind.group != INFRA_GROUP {
        return Ok(Vec::new());
    }

    match (request.kind.kind.as_str(), &request.operation) {
        ("CloudStackCluster", Operation::Create) => {
            let new: CloudStackCluster = decode(request.object.as_ref())?;
            Ok(cluster::validate_create(&new.spec))
        }
        ("CloudStackCluster", Operation::Update) => {
            let old: CloudStackCluster = decode(request.old_object.as_ref())?;
            let new: CloudStackCluster = decode(request.object.as_ref())?;
            Ok(cluster::validate_update(&old.spec, &new.spec))
        }
        ("CloudStackMachine", Operation::Create) => {
            let new: CloudStackMachine = decode(request.object.as_ref())?;
            Ok(machine::validate_create(&new.spec, MachineSpecSource::Machine))
        }
        ("CloudStackMachine", Operation::Update) => {
            let old: CloudStackMachine = decode(request.old_object.as_ref())?;
            let new: CloudStackMachine = decode(request.object.as_ref())?;
            Ok(machine::validate_update(
                &old.spec,
                &new.spec,
                MachineSpecSource::Machine,
            ))
        }
        ("CloudStackMachineTemplate", Operation::Create) => {
            let new: CloudStackMachineTemplate = decode(request.object.as_ref())?;
            Ok(machine::validate_create(
                new.machine_spec(),
                MachineSpecSource::Template,
            ))
        }
        ("CloudStackMachineTemplate", Operation::Update) => {
            let old: CloudStackMachineTemplate = decode(request.old_object.as_ref())?;
            let new: CloudStackMachineTemplate = decode(request.object.as_ref())?;
            Ok(machine::validate_update(
                old.machine_spec(),
                new.machine_spec(),
                MachineSpecSource::Template,
            ))
        }
        _ => Ok(Vec::new()),
    }
}

fn decode<K: DeserializeOwned>(obj: Option<&DynamicObject>) -> Result<K, WebhookError> {
    let obj = obj.ok_or_else(|| WebhookError::InvalidReview("request carries no object".into()))?;
    Ok(serde_json::from_value(serde_json::to_value(obj)?)?)
}

fn object_name(request: &AdmissionRequest<DynamicObject>) -> String {
    if !request.name.is_empty() {
        return request.name.clone();
    }
    request
        .object
        .as_ref()
        .and_then(|o| o.metadata.name.clone())
        .unwrap_or_default()
}
