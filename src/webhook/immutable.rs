//! ConfigSnapshot immutability guard
//!
//! Rejects UPDATE requests that change a snapshot's spec. Metadata changes
//! (labels, annotations, finalizers) are allowed. CREATE and DELETE are not
//! inspected.

use std::collections::BTreeMap;

use axum::Json;
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use tracing::{debug, error, warn};

use crate::crd::spec_diff;
use crate::Error;

/// Handle validating admission review for ConfigSnapshots
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

    Json(check_update(&req).into_review())
}

/// Decide the admission response for one snapshot request
pub fn check_update(request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    let allow = AdmissionResponse::from(request);

    if !matches!(request.operation, Operation::Update) || request.kind.kind != "ConfigSnapshot" {
        return allow;
    }
    let (Some(new), Some(old)) = (&request.object, &request.old_object) else {
        debug!(uid = %request.uid, "update without both objects, allowing");
        return allow;
    };

    match (decode_spec(old), decode_spec(new)) {
        (Ok(old_spec), Ok(new_spec)) => match spec_diff(&old_spec, &new_spec) {
            None => allow,
            Some(diff) => {
                warn!(
                    uid = %request.uid,
                    snapshot = %request.name,
                    namespace = ?request.namespace,
                    "rejecting change to immutable snapshot spec"
                );
                allow.deny(
                    Error::validation_for_field("spec", "Immutable fields changed (-old +new)", diff)
                        .admission_message(),
                )
            }
        },
        (Err(e), _) | (_, Err(e)) => allow.deny(e.admission_message()),
    }
}

fn decode_spec(obj: &DynamicObject) -> Result<BTreeMap<String, String>, Error> {
    match obj.data.get("spec") {
        None | Some(serde_json::Value::Null) => Ok(BTreeMap::new()),
        Some(spec) => serde_json::from_value(spec.clone()).map_err(|e| {
            Error::validation_for_field(
                "spec",
                "ConfigSnapshot spec must map strings to strings",
                e.to_string(),
            )
        }),
    }
}
