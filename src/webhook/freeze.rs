//! Reference-freeze mutating webhook
//!
//! At workload creation, every ConfigMap reference in the pod template whose
//! name matches an EditableConfig in the same namespace is rewritten to the
//! name of that EditableConfig's current snapshot. References to ConfigMaps
//! that are not backed by an EditableConfig are left alone.
//!
//! Rewritten references:
//! - `volumes[].configMap.name`
//! - `volumes[].projected.sources[].configMap.name`
//! - `(initContainers|containers)[].env[].valueFrom.configMapKeyRef.name`
//! - `(initContainers|containers)[].envFrom[].configMapRef.name`

use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, Json};
use json_patch::{PatchOperation, ReplaceOperation};
use jsonptr::PointerBuf;
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use kube::{
    api::DynamicObject,
    core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation},
};
use tracing::{debug, error, info, warn};

use super::{EditableConfigLookup, WebhookState};
use crate::naming::snapshot_name_for;
use crate::Error;

/// A single reference rewrite inside a pod spec
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rewrite {
    /// Path tokens relative to the pod spec
    pub path: Vec<String>,
    /// Name the workload referenced
    pub from: String,
    /// Snapshot name it now references
    pub to: String,
}

/// Resolves referenced names against the EditableConfig cache
///
/// Each name is looked up at most once per admission request, so every
/// reference to the same EditableConfig is pinned to the same generation
/// even if the cache changes mid-request.
struct Resolver<'a> {
    namespace: &'a str,
    lookup: &'a dyn EditableConfigLookup,
    resolved: HashMap<String, Option<String>>,
}

impl<'a> Resolver<'a> {
    fn new(namespace: &'a str, lookup: &'a dyn EditableConfigLookup) -> Self {
        Self {
            namespace,
            lookup,
            resolved: HashMap::new(),
        }
    }

    fn frozen_name(&mut self, name: &str) -> Option<String> {
        if name.is_empty() {
            return None;
        }
        if let Some(cached) = self.resolved.get(name) {
            return cached.clone();
        }
        let frozen = self
            .lookup
            .get(self.namespace, name)
            .map(|editable| snapshot_name_for(&editable));
        self.resolved.insert(name.to_string(), frozen.clone());
        frozen
    }
}

struct Planner<'a> {
    resolver: Resolver<'a>,
    rewrites: Vec<Rewrite>,
}

impl Planner<'_> {
    fn visit(&mut self, path: Vec<String>, name: &str) {
        if let Some(to) = self.resolver.frozen_name(name) {
            self.rewrites.push(Rewrite {
                path,
                from: name.to_string(),
                to,
            });
        }
    }

    fn visit_containers(&mut self, field: &str, containers: &[Container]) {
        for (i, container) in containers.iter().enumerate() {
            for (k, env) in container.env.iter().flatten().enumerate() {
                let Some(key_ref) = env
                    .value_from
                    .as_ref()
                    .and_then(|source| source.config_map_key_ref.as_ref())
                else {
                    continue;
                };
                self.visit(
                    tokens([
                        field,
                        &i.to_string(),
                        "env",
                        &k.to_string(),
                        "valueFrom",
                        "configMapKeyRef",
                        "name",
                    ]),
                    &key_ref.name,
                );
            }

            for (k, env_from) in container.env_from.iter().flatten().enumerate() {
                let Some(cm_ref) = env_from.config_map_ref.as_ref() else {
                    continue;
                };
                self.visit(
                    tokens([
                        field,
                        &i.to_string(),
                        "envFrom",
                        &k.to_string(),
                        "configMapRef",
                        "name",
                    ]),
                    &cm_ref.name,
                );
            }
        }
    }
}

fn tokens<const N: usize>(parts: [&str; N]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

/// Compute the rewrites needed to freeze every EditableConfig reference in
/// `pod`
pub fn plan_rewrites(
    pod: &PodSpec,
    namespace: &str,
    lookup: &dyn EditableConfigLookup,
) -> Vec<Rewrite> {
    let mut planner = Planner {
        resolver: Resolver::new(namespace, lookup),
        rewrites: Vec::new(),
    };

    for (i, volume) in pod.volumes.iter().flatten().enumerate() {
        if let Some(config_map) = &volume.config_map {
            planner.visit(
                tokens(["volumes", &i.to_string(), "configMap", "name"]),
                &config_map.name,
            );
        }
        let sources = volume
            .projected
            .as_ref()
            .and_then(|projected| projected.sources.as_ref());
        for (j, source) in sources.into_iter().flatten().enumerate() {
            if let Some(config_map) = &source.config_map {
                planner.visit(
                    tokens([
                        "volumes",
                        &i.to_string(),
                        "projected",
                        "sources",
                        &j.to_string(),
                        "configMap",
                        "name",
                    ]),
                    &config_map.name,
                );
            }
        }
    }

    if let Some(init) = &pod.init_containers {
        planner.visit_containers("initContainers", init);
    }
    planner.visit_containers("containers", &pod.containers);

    planner.rewrites
}

/// Turn rewrites into JSON patch `replace` operations rooted at the pod
/// template pointed to by `template_path`
pub fn build_patch_operations(
    template_path: &[&str],
    rewrites: &[Rewrite],
) -> Vec<PatchOperation> {
    rewrites
        .iter()
        .map(|rewrite| {
            let path = template_path
                .iter()
                .map(|t| t.to_string())
                .chain(std::iter::once("spec".to_string()))
                .chain(rewrite.path.iter().cloned());
            PatchOperation::Replace(ReplaceOperation {
                path: PointerBuf::from_tokens(path),
                value: serde_json::Value::String(rewrite.to.clone()),
            })
        })
        .collect()
}

/// Handle mutating admission review for workloads
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<AdmissionReview<DynamicObject>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<DynamicObject> = match body.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to parse admission request");
            return Json(AdmissionResponse::invalid(e.to_string()).into_review());
        }
    };

    Json(freeze_request(&state, &req).into_review())
}

/// Decide the admission response for one workload request
pub fn freeze_request(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = request.uid.as_str();
    let allow = AdmissionResponse::from(request);

    if !matches!(request.operation, Operation::Create) {
        debug!(uid, operation = ?request.operation, "not a create, allowing unchanged");
        return allow;
    }
    let Some(kind) = state.kinds.lookup(&request.kind) else {
        debug!(uid, kind = %request.kind.kind, "not a workload kind, allowing unchanged");
        return allow;
    };
    let Some(obj) = &request.object else {
        debug!(uid, "no object in request, allowing unchanged");
        return allow;
    };
    let Some(namespace) = request
        .namespace
        .clone()
        .or_else(|| obj.metadata.namespace.clone())
    else {
        debug!(uid, "request has no namespace, allowing unchanged");
        return allow;
    };

    let template = match decode_template(obj, kind.template_path) {
        Ok(template) => template,
        Err(e) => {
            warn!(uid, kind = kind.kind, error = %e, "rejecting undecodable workload");
            return allow.deny(e.admission_message());
        }
    };
    let Some(pod) = template.spec else {
        return allow;
    };

    let rewrites = plan_rewrites(&pod, &namespace, state.editables.as_ref());
    if rewrites.is_empty() {
        debug!(uid, "no EditableConfig references, allowing unchanged");
        return allow;
    }

    for rewrite in &rewrites {
        info!(
            uid,
            namespace = %namespace,
            workload = ?obj.metadata.name,
            from = %rewrite.from,
            to = %rewrite.to,
            "freezing config reference"
        );
    }

    let ops = build_patch_operations(kind.template_path, &rewrites);
    match AdmissionResponse::from(request).with_patch(json_patch::Patch(ops)) {
        Ok(response) => response,
        Err(e) => {
            error!(uid, error = %e, "Failed to serialize patch");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

fn decode_template(obj: &DynamicObject, path: &[&str]) -> Result<PodTemplateSpec, Error> {
    let pointer = PointerBuf::from_tokens(path.iter().copied());
    let value = obj.data.pointer(pointer.as_str()).ok_or_else(|| {
        Error::validation_for_field(
            pointer.as_str(),
            "workload has no pod template",
            "expected a pod template at this path",
        )
    })?;
    serde_json::from_value(value.clone()).map_err(|e| {
        Error::validation_for_field(
            pointer.as_str(),
            "workload pod template cannot be decoded",
            e.to_string(),
        )
    })
}
