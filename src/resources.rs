//! Desired-state builders for snapshots and artifacts
//!
//! Pure functions: given an owner, build the object the controllers should
//! converge on. No API calls happen here.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use kube::{Resource, ResourceExt};

use crate::crd::{ConfigSnapshot, ConfigSnapshotSpec, EditableConfig};
use crate::naming::snapshot_name_for;
use crate::{
    Error, EDITABLE_CONFIG_LABEL, GENERATION_LABEL, LABEL_MANAGED_BY, MANAGED_BY_VALUE,
    SNAPSHOT_LABEL,
};

/// Annotation kubectl uses for client-side apply bookkeeping; never copied
const LAST_APPLIED_ANNOTATION: &str = "kubectl.kubernetes.io/last-applied-configuration";

/// Build the ConfigSnapshot capturing the EditableConfig's current generation
pub fn make_snapshot(editable: &EditableConfig) -> Result<ConfigSnapshot, Error> {
    let namespace = editable
        .namespace()
        .ok_or_else(|| Error::malformed_key("EditableConfig has no namespace"))?;
    let owner = editable
        .controller_owner_ref(&())
        .ok_or_else(|| Error::malformed_key("EditableConfig has no name or uid"))?;

    let mut annotations = editable.annotations().clone();
    annotations.remove(LAST_APPLIED_ANNOTATION);

    let labels = BTreeMap::from([
        (LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string()),
        (EDITABLE_CONFIG_LABEL.to_string(), editable.name_any()),
        (
            GENERATION_LABEL.to_string(),
            editable.current_generation().to_string(),
        ),
    ]);

    Ok(ConfigSnapshot {
        metadata: ObjectMeta {
            name: Some(snapshot_name_for(editable)),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            labels: Some(labels),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: ConfigSnapshotSpec(editable.spec.0.clone()),
    })
}

/// Build the ConfigMap materializing a ConfigSnapshot
pub fn make_artifact(snapshot: &ConfigSnapshot) -> Result<ConfigMap, Error> {
    let namespace = snapshot
        .namespace()
        .ok_or_else(|| Error::malformed_key("ConfigSnapshot has no namespace"))?;
    let owner = snapshot
        .controller_owner_ref(&())
        .ok_or_else(|| Error::malformed_key("ConfigSnapshot has no name or uid"))?;

    let mut labels = snapshot.labels().clone();
    labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY_VALUE.to_string());
    labels.insert(SNAPSHOT_LABEL.to_string(), snapshot.name_any());

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(snapshot.name_any()),
            namespace: Some(namespace),
            owner_references: Some(vec![owner]),
            labels: Some(labels),
            ..Default::default()
        },
        data: Some(snapshot.spec.0.clone()),
        ..Default::default()
    })
}

/// Whether an existing artifact carries exactly the snapshot's content
pub fn artifact_matches(artifact: &ConfigMap, snapshot: &ConfigSnapshot) -> bool {
    let data_matches = match &artifact.data {
        Some(data) => data == &snapshot.spec.0,
        None => snapshot.spec.0.is_empty(),
    };
    let no_binary = artifact
        .binary_data
        .as_ref()
        .is_none_or(|binary| binary.is_empty());
    data_matches && no_binary
}
