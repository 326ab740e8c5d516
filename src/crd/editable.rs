//! EditableConfig CRD

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Key/value configuration that users edit in place.
///
/// The API server bumps `metadata.generation` on every spec change; each
/// generation is captured by one ConfigSnapshot.
///
/// Example:
/// ```yaml
/// apiVersion: configpin.dev/v1alpha1
/// kind: EditableConfig
/// metadata:
///   name: db-config
///   namespace: default
/// spec:
///   url: postgres://db:5432/app
///   pool: "10"
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "configpin.dev",
    version = "v1alpha1",
    kind = "EditableConfig",
    plural = "editableconfigs",
    shortname = "ecfg",
    namespaced,
    printcolumn = r#"{"name":"Generation","type":"integer","jsonPath":".metadata.generation"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(transparent)]
pub struct EditableConfigSpec(pub BTreeMap<String, String>);

impl EditableConfig {
    /// Generation as recorded by the API server (0 if not yet assigned)
    pub fn current_generation(&self) -> i64 {
        self.metadata.generation.unwrap_or(0)
    }
}

impl From<BTreeMap<String, String>> for EditableConfigSpec {
    fn from(data: BTreeMap<String, String>) -> Self {
        Self(data)
    }
}
