//! Custom Resource Definitions for configpin
//!
//! - [`EditableConfig`]: user-edited key/value configuration
//! - [`ConfigSnapshot`]: immutable, generation-named copy of an EditableConfig
//!
//! The materialized artifact is a plain core/v1 ConfigMap and has no CRD.

mod editable;
mod snapshot;

pub use editable::{EditableConfig, EditableConfigSpec};
pub use snapshot::{spec_diff, ConfigSnapshot, ConfigSnapshotSpec};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group shared by all configpin CRDs
pub const API_GROUP: &str = "configpin.dev";

/// API version served for all configpin CRDs
pub const API_VERSION: &str = "v1alpha1";

/// All CRDs owned by configpin, in installation order
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![EditableConfig::crd(), ConfigSnapshot::crd()]
}
