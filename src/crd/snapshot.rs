//! ConfigSnapshot CRD and the spec diff used to keep it immutable

use std::collections::BTreeMap;
use std::fmt::Write as _;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Immutable copy of one EditableConfig generation.
///
/// Named `<editable>-<generation padded to 5 digits>` and owned by the
/// EditableConfig it was copied from. The spec never changes after creation;
/// the validating webhook rejects any update that would alter it.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "configpin.dev",
    version = "v1alpha1",
    kind = "ConfigSnapshot",
    plural = "configsnapshots",
    shortname = "csnap",
    namespaced,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(transparent)]
pub struct ConfigSnapshotSpec(pub BTreeMap<String, String>);

impl From<BTreeMap<String, String>> for ConfigSnapshotSpec {
    fn from(data: BTreeMap<String, String>) -> Self {
        Self(data)
    }
}

/// Key-level diff between two specs in `-old +new` form
///
/// Returns `None` when both maps are equal. Changed keys produce a `-` and a
/// `+` line, keys present on one side only produce a single line. Lines are
/// ordered by key.
pub fn spec_diff(old: &BTreeMap<String, String>, new: &BTreeMap<String, String>) -> Option<String> {
    if old == new {
        return None;
    }

    let mut keys: Vec<&String> = old.keys().chain(new.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut out = String::new();
    for key in keys {
        let before = old.get(key);
        let after = new.get(key);
        if before == after {
            continue;
        }
        if let Some(v) = before {
            let _ = writeln!(out, "-{key}: {v:?}");
        }
        if let Some(v) = after {
            let _ = writeln!(out, "+{key}: {v:?}");
        }
    }
    Some(out.trim_end().to_string())
}
