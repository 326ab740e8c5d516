//! Snapshot naming rule
//!
//! A snapshot's name is derived from its EditableConfig's name and the
//! generation it captures. The rule is shared by the controller (which mints
//! snapshots) and the freeze webhook (which points workloads at them), so both
//! sides always agree on the name without any lookup.

use kube::ResourceExt;

use crate::crd::EditableConfig;

/// Name of the snapshot capturing `name` at `generation`
///
/// The generation is zero-padded to five digits; larger generations are
/// written in full so distinct generations never collide.
pub fn snapshot_name(name: &str, generation: i64) -> String {
    format!("{name}-{generation:05}")
}

/// Name of the snapshot for the EditableConfig's current generation
pub fn snapshot_name_for(editable: &EditableConfig) -> String {
    snapshot_name(&editable.name_any(), editable.current_generation())
}
