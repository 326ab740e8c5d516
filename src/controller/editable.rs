//! EditableConfig controller
//!
//! Guarantees that the snapshot for an EditableConfig's current generation
//! exists with identical content. Older snapshots are left alone: once a
//! generation's name has been minted, workloads may be pinned to it.

use std::sync::Arc;

use dashmap::DashMap;
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, instrument, warn};

use super::{key_of, object_key, requeue_after_error, SnapshotClient, RESYNC_PERIOD};
use crate::crd::{spec_diff, EditableConfig};
use crate::resources::make_snapshot;
use crate::retry::{Backoff, RetryConfig};
use crate::Error;

/// Shared state for EditableConfig reconciliations
pub struct EditableContext {
    /// Snapshot storage (read-through cache + API writes in production)
    pub snapshots: Arc<dyn SnapshotClient>,
    /// Per-object failure tracking for the error policy
    pub backoff: Backoff,
    /// Per EditableConfig key, the snapshot this process last created and
    /// has not yet seen with matching content. An in-place spec fix is only
    /// expected for these.
    minted: DashMap<String, String>,
}

/// Bound on [`EditableContext`]'s minted table; the table is cleared when
/// full, which only downgrades a later catch-up warning to an error log
const MINTED_CAPACITY: usize = 4096;

impl EditableContext {
    /// Create a context around the given snapshot storage
    pub fn new(snapshots: Arc<dyn SnapshotClient>, retry: RetryConfig) -> Self {
        Self {
            snapshots,
            backoff: Backoff::new(retry),
            minted: DashMap::new(),
        }
    }

    /// The snapshot (`namespace/name`) this process created for the
    /// EditableConfig `editable_key` and has not yet observed converged
    pub fn minted_snapshot(&self, editable_key: &str) -> Option<String> {
        self.minted.get(editable_key).map(|entry| entry.value().clone())
    }

    fn recently_minted(&self, editable_key: &str, snapshot_key: &str) -> bool {
        self.minted_snapshot(editable_key).as_deref() == Some(snapshot_key)
    }

    /// Remember a fresh snapshot, replacing any earlier generation's entry
    fn record_minted(&self, editable_key: String, snapshot_key: String) {
        if self.minted.len() >= MINTED_CAPACITY && !self.minted.contains_key(&editable_key) {
            debug!(entries = self.minted.len(), "minted snapshot table full, clearing");
            self.minted.clear();
        }
        self.minted.insert(editable_key, snapshot_key);
    }

    fn clear_minted(&self, editable_key: &str, snapshot_key: &str) {
        self.minted
            .remove_if(editable_key, |_, minted| minted == snapshot_key);
    }
}

/// Reconcile an EditableConfig into the snapshot for its current generation
///
/// Level-triggered: the desired snapshot is derived from the object alone,
/// so running it repeatedly on unchanged input performs no writes after the
/// first pass.
#[instrument(skip(editable, ctx), fields(editable = %key_of(editable.as_ref())))]
pub async fn reconcile(
    editable: Arc<EditableConfig>,
    ctx: Arc<EditableContext>,
) -> Result<Action, Error> {
    let namespace = editable
        .namespace()
        .ok_or_else(|| Error::malformed_key("EditableConfig has no namespace"))?;
    let desired = make_snapshot(&editable)?;
    let snapshot_name = desired.name_any();
    let snapshot_key = object_key(&namespace, &snapshot_name);
    let editable_key = key_of(editable.as_ref());

    match ctx.snapshots.get(&namespace, &snapshot_name).await? {
        None => {
            info!(
                snapshot = %snapshot_name,
                generation = editable.current_generation(),
                "creating snapshot"
            );
            ctx.snapshots.create(&desired).await?;
            ctx.record_minted(editable_key.clone(), snapshot_key);
        }
        Some(existing) if existing.spec == desired.spec => {
            debug!(snapshot = %snapshot_name, "snapshot up to date");
            ctx.clear_minted(&editable_key, &snapshot_key);
        }
        Some(existing) => {
            let diff = spec_diff(&existing.spec.0, &desired.spec.0).unwrap_or_default();
            if ctx.recently_minted(&editable_key, &snapshot_key) {
                warn!(
                    snapshot = %snapshot_name,
                    %diff,
                    "snapshot observed with stale content right after creation, converging"
                );
            } else {
                error!(
                    snapshot = %snapshot_name,
                    generation = editable.current_generation(),
                    %diff,
                    "snapshot content differs from its EditableConfig at the same generation; \
                     overwriting an already published snapshot"
                );
            }

            let mut updated = existing;
            updated.spec = desired.spec;
            ctx.snapshots.replace(&updated).await?;
        }
    }

    ctx.backoff.reset(&editable_key);
    Ok(Action::requeue(RESYNC_PERIOD))
}

/// Error policy for the EditableConfig controller
pub fn error_policy(
    editable: Arc<EditableConfig>,
    error: &Error,
    ctx: Arc<EditableContext>,
) -> Action {
    requeue_after_error(
        &ctx.backoff,
        "EditableConfig",
        &key_of(editable.as_ref()),
        error,
    )
}
