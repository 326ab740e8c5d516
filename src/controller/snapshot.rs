//! ConfigSnapshot controller
//!
//! Materializes each snapshot as a ConfigMap of the same name. Snapshot
//! content cannot change after creation, so drift here only comes from
//! someone editing the ConfigMap by hand; it is overwritten.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, info, instrument, warn};

use super::{key_of, requeue_after_error, ArtifactClient, RESYNC_PERIOD};
use crate::crd::ConfigSnapshot;
use crate::resources::{artifact_matches, make_artifact};
use crate::retry::{Backoff, RetryConfig};
use crate::Error;

/// Shared state for ConfigSnapshot reconciliations
pub struct SnapshotContext {
    /// ConfigMap storage
    pub artifacts: Arc<dyn ArtifactClient>,
    /// Per-object failure tracking for the error policy
    pub backoff: Backoff,
}

impl SnapshotContext {
    /// Create a context around the given artifact storage
    pub fn new(artifacts: Arc<dyn ArtifactClient>, retry: RetryConfig) -> Self {
        Self {
            artifacts,
            backoff: Backoff::new(retry),
        }
    }
}

/// Reconcile a ConfigSnapshot into its artifact ConfigMap
#[instrument(skip(snapshot, ctx), fields(snapshot = %key_of(snapshot.as_ref())))]
pub async fn reconcile(
    snapshot: Arc<ConfigSnapshot>,
    ctx: Arc<SnapshotContext>,
) -> Result<Action, Error> {
    let namespace = snapshot
        .namespace()
        .ok_or_else(|| Error::malformed_key("ConfigSnapshot has no namespace"))?;
    let name = snapshot.name_any();

    match ctx.artifacts.get(&namespace, &name).await? {
        None => {
            info!(artifact = %name, keys = snapshot.spec.0.len(), "creating artifact");
            let desired = make_artifact(&snapshot)?;
            ctx.artifacts.create(&desired).await?;
        }
        Some(existing) if artifact_matches(&existing, &snapshot) => {
            debug!(artifact = %name, "artifact up to date");
        }
        Some(mut existing) => {
            warn!(artifact = %name, "artifact content drifted from its snapshot, overwriting");
            existing.data = Some(snapshot.spec.0.clone());
            existing.binary_data = None;
            ctx.artifacts.replace(&existing).await?;
        }
    }

    ctx.backoff.reset(&key_of(snapshot.as_ref()));
    Ok(Action::requeue(RESYNC_PERIOD))
}

/// Error policy for the ConfigSnapshot controller
pub fn error_policy(
    snapshot: Arc<ConfigSnapshot>,
    error: &Error,
    ctx: Arc<SnapshotContext>,
) -> Action {
    requeue_after_error(
        &ctx.backoff,
        "ConfigSnapshot",
        &key_of(snapshot.as_ref()),
        error,
    )
}
