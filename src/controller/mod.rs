//! Controllers for configpin
//!
//! Two level-triggered reconcilers form a pipeline:
//!
//! - [`editable`]: EditableConfig -> ConfigSnapshot for the current generation
//! - [`snapshot`]: ConfigSnapshot -> ConfigMap with identical data
//!
//! Both run on `kube::runtime::Controller`, which deduplicates triggers per
//! object and never runs two reconciliations of the same object at once.

mod clients;
pub mod editable;
mod runner;
pub mod snapshot;

use std::time::Duration;

use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use tracing::{error, info, warn};

pub use clients::{ArtifactClient, CachedApi, SnapshotClient};
pub use editable::EditableContext;
pub use runner::{
    build_controllers, cache, editable_cache, owned_reflector, reflect_then_trigger, BoxedTask,
    WATCH_TIMEOUT_SECS,
};
pub use snapshot::SnapshotContext;

#[cfg(test)]
pub use clients::{MockArtifactClient, MockSnapshotClient};

use crate::retry::Backoff;
use crate::Error;

/// Periodic resync of objects that reconciled successfully
pub const RESYNC_PERIOD: Duration = Duration::from_secs(10 * 60 * 60);

/// `namespace/name` key used for logging and backoff bookkeeping
pub fn object_key(namespace: &str, name: &str) -> String {
    format!("{namespace}/{name}")
}

/// Key of a watched object, tolerating missing metadata
pub(crate) fn key_of<K: Resource>(obj: &K) -> String {
    object_key(&obj.namespace().unwrap_or_default(), &obj.name_any())
}

/// Shared error policy: back off on retryable errors, drop the rest
pub(crate) fn requeue_after_error(
    backoff: &Backoff,
    kind: &str,
    key: &str,
    error: &Error,
) -> Action {
    if error.is_retryable() {
        let delay = backoff.next_delay(key);
        warn!(
            kind,
            key,
            error = %error,
            failures = backoff.failures(key),
            delay_ms = delay.as_millis(),
            "reconciliation failed, requeueing"
        );
        return Action::requeue(delay);
    }

    backoff.reset(key);
    match error {
        Error::NotFound { .. } => {
            info!(kind, key, error = %error, "object vanished during reconciliation")
        }
        Error::MalformedKey { .. } => {
            error!(kind, key, error = %error, "dropping malformed reconciliation request")
        }
        _ => error!(kind, key, error = %error, "reconciliation failed permanently"),
    }
    Action::await_change()
}
