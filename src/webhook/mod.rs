//! Admission webhooks for configpin
//!
//! Two hooks share one HTTPS server:
//!
//! - Freeze (mutating): on workload CREATE, rewrites ConfigMap references that
//!   name an EditableConfig into the ConfigMap of its current snapshot
//! - Immutable guard (validating): on ConfigSnapshot UPDATE, rejects any
//!   change to the spec
//!
//! The freeze hook only reads from a local cache of EditableConfigs; neither
//! hook writes to the API server.

pub mod freeze;
pub mod immutable;
pub mod kinds;
pub mod server;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use kube::runtime::reflector::{ObjectRef, Store};

#[cfg(test)]
use mockall::automock;

use crate::crd::EditableConfig;
use kinds::WorkloadKinds;

pub use server::{ensure_webhook_configs, serve};

/// Path of the freeze hook
pub const FREEZE_PATH: &str = "/mutate/workloads";

/// Path of the snapshot immutability hook
pub const IMMUTABLE_PATH: &str = "/validate/configsnapshots";

/// Read access to EditableConfigs at admission time
#[cfg_attr(test, automock)]
pub trait EditableConfigLookup: Send + Sync {
    /// The EditableConfig `name` in `namespace`, if known
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<EditableConfig>>;
}

impl EditableConfigLookup for Store<EditableConfig> {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<EditableConfig>> {
        Store::get(self, &ObjectRef::new(name).within(namespace))
    }
}

/// Shared state for webhook handlers
pub struct WebhookState {
    /// EditableConfig lookup used by the freeze hook
    pub editables: Arc<dyn EditableConfigLookup>,
    /// Workload kinds the freeze hook rewrites
    pub kinds: WorkloadKinds,
}

impl WebhookState {
    /// Create webhook state around an EditableConfig lookup
    pub fn new(editables: Arc<dyn EditableConfigLookup>, kinds: WorkloadKinds) -> Self {
        Self { editables, kinds }
    }
}

/// Create the webhook router with both admission endpoints
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(FREEZE_PATH, post(freeze::mutate_handler))
        .route(IMMUTABLE_PATH, post(immutable::validate_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}
