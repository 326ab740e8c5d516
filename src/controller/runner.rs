//! Controller and cache wiring
//!
//! Builds the watch-fed caches the reconcilers read from and the two
//! `kube::runtime::Controller` loops. Everything here returns futures; the
//! binary decides how to drive them.
//!
//! Each owned kind (ConfigSnapshots, ConfigMaps) is watched once. That one
//! stream first updates the reflector store the reconcilers read and then
//! triggers the owner, so a reconcile caused by a delete never reads the
//! deleted object back from the store.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{future, Stream, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::Api;
use kube::runtime::controller::{self, Controller};
use kube::runtime::reflector::{self, store::Writer, Store};
use kube::runtime::watcher::{self, Config as WatcherConfig};
use kube::runtime::WatchStreamExt;
use kube::{Client, Resource};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};

use super::{editable, snapshot, CachedApi, EditableContext, SnapshotContext};
use crate::config::ControllerConfig;
use crate::crd::{ConfigSnapshot, EditableConfig};
use crate::MANAGED_BY_SELECTOR;

/// Server-side watch timeout; kept below common proxy idle timeouts
pub const WATCH_TIMEOUT_SECS: u32 = 25;

/// A long-running task that completes on shutdown
pub type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

fn watcher_config() -> WatcherConfig {
    WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS)
}

fn managed_watcher_config() -> WatcherConfig {
    watcher_config().labels(MANAGED_BY_SELECTOR)
}

/// Start a reflector for `api`, returning its store and the task feeding it
pub fn cache<K>(api: Api<K>, config: WatcherConfig) -> (Store<K>, BoxedTask)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let kind = K::kind(&()).to_string();
    let task = watcher::watcher(api, config)
        .default_backoff()
        .reflect(writer)
        .applied_objects()
        .for_each(move |event| {
            if let Err(e) = event {
                debug!(kind = %kind, error = %e, "watch stream error, backing off");
            }
            future::ready(())
        });
    (reader, Box::pin(task))
}

/// Apply every watch event to `writer`, then yield the object it touched
///
/// Deletes are yielded too, after the store has dropped the object.
pub fn reflect_then_trigger<K, S>(
    events: S,
    writer: Writer<K>,
) -> impl Stream<Item = Result<K, watcher::Error>> + Send + 'static
where
    K: Resource<DynamicType = ()> + Clone + Send + Sync + 'static,
    S: Stream<Item = Result<watcher::Event<K>, watcher::Error>> + Send + 'static,
{
    events.reflect(writer).touched_objects()
}

/// Watch configpin-managed objects of kind `K` once, returning the store
/// the reconcilers read and the owner-trigger stream that feeds it
///
/// The store fills as the returned stream is polled by its controller;
/// until then reads miss and fall through to the API server.
pub fn owned_reflector<K>(
    api: Api<K>,
) -> (
    Store<K>,
    impl Stream<Item = Result<K, watcher::Error>> + Send + 'static,
)
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let (reader, writer) = reflector::store();
    let events = watcher::watcher(api, managed_watcher_config()).default_backoff();
    (reader, reflect_then_trigger(events, writer))
}

/// Cache of EditableConfigs used by the freeze webhook
pub fn editable_cache(client: &Client) -> (Store<EditableConfig>, BoxedTask) {
    cache(Api::<EditableConfig>::all(client.clone()), watcher_config())
}

/// Log the outcome of a single reconciliation
fn log_reconcile_result<T: Debug, E: Debug>(
    kind: &'static str,
) -> impl Fn(Result<T, E>) -> future::Ready<()> {
    move |result| {
        match result {
            Ok(obj) => debug!(kind, ?obj, "reconciliation completed"),
            Err(e) => error!(kind, error = ?e, "reconciliation error"),
        }
        future::ready(())
    }
}

/// Build both controller loops
///
/// The EditableConfig controller also watches the snapshots it owns, so a
/// deleted or tampered snapshot re-triggers its owner. Likewise for the
/// ConfigSnapshot controller and its ConfigMaps.
pub fn build_controllers(client: &Client, config: &ControllerConfig) -> Vec<BoxedTask> {
    let runtime = controller::Config::default().concurrency(config.concurrency);

    let (snapshot_store, snapshot_triggers) =
        owned_reflector(Api::<ConfigSnapshot>::all(client.clone()));
    let (artifact_store, artifact_triggers) =
        owned_reflector(Api::<ConfigMap>::all(client.clone()));

    let editable_ctx = Arc::new(EditableContext::new(
        Arc::new(CachedApi::new(client.clone(), snapshot_store)),
        config.retry.clone(),
    ));
    let snapshot_ctx = Arc::new(SnapshotContext::new(
        Arc::new(CachedApi::new(client.clone(), artifact_store)),
        config.retry.clone(),
    ));

    info!(concurrency = config.concurrency, "starting configpin controllers");

    let editables = Controller::new(Api::<EditableConfig>::all(client.clone()), watcher_config())
        .owns_stream(snapshot_triggers)
        .with_config(runtime.clone())
        .shutdown_on_signal()
        .run(editable::reconcile, editable::error_policy, editable_ctx)
        .for_each(log_reconcile_result("EditableConfig"));

    let snapshots = Controller::new(Api::<ConfigSnapshot>::all(client.clone()), watcher_config())
        .owns_stream(artifact_triggers)
        .with_config(runtime)
        .shutdown_on_signal()
        .run(snapshot::reconcile, snapshot::error_policy, snapshot_ctx)
        .for_each(log_reconcile_result("ConfigSnapshot"));

    vec![Box::pin(editables), Box::pin(snapshots)]
}
