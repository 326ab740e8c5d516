//! The db-config story
//!
//! A team keeps its database settings in an EditableConfig. Every edit is
//! captured as a new snapshot and ConfigMap, and workloads created between
//! edits stay pinned to the generation that was current when they were
//! admitted.

use std::collections::BTreeMap;
use std::sync::Arc;

use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use serde_json::{json, Value};

use configpin::controller::{editable, snapshot, EditableContext, SnapshotContext};
use configpin::retry::RetryConfig;
use configpin::webhook::freeze::freeze_request;
use configpin::webhook::kinds::WorkloadKinds;
use configpin::webhook::WebhookState;

use super::cluster::FakeCluster;

// =============================================================================
// Test Fixtures
// =============================================================================

struct Pipeline {
    cluster: Arc<FakeCluster>,
    editable_ctx: Arc<EditableContext>,
    snapshot_ctx: Arc<SnapshotContext>,
    webhook: WebhookState,
}

impl Pipeline {
    fn new() -> Self {
        let cluster = FakeCluster::with_guard();
        Self {
            editable_ctx: Arc::new(EditableContext::new(
                cluster.clone(),
                RetryConfig::default(),
            )),
            snapshot_ctx: Arc::new(SnapshotContext::new(
                cluster.clone(),
                RetryConfig::default(),
            )),
            webhook: WebhookState::new(cluster.clone(), WorkloadKinds::builtin()),
            cluster,
        }
    }

    /// Run both controllers over every object, in pipeline order
    async fn converge(&self) {
        for e in self.cluster.editables() {
            editable::reconcile(e, self.editable_ctx.clone())
                .await
                .unwrap();
        }
        for s in self.cluster.snapshots() {
            snapshot::reconcile(s, self.snapshot_ctx.clone())
                .await
                .unwrap();
        }
    }

    /// Admit a Deployment and return the object as it would be persisted
    fn admit_deployment(&self, name: &str, config_name: &str) -> Value {
        let object = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": name, "namespace": "payments"},
            "spec": {
                "selector": {"matchLabels": {"app": name}},
                "template": {
                    "metadata": {"labels": {"app": name}},
                    "spec": {
                        "containers": [{
                            "name": "app",
                            "image": "payments:v1",
                            "env": [{"name": "DB_URL", "valueFrom": {
                                "configMapKeyRef": {"name": config_name, "key": "url"}
                            }}]
                        }],
                        "volumes": [{"name": "db", "configMap": {"name": config_name}}]
                    }
                }
            }
        });
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": format!("admit-{name}"),
                "kind": {"group": "apps", "version": "v1", "kind": "Deployment"},
                "resource": {"group": "apps", "version": "v1", "resource": "deployments"},
                "name": name,
                "namespace": "payments",
                "operation": "CREATE",
                "userInfo": {"username": "ci"},
                "object": object
            }
        }))
        .unwrap();
        let request: AdmissionRequest<DynamicObject> = review.try_into().unwrap();

        let response = freeze_request(&self.webhook, &request);
        assert!(response.allowed, "{}", response.result.message);

        let mut persisted = object;
        if let Some(bytes) = &response.patch {
            let patch: json_patch::Patch = serde_json::from_slice(bytes).unwrap();
            json_patch::patch(&mut persisted, &patch.0).unwrap();
        }
        persisted
    }
}

fn data(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn volume_ref(deployment: &Value) -> &str {
    deployment["spec"]["template"]["spec"]["volumes"][0]["configMap"]["name"]
        .as_str()
        .unwrap()
}

fn env_ref(deployment: &Value) -> &str {
    deployment["spec"]["template"]["spec"]["containers"][0]["env"][0]["valueFrom"]
        ["configMapKeyRef"]["name"]
        .as_str()
        .unwrap()
}

// =============================================================================
// Story Tests
// =============================================================================

/// Story: an edit mints a new generation while earlier workloads stay pinned
#[tokio::test]
async fn story_edits_never_reach_running_workloads() {
    let pipeline = Pipeline::new();
    let cluster = &pipeline.cluster;

    // The team creates db-config and the controllers snapshot it
    cluster.apply_editable("payments", "db-config", &[("url", "a")]);
    pipeline.converge().await;

    let first = cluster.snapshot("payments", "db-config-00001").unwrap();
    assert_eq!(first.spec.0, data(&[("url", "a")]));
    let first_cm = cluster.artifact("payments", "db-config-00001").unwrap();
    assert_eq!(first_cm.data, Some(data(&[("url", "a")])));

    // A workload admitted now is pinned to generation 1
    let before_edit = pipeline.admit_deployment("api", "db-config");
    assert_eq!(volume_ref(&before_edit), "db-config-00001");
    assert_eq!(env_ref(&before_edit), "db-config-00001");

    // The team edits the config; generation becomes 2
    let edited = cluster.apply_editable("payments", "db-config", &[("url", "b")]);
    assert_eq!(edited.current_generation(), 2);
    pipeline.converge().await;

    let second = cluster.snapshot("payments", "db-config-00002").unwrap();
    assert_eq!(second.spec.0, data(&[("url", "b")]));
    let second_cm = cluster.artifact("payments", "db-config-00002").unwrap();
    assert_eq!(second_cm.data, Some(data(&[("url", "b")])));

    // Generation 1 is untouched and the earlier workload still points at it
    assert_eq!(
        cluster.snapshot("payments", "db-config-00001").unwrap().spec.0,
        data(&[("url", "a")])
    );
    assert_eq!(
        cluster.artifact("payments", "db-config-00001").unwrap().data,
        Some(data(&[("url", "a")]))
    );
    assert_eq!(volume_ref(&before_edit), "db-config-00001");

    // New workloads pick up generation 2
    let after_edit = pipeline.admit_deployment("worker", "db-config");
    assert_eq!(volume_ref(&after_edit), "db-config-00002");
    assert_eq!(env_ref(&after_edit), "db-config-00002");
}

/// Story: once converged, further passes write nothing
#[tokio::test]
async fn story_converged_pipeline_is_quiet() {
    let pipeline = Pipeline::new();
    pipeline
        .cluster
        .apply_editable("payments", "db-config", &[("url", "a"), ("pool", "10")]);

    pipeline.converge().await;
    let writes = pipeline.cluster.writes();
    assert_eq!(writes, 2, "one snapshot and one ConfigMap");

    pipeline.converge().await;
    pipeline.converge().await;
    assert_eq!(pipeline.cluster.writes(), writes);
}

/// Story: re-applying identical content does not mint a new snapshot
#[tokio::test]
async fn story_noop_apply_keeps_generation() {
    let pipeline = Pipeline::new();
    pipeline
        .cluster
        .apply_editable("payments", "db-config", &[("url", "a")]);
    pipeline.converge().await;

    let again = pipeline
        .cluster
        .apply_editable("payments", "db-config", &[("url", "a")]);
    assert_eq!(again.current_generation(), 1);
    pipeline.converge().await;

    assert!(pipeline
        .cluster
        .snapshot("payments", "db-config-00002")
        .is_none());
}

/// Story: ConfigMaps nobody manages are referenced as-is
#[tokio::test]
async fn story_unmanaged_configmap_is_not_frozen() {
    let pipeline = Pipeline::new();
    let deployment = pipeline.admit_deployment("legacy", "hand-made-config");
    assert_eq!(volume_ref(&deployment), "hand-made-config");
    assert_eq!(env_ref(&deployment), "hand-made-config");
}

/// Story: hand edits to a snapshot's ConfigMap are reverted
#[tokio::test]
async fn story_configmap_drift_is_reverted() {
    let pipeline = Pipeline::new();
    pipeline
        .cluster
        .apply_editable("payments", "db-config", &[("url", "a")]);
    pipeline.converge().await;

    pipeline
        .cluster
        .tamper_artifact("payments", "db-config-00001", "url", "hacked");
    pipeline.converge().await;

    assert_eq!(
        pipeline
            .cluster
            .artifact("payments", "db-config-00001")
            .unwrap()
            .data,
        Some(data(&[("url", "a")]))
    );
}
