//! In-memory cluster double
//!
//! Behaves like the parts of the API server the pipeline depends on:
//! uids and resourceVersions are assigned on write, replaces are checked
//! against the stored resourceVersion, generation is bumped when an
//! EditableConfig's spec changes, and snapshot updates pass through the real
//! immutability guard when it is enabled.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::{Resource, ResourceExt};
use serde_json::json;

use configpin::controller::{ArtifactClient, SnapshotClient};
use configpin::crd::{ConfigSnapshot, EditableConfig, EditableConfigSpec};
use configpin::webhook::immutable::check_update;
use configpin::webhook::EditableConfigLookup;
use configpin::Error;

type Key = (String, String);

fn key_of<K: Resource>(obj: &K) -> Result<Key, Error> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| Error::malformed_key("object has no namespace"))?;
    Ok((namespace, obj.name_any()))
}

/// A namespaced object table with API-server-like write semantics
struct Table<K> {
    objects: Mutex<BTreeMap<Key, K>>,
}

impl<K> Default for Table<K> {
    fn default() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
        }
    }
}

impl<K: Resource + Clone> Table<K> {
    fn get(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned()
    }

    fn create(&self, obj: &K, uid: u64) -> Result<K, Error> {
        let key = key_of(obj)?;
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Err(Error::conflict(format!("{} already exists", key.1)));
        }
        let mut stored = obj.clone();
        stored.meta_mut().uid = Some(format!("uid-{uid}"));
        stored.meta_mut().resource_version = Some("1".to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn replace(&self, obj: &K) -> Result<K, Error> {
        let key = key_of(obj)?;
        let mut objects = self.objects.lock().unwrap();
        let current = objects
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("{} not found", key.1)))?;
        let current_rv = current.resource_version().unwrap_or_default();
        if obj.resource_version().as_deref() != Some(current_rv.as_str()) {
            return Err(Error::conflict(format!(
                "the object {} has been modified",
                key.1
            )));
        }
        let next_rv = current_rv.parse::<u64>().unwrap_or(0) + 1;
        let mut stored = obj.clone();
        stored.meta_mut().uid = current.meta().uid.clone();
        stored.meta_mut().resource_version = Some(next_rv.to_string());
        objects.insert(key, stored.clone());
        Ok(stored)
    }

    fn all(&self) -> Vec<K> {
        self.objects.lock().unwrap().values().cloned().collect()
    }
}

/// The cluster double
#[derive(Default)]
pub struct FakeCluster {
    editables: Table<EditableConfig>,
    snapshots: Table<ConfigSnapshot>,
    artifacts: Table<ConfigMap>,
    next_uid: AtomicU64,
    writes: AtomicUsize,
    guard_enabled: AtomicBool,
}

impl FakeCluster {
    /// A cluster with the snapshot immutability guard installed
    pub fn with_guard() -> Arc<Self> {
        let cluster = Self::default();
        cluster.guard_enabled.store(true, Ordering::SeqCst);
        Arc::new(cluster)
    }

    fn uid(&self) -> u64 {
        self.next_uid.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Writes performed by the controllers (snapshots and ConfigMaps)
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Create or edit an EditableConfig the way `kubectl apply` would;
    /// generation is bumped only when the spec changes
    pub fn apply_editable(
        &self,
        namespace: &str,
        name: &str,
        data: &[(&str, &str)],
    ) -> Arc<EditableConfig> {
        let spec = EditableConfigSpec(
            data.iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        let stored = match self.editables.get(namespace, name) {
            Some(mut existing) => {
                if existing.spec != spec {
                    existing.spec = spec;
                    existing.metadata.generation = Some(existing.current_generation() + 1);
                }
                self.editables.replace(&existing).unwrap()
            }
            None => {
                let mut e = EditableConfig::new(name, spec);
                e.metadata.namespace = Some(namespace.to_string());
                e.metadata.generation = Some(1);
                self.editables.create(&e, self.uid()).unwrap()
            }
        };
        Arc::new(stored)
    }

    /// All EditableConfigs
    pub fn editables(&self) -> Vec<Arc<EditableConfig>> {
        self.editables.all().into_iter().map(Arc::new).collect()
    }

    /// All ConfigSnapshots
    pub fn snapshots(&self) -> Vec<Arc<ConfigSnapshot>> {
        self.snapshots.all().into_iter().map(Arc::new).collect()
    }

    /// A stored snapshot
    pub fn snapshot(&self, namespace: &str, name: &str) -> Option<ConfigSnapshot> {
        self.snapshots.get(namespace, name)
    }

    /// A stored ConfigMap
    pub fn artifact(&self, namespace: &str, name: &str) -> Option<ConfigMap> {
        self.artifacts.get(namespace, name)
    }

    /// Overwrite a stored snapshot directly, bypassing admission
    pub fn tamper_snapshot(&self, namespace: &str, name: &str, data: &[(&str, &str)]) {
        let mut snapshot = self.snapshots.get(namespace, name).unwrap();
        snapshot.spec.0 = data
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.snapshots.replace(&snapshot).unwrap();
    }

    /// Edit a stored ConfigMap directly, as a user with kubectl would
    pub fn tamper_artifact(&self, namespace: &str, name: &str, key: &str, value: &str) {
        let mut artifact = self.artifacts.get(namespace, name).unwrap();
        artifact
            .data
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self.artifacts.replace(&artifact).unwrap();
    }

    /// Run a snapshot update through the immutability guard
    pub fn admit_snapshot_update(&self, old: &ConfigSnapshot, new: &ConfigSnapshot) -> Result<(), Error> {
        let review: AdmissionReview<DynamicObject> = serde_json::from_value(json!({
            "apiVersion": "admission.k8s.io/v1",
            "kind": "AdmissionReview",
            "request": {
                "uid": "guard",
                "kind": {"group": "configpin.dev", "version": "v1alpha1", "kind": "ConfigSnapshot"},
                "resource": {"group": "configpin.dev", "version": "v1alpha1", "resource": "configsnapshots"},
                "name": new.name_any(),
                "namespace": new.namespace(),
                "operation": "UPDATE",
                "userInfo": {},
                "object": serde_json::to_value(new)?,
                "oldObject": serde_json::to_value(old)?
            }
        }))?;
        let request: AdmissionRequest<DynamicObject> = review
            .try_into()
            .map_err(|e| Error::serialization(format!("{e}")))?;
        let response = check_update(&request);
        if response.allowed {
            Ok(())
        } else {
            // The API server reports webhook denials as 400 Bad Request
            Err(Error::validation(format!(
                "admission webhook \"snapshot-guard.configpin.dev\" denied the request: {}",
                response.result.message
            )))
        }
    }
}

#[async_trait]
impl SnapshotClient for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigSnapshot>, Error> {
        Ok(self.snapshots.get(namespace, name))
    }

    async fn create(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error> {
        let created = self.snapshots.create(snapshot, self.uid())?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error> {
        if self.guard_enabled.load(Ordering::SeqCst) {
            let (namespace, name) = key_of(snapshot)?;
            if let Some(old) = self.snapshots.get(&namespace, &name) {
                self.admit_snapshot_update(&old, snapshot)?;
            }
        }
        let replaced = self.snapshots.replace(snapshot)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(replaced)
    }
}

#[async_trait]
impl ArtifactClient for FakeCluster {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        Ok(self.artifacts.get(namespace, name))
    }

    async fn create(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error> {
        let created = self.artifacts.create(artifact, self.uid())?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(created)
    }

    async fn replace(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error> {
        let replaced = self.artifacts.replace(artifact)?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(replaced)
    }
}

impl EditableConfigLookup for FakeCluster {
    fn get(&self, namespace: &str, name: &str) -> Option<Arc<EditableConfig>> {
        self.editables.get(namespace, name).map(Arc::new)
    }
}
