//! Storage access for the reconcilers
//!
//! Reconcilers talk to the API server through these traits so they can be
//! exercised against mocks or in-memory doubles. The production
//! implementations read through a watch-fed reflector store and fall back to
//! a live GET on a cache miss, so a freshly created object is never mistaken
//! for a missing one just because the watch has not delivered it yet.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::NamespaceResourceScope;
use kube::api::{Api, PostParams};
use kube::runtime::reflector::{ObjectRef, Store};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

#[cfg(test)]
use mockall::automock;

use crate::crd::ConfigSnapshot;
use crate::{Error, FIELD_MANAGER};

/// Read/write access to ConfigSnapshots
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SnapshotClient: Send + Sync {
    /// Look up a snapshot by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigSnapshot>, Error>;

    /// Create a new snapshot
    async fn create(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error>;

    /// Replace an existing snapshot; carries the observed resourceVersion
    async fn replace(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error>;
}

/// Read/write access to artifact ConfigMaps
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ArtifactClient: Send + Sync {
    /// Look up a ConfigMap by namespace and name
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error>;

    /// Create a new ConfigMap
    async fn create(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error>;

    /// Replace an existing ConfigMap; carries the observed resourceVersion
    async fn replace(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error>;
}

/// Namespaced API access with a read-through cache
pub struct CachedApi<K>
where
    K: Resource<DynamicType = ()> + Clone + 'static,
{
    client: Client,
    cache: Store<K>,
}

impl<K> CachedApi<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + DeserializeOwned
        + Serialize
        + Send
        + Sync
        + 'static,
{
    /// Access that consults `cache` before the API server
    ///
    /// `cache` must be fed by the same stream that triggers reconciliations
    /// for `K`, so that every trigger observes a store at least as new as
    /// the event behind it.
    pub fn new(client: Client, cache: Store<K>) -> Self {
        Self { client, cache }
    }

    fn api(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn fetch(&self, namespace: &str, name: &str) -> Result<Option<K>, Error> {
        if let Some(obj) = self.cache.get(&ObjectRef::new(name).within(namespace)) {
            return Ok(Some((*obj).clone()));
        }
        Ok(self.api(namespace).get_opt(name).await?)
    }

    async fn create_object(&self, obj: &K) -> Result<K, Error> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::malformed_key(format!("{} has no namespace", obj.name_any())))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self.api(&namespace).create(&params, obj).await?)
    }

    async fn replace_object(&self, obj: &K) -> Result<K, Error> {
        let namespace = obj
            .namespace()
            .ok_or_else(|| Error::malformed_key(format!("{} has no namespace", obj.name_any())))?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        Ok(self
            .api(&namespace)
            .replace(&obj.name_any(), &params, obj)
            .await?)
    }
}

#[async_trait]
impl SnapshotClient for CachedApi<ConfigSnapshot> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigSnapshot>, Error> {
        self.fetch(namespace, name).await
    }

    async fn create(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error> {
        self.create_object(snapshot).await
    }

    async fn replace(&self, snapshot: &ConfigSnapshot) -> Result<ConfigSnapshot, Error> {
        self.replace_object(snapshot).await
    }
}

#[async_trait]
impl ArtifactClient for CachedApi<ConfigMap> {
    async fn get(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>, Error> {
        self.fetch(namespace, name).await
    }

    async fn create(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error> {
        self.create_object(artifact).await
    }

    async fn replace(&self, artifact: &ConfigMap) -> Result<ConfigMap, Error> {
        self.replace_object(artifact).await
    }
}
