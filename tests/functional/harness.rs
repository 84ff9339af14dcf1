//! Test harness: a topology object, its store, and pass-by-pass status
//! persistence.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use kube::Resource;

use redis_operator::apply::{ChildStore, MemoryStore, StoreError};
use redis_operator::controller::Result;
use redis_operator::controller::TopologyKind;
use redis_operator::controller::pass::{PassReport, run_pass};
use redis_operator::crd::{TopologyPhase, TopologyStatus};
use redis_operator::resources::{ChildKey, ChildKind};
use serde_json::Value;
use redis_operator::sentinel::{MasterReplicaSnapshot, TopologyLookup};
use redis_operator::signals::SignalCache;

pub const NAMESPACE: &str = "default";
pub const DEADLINE: Duration = Duration::from_secs(5);

/// Lookup backed by a mutable map of RedisMasterReplica snapshots.
#[derive(Default)]
pub struct StaticLookup {
    objects: Mutex<HashMap<(String, String), MasterReplicaSnapshot>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: &str, phase: TopologyPhase, master_service: Option<&str>) {
        self.objects.lock().unwrap().insert(
            (NAMESPACE.to_string(), name.to_string()),
            MasterReplicaSnapshot {
                phase,
                master_service: master_service.map(str::to_string),
            },
        );
    }
}

#[async_trait]
impl TopologyLookup for StaticLookup {
    async fn master_replica(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MasterReplicaSnapshot>> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }
}

/// A store that cannot serve a pass.
pub enum BrokenStore {
    /// Every request is refused outright.
    Rejecting,
    /// Every request hangs.
    Stalled,
}

impl BrokenStore {
    async fn fail<T>(&self) -> std::result::Result<T, StoreError> {
        match self {
            BrokenStore::Rejecting => Err(StoreError::Rejected("forbidden".to_string())),
            BrokenStore::Stalled => std::future::pending().await,
        }
    }
}

#[async_trait]
impl ChildStore for BrokenStore {
    async fn get(&self, _key: &ChildKey) -> std::result::Result<Option<Value>, StoreError> {
        self.fail().await
    }

    async fn create(&self, _key: &ChildKey, _manifest: &Value) -> std::result::Result<Value, StoreError> {
        self.fail().await
    }

    async fn patch(
        &self,
        _key: &ChildKey,
        _patch: &Value,
        _resource_version: &str,
    ) -> std::result::Result<Value, StoreError> {
        self.fail().await
    }

    async fn list_owned(
        &self,
        _namespace: &str,
        _kind: ChildKind,
        _parent_uid: &str,
    ) -> std::result::Result<Vec<Value>, StoreError> {
        self.fail().await
    }

    async fn delete(&self, _key: &ChildKey) -> std::result::Result<(), StoreError> {
        self.fail().await
    }
}

/// Stamp the identity the API server would assign.
pub fn persisted<K: Resource>(mut obj: K, uid: &str) -> K {
    obj.meta_mut().namespace = Some(NAMESPACE.to_string());
    obj.meta_mut().uid = Some(uid.to_string());
    obj.meta_mut().generation = Some(1);
    obj
}

/// Bump the generation after a spec edit.
pub fn bump_generation<K: Resource>(obj: &mut K) {
    let generation = obj.meta().generation.unwrap_or(0) + 1;
    obj.meta_mut().generation = Some(generation);
}

/// A topology object together with the world it reconciles against.
pub struct Harness<K: TopologyKind> {
    pub obj: K,
    pub store: MemoryStore,
    pub lookup: StaticLookup,
    pub signals: SignalCache,
}

impl<K> Harness<K>
where
    K: TopologyKind,
    K: HasStatus,
{
    pub fn new(obj: K) -> Self {
        Self {
            obj,
            store: MemoryStore::new(),
            lookup: StaticLookup::new(),
            signals: SignalCache::new(),
        }
    }

    /// Run one pass and persist its status on the object.
    pub async fn pass(&mut self) -> PassReport {
        let report = run_pass(&self.obj, &self.store, &self.lookup, &self.signals, DEADLINE).await;
        self.obj.set_status(report.status.clone());
        report
    }

    /// Run one pass against another store, persisting status the same way.
    pub async fn pass_with(&mut self, store: &dyn ChildStore) -> PassReport {
        let report = run_pass(&self.obj, store, &self.lookup, &self.signals, DEADLINE).await;
        self.obj.set_status(report.status.clone());
        report
    }

    pub fn status(&self) -> &TopologyStatus {
        TopologyKind::status(&self.obj).unwrap()
    }

    pub fn phase(&self) -> TopologyPhase {
        self.status().phase
    }

    pub fn replicas_of(&self, name: &str) -> i64 {
        self.store
            .object(&ChildKey::new(ChildKind::StatefulSet, NAMESPACE, name))
            .and_then(|o| o.pointer("/spec/replicas").and_then(|r| r.as_i64()))
            .unwrap()
    }
}

/// Status write-back, as the API server does on `patch_status`.
pub trait HasStatus {
    fn set_status(&mut self, status: TopologyStatus);
}

macro_rules! has_status {
    ($($kind:ty),*) => {
        $(impl HasStatus for $kind {
            fn set_status(&mut self, status: TopologyStatus) {
                self.status = Some(status);
            }
        })*
    };
}

has_status!(
    redis_operator::crd::RedisInstance,
    redis_operator::crd::RedisMasterReplica,
    redis_operator::crd::RedisSentinel,
    redis_operator::crd::RedisCluster
);
