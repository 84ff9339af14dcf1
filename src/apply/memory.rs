//! In-process child store with the same optimistic versioning as the API
//! server. Backs the functional tests; no cluster needed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::apply::diff::apply_merge_patch;
use crate::apply::store::{ChildStore, StoreError, resource_version};
use crate::resources::{ChildKey, ChildKind, PARENT_UID_LABEL};

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<ChildKey, Value>,
    version: u64,
    writes: u64,
    /// Pending simulated concurrent writes per key.
    conflicts: HashMap<ChildKey, u32>,
}

impl MemoryState {
    fn bump(&mut self, object: &mut Value) {
        self.version += 1;
        self.writes += 1;
        if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert(
                "resourceVersion".to_string(),
                Value::String(self.version.to_string()),
            );
        }
    }
}

/// Thread-safe in-memory store.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Rejected("memory store lock poisoned".to_string()))
    }

    /// Make the next `count` patches of `key` lose to a simulated concurrent
    /// writer.
    pub fn inject_conflicts(&self, key: &ChildKey, count: u32) {
        if let Ok(mut state) = self.state.lock() {
            state.conflicts.insert(key.clone(), count);
        }
    }

    /// Set `status.readyReplicas` the way the StatefulSet controller would.
    /// Status updates are not counted as writes.
    pub fn set_ready_replicas(&self, key: &ChildKey, ready: i32) {
        if let Ok(mut state) = self.state.lock()
            && let Some(object) = state.objects.get_mut(key)
            && let Some(map) = object.as_object_mut()
        {
            map.insert("status".to_string(), json!({ "readyReplicas": ready }));
        }
    }

    /// Mark every StatefulSet fully ready.
    pub fn mark_all_ready(&self) {
        if let Ok(mut state) = self.state.lock() {
            for (key, object) in state.objects.iter_mut() {
                if key.kind != ChildKind::StatefulSet {
                    continue;
                }
                let replicas = object
                    .pointer("/spec/replicas")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                if let Some(map) = object.as_object_mut() {
                    map.insert("status".to_string(), json!({ "readyReplicas": replicas }));
                }
            }
        }
    }

    /// Merge-patch an object as another client would, bypassing versioning.
    pub fn external_patch(&self, key: &ChildKey, patch: &Value) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return false;
        };
        let Some(mut object) = state.objects.get(key).cloned() else {
            return false;
        };
        apply_merge_patch(&mut object, patch);
        state.bump(&mut object);
        state.objects.insert(key.clone(), object);
        true
    }

    /// Successful writes so far (creates, patches, deletes).
    pub fn write_count(&self) -> u64 {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    /// Snapshot of one object.
    pub fn object(&self, key: &ChildKey) -> Option<Value> {
        self.state.lock().ok()?.objects.get(key).cloned()
    }

    /// Keys of every stored object.
    pub fn keys(&self) -> Vec<ChildKey> {
        self.state
            .lock()
            .map(|s| s.objects.keys().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChildStore for MemoryStore {
    async fn get(&self, key: &ChildKey) -> Result<Option<Value>, StoreError> {
        // Let concurrent callers interleave between read and write
        tokio::task::yield_now().await;
        Ok(self.lock()?.objects.get(key).cloned())
    }

    async fn create(&self, key: &ChildKey, manifest: &Value) -> Result<Value, StoreError> {
        let mut state = self.lock()?;
        if state.objects.contains_key(key) {
            return Err(StoreError::AlreadyExists(key.clone()));
        }
        let mut object = manifest.clone();
        let uid = format!("mem-{}", state.version + 1);
        if let Some(meta) = object.get_mut("metadata").and_then(Value::as_object_mut) {
            meta.insert("uid".to_string(), Value::String(uid));
        }
        state.bump(&mut object);
        state.objects.insert(key.clone(), object.clone());
        Ok(object)
    }

    async fn patch(
        &self,
        key: &ChildKey,
        patch: &Value,
        expected_version: &str,
    ) -> Result<Value, StoreError> {
        let mut state = self.lock()?;
        let Some(mut object) = state.objects.get(key).cloned() else {
            return Err(StoreError::NotFound(key.clone()));
        };

        if let Some(pending) = state.conflicts.get_mut(key)
            && *pending > 0
        {
            *pending -= 1;
            // Someone else wrote first: the stored version moves on
            state.bump(&mut object);
            state.objects.insert(key.clone(), object);
            return Err(StoreError::Conflict(key.clone()));
        }

        if resource_version(&object) != Some(expected_version) {
            return Err(StoreError::Conflict(key.clone()));
        }

        apply_merge_patch(&mut object, patch);
        state.bump(&mut object);
        state.objects.insert(key.clone(), object.clone());
        Ok(object)
    }

    async fn list_owned(
        &self,
        namespace: &str,
        kind: ChildKind,
        parent_uid: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let state = self.lock()?;
        Ok(state
            .objects
            .iter()
            .filter(|(key, _)| key.kind == kind && key.namespace == namespace)
            .filter(|(_, object)| {
                object
                    .pointer("/metadata/labels")
                    .and_then(|labels| labels.get(PARENT_UID_LABEL))
                    .and_then(Value::as_str)
                    == Some(parent_uid)
            })
            .map(|(_, object)| object.clone())
            .collect())
    }

    async fn delete(&self, key: &ChildKey) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        if state.objects.remove(key).is_some() {
            state.writes += 1;
        }
        Ok(())
    }
}
