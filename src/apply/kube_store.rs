//! Child store backed by the Kubernetes API.

use async_trait::async_trait;
use kube::Client;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::core::DynamicObject;
use serde_json::Value;

use crate::apply::store::{ChildStore, StoreError};
use crate::controller::context::FIELD_MANAGER;
use crate::resources::{ChildKey, ChildKind, PARENT_UID_LABEL};

/// Store writing through dynamic APIs, one per child kind.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, kind: ChildKind, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource())
    }
}

fn to_value(object: &DynamicObject) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(object)?)
}

/// Map API status codes onto store outcomes.
fn map_error(key: &ChildKey, error: kube::Error) -> StoreError {
    match &error {
        kube::Error::Api(response) if response.code == 409 && response.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key.clone())
        }
        kube::Error::Api(response) if response.code == 409 => StoreError::Conflict(key.clone()),
        kube::Error::Api(response) if response.code == 404 => StoreError::NotFound(key.clone()),
        _ => StoreError::Kube(error),
    }
}

#[async_trait]
impl ChildStore for KubeStore {
    async fn get(&self, key: &ChildKey) -> Result<Option<Value>, StoreError> {
        let object = self
            .api(key.kind, &key.namespace)
            .get_opt(&key.name)
            .await
            .map_err(|e| map_error(key, e))?;
        object.as_ref().map(to_value).transpose()
    }

    async fn create(&self, key: &ChildKey, manifest: &Value) -> Result<Value, StoreError> {
        let object: DynamicObject = serde_json::from_value(manifest.clone())?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let created = self
            .api(key.kind, &key.namespace)
            .create(&params, &object)
            .await
            .map_err(|e| map_error(key, e))?;
        to_value(&created)
    }

    async fn patch(
        &self,
        key: &ChildKey,
        patch: &Value,
        resource_version: &str,
    ) -> Result<Value, StoreError> {
        // A resourceVersion in a merge patch is an optimistic-lock precondition
        let mut patch = patch.clone();
        if let Some(map) = patch.as_object_mut() {
            let metadata = map
                .entry("metadata")
                .or_insert_with(|| Value::Object(Default::default()));
            if let Some(meta) = metadata.as_object_mut() {
                meta.insert(
                    "resourceVersion".to_string(),
                    Value::String(resource_version.to_string()),
                );
            }
        }

        let params = PatchParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        let patched = self
            .api(key.kind, &key.namespace)
            .patch(&key.name, &params, &Patch::Merge(&patch))
            .await
            .map_err(|e| map_error(key, e))?;
        to_value(&patched)
    }

    async fn list_owned(
        &self,
        namespace: &str,
        kind: ChildKind,
        parent_uid: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let params = ListParams::default().labels(&format!("{PARENT_UID_LABEL}={parent_uid}"));
        let list = self.api(kind, namespace).list(&params).await?;
        list.items
            .iter()
            .map(|object| {
                // Dynamic list items may omit type metadata
                let mut value = to_value(object)?;
                if let Some(map) = value.as_object_mut() {
                    map.insert("kind".to_string(), Value::String(kind.kind().to_string()));
                    map.entry("apiVersion").or_insert_with(|| {
                        Value::String(kind.api_resource().api_version)
                    });
                }
                Ok(value)
            })
            .collect()
    }

    async fn delete(&self, key: &ChildKey) -> Result<(), StoreError> {
        match self
            .api(key.kind, &key.namespace)
            .delete(&key.name, &DeleteParams::background())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(StoreError::Kube(e)),
        }
    }
}
