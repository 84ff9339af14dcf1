//! The storage seam between the apply engine and the platform API.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::resources::{ChildKey, ChildKind};

/// Errors from a child store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The write's resourceVersion precondition did not hold
    #[error("Conflict writing {0}")]
    Conflict(ChildKey),

    /// The object does not exist
    #[error("{0} not found")]
    NotFound(ChildKey),

    /// Create raced with another writer
    #[error("{0} already exists")]
    AlreadyExists(ChildKey),

    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store refused the request outright
    #[error("Rejected: {0}")]
    Rejected(String),
}

/// Read and write access to child objects.
///
/// Objects travel as JSON so the same engine drives the live API and the
/// in-memory store used by tests.
#[async_trait]
pub trait ChildStore: Send + Sync {
    /// Fetch one object, `None` if it does not exist.
    async fn get(&self, key: &ChildKey) -> Result<Option<Value>, StoreError>;

    /// Create an object. Fails with [`StoreError::AlreadyExists`] if taken.
    async fn create(&self, key: &ChildKey, manifest: &Value) -> Result<Value, StoreError>;

    /// Merge-patch an object, provided it is still at `resource_version`.
    async fn patch(
        &self,
        key: &ChildKey,
        patch: &Value,
        resource_version: &str,
    ) -> Result<Value, StoreError>;

    /// Objects of a kind carrying a parent-uid label.
    async fn list_owned(
        &self,
        namespace: &str,
        kind: ChildKind,
        parent_uid: &str,
    ) -> Result<Vec<Value>, StoreError>;

    /// Delete an object. Deleting a missing object is not an error.
    async fn delete(&self, key: &ChildKey) -> Result<(), StoreError>;

    /// Every owned child of every kind.
    async fn list_all_owned(
        &self,
        namespace: &str,
        parent_uid: &str,
    ) -> Result<Vec<Value>, StoreError> {
        let mut objects = Vec::new();
        for kind in ChildKind::ALL {
            objects.extend(self.list_owned(namespace, kind, parent_uid).await?);
        }
        Ok(objects)
    }
}

/// `metadata.resourceVersion` of a live object.
pub fn resource_version(object: &Value) -> Option<&str> {
    object
        .pointer("/metadata/resourceVersion")
        .and_then(Value::as_str)
}
