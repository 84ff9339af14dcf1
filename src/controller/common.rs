//! Shared controller helpers: the finalizer and the deletion sweep.

use kube::{Api, Resource, ResourceExt, api::PatchParams};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::apply::ChildStore;
use crate::controller::context::FIELD_MANAGER;
use crate::controller::error::Error;
use crate::resources::{ChildKey, ChildKind};

/// Finalizer guarding the deletion sweep
pub const FINALIZER: &str = "cache.redisoperator.io/finalizer";

/// Add a finalizer to a resource.
pub async fn add_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = api.get(name).await?;
    let mut finalizers = resource.finalizers().to_vec();

    // Only add if not already present
    if !finalizers.iter().any(|f| f == finalizer) {
        finalizers.push(finalizer.to_string());

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &field_manager(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

/// Remove a specific finalizer from a resource.
pub async fn remove_finalizer<T>(api: &Api<T>, name: &str, finalizer: &str) -> Result<(), Error>
where
    T: Resource + Clone + DeserializeOwned + std::fmt::Debug,
    <T as Resource>::DynamicType: Default,
{
    let resource = match api.get(name).await {
        Ok(r) => r,
        Err(kube::Error::Api(e)) if e.code == 404 => {
            // Resource already deleted, nothing to do
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let mut finalizers = resource.finalizers().to_vec();

    // Only patch if the finalizer exists
    if let Some(pos) = finalizers.iter().position(|f| f == finalizer) {
        finalizers.remove(pos);

        let patch = serde_json::json!({
            "metadata": {
                "finalizers": finalizers
            }
        });
        api.patch(
            name,
            &field_manager(),
            &kube::api::Patch::Merge(&patch),
        )
        .await?;
    }
    Ok(())
}

fn field_manager() -> PatchParams {
    PatchParams {
        field_manager: Some(FIELD_MANAGER.to_string()),
        ..Default::default()
    }
}

/// Delete every child labelled with `parent_uid`, workloads first.
///
/// Returns the number of deleted children.
pub async fn sweep_children<S>(store: &S, namespace: &str, parent_uid: &str) -> Result<usize, Error>
where
    S: ChildStore + ?Sized,
{
    if parent_uid.is_empty() {
        return Ok(0);
    }

    let mut deleted = 0;
    for kind in ChildKind::ALL.into_iter().rev() {
        for object in store.list_owned(namespace, kind, parent_uid).await? {
            let Some(key) = ChildKey::of(&object) else {
                continue;
            };
            debug!(child = %key, "Sweeping child");
            store.delete(&key).await?;
            deleted += 1;
        }
    }
    info!(namespace = %namespace, parent_uid = %parent_uid, deleted, "Swept children");
    Ok(deleted)
}
