//! Common resource generation utilities.
//!
//! Provides the parent identity every child is stamped with: labels, owner
//! references, and naming.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;

use crate::crd::{Role, merge_metadata};

/// Name of the parent object.
pub const NAME_LABEL: &str = "app.kubernetes.io/name";
/// Role of the child within its topology.
pub const COMPONENT_LABEL: &str = "app.kubernetes.io/component";
/// Controller writing the child.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
/// Lowercase kind of the parent object.
pub const KIND_LABEL: &str = "cache.redisoperator.io/kind";
/// UID of the parent object. Drives pruning and the deletion sweep.
pub const PARENT_UID_LABEL: &str = "cache.redisoperator.io/parent-uid";

/// Value of the managed-by label.
pub const MANAGER_NAME: &str = "redis-operator";

/// Identity of the topology object that owns a set of children.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParentRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    pub uid: String,
    pub user_labels: BTreeMap<String, String>,
    pub user_annotations: BTreeMap<String, String>,
}

impl ParentRef {
    /// Capture the identity of a topology object along with the labels and
    /// annotations its spec asks to propagate.
    pub fn new<K>(
        resource: &K,
        user_labels: &BTreeMap<String, String>,
        user_annotations: &BTreeMap<String, String>,
    ) -> Self
    where
        K: Resource<DynamicType = ()>,
    {
        Self {
            api_version: K::api_version(&()).to_string(),
            kind: K::kind(&()).to_string(),
            name: resource.name_any(),
            namespace: resource.namespace().unwrap_or_else(|| "default".to_string()),
            uid: resource.uid().unwrap_or_default(),
            user_labels: user_labels.clone(),
            user_annotations: user_annotations.clone(),
        }
    }

    /// Labels selecting the pods of one role.
    pub fn selector_labels(&self, role: Role) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(NAME_LABEL.to_string(), self.name.clone());
        labels.insert(COMPONENT_LABEL.to_string(), role.as_str().to_string());
        labels.insert(KIND_LABEL.to_string(), self.kind.to_lowercase());
        labels
    }

    /// Standard labels applied to every child of one role. User labels are
    /// merged underneath and never override operator labels.
    pub fn labels(&self, role: Role) -> BTreeMap<String, String> {
        let mut labels = self.selector_labels(role);
        labels.insert(MANAGED_BY_LABEL.to_string(), MANAGER_NAME.to_string());
        labels.insert(PARENT_UID_LABEL.to_string(), self.uid.clone());
        merge_metadata(labels, &self.user_labels)
    }

    /// User annotations, or `None` when there are none.
    pub fn annotations(&self) -> Option<BTreeMap<String, String>> {
        if self.user_annotations.is_empty() {
            None
        } else {
            Some(self.user_annotations.clone())
        }
    }

    /// Controller owner reference back to the parent.
    pub fn owner_reference(&self) -> OwnerReference {
        OwnerReference {
            api_version: self.api_version.clone(),
            kind: self.kind.clone(),
            name: self.name.clone(),
            uid: self.uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }
    }

    /// Metadata for a child of one role.
    pub fn child_metadata(&self, name: &str, role: Role) -> ObjectMeta {
        ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(self.namespace.clone()),
            labels: Some(self.labels(role)),
            annotations: self.annotations(),
            owner_references: Some(vec![self.owner_reference()]),
            ..Default::default()
        }
    }

    /// Child name for a role (`<parent>-<role>`).
    pub fn role_name(&self, role: Role) -> String {
        format!("{}-{}", self.name, role)
    }

    /// In-cluster DNS name of a service in the parent's namespace.
    pub fn service_host(&self, service: &str) -> String {
        format!("{}.{}.svc", service, self.namespace)
    }
}
