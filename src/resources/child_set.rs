//! The ordered set of child manifests synthesized for one topology object.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::{ConfigMap, Service};
use kube::core::ApiResource;
use serde::Serialize;
use serde_json::Value;

use crate::resources::common::PARENT_UID_LABEL;

/// Kinds of children the operator writes.
///
/// Declaration order is apply order: configuration first, then addressing,
/// then workloads that mount and use both.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ChildKind {
    ConfigMap,
    Service,
    StatefulSet,
}

impl ChildKind {
    /// All kinds, in apply order.
    pub const ALL: [ChildKind; 3] = [
        ChildKind::ConfigMap,
        ChildKind::Service,
        ChildKind::StatefulSet,
    ];

    pub fn kind(&self) -> &'static str {
        match self {
            ChildKind::ConfigMap => "ConfigMap",
            ChildKind::Service => "Service",
            ChildKind::StatefulSet => "StatefulSet",
        }
    }

    /// Type information for dynamic API access.
    pub fn api_resource(&self) -> ApiResource {
        match self {
            ChildKind::ConfigMap => ApiResource::erase::<ConfigMap>(&()),
            ChildKind::Service => ApiResource::erase::<Service>(&()),
            ChildKind::StatefulSet => ApiResource::erase::<StatefulSet>(&()),
        }
    }

    /// Parse a manifest `kind` field.
    pub fn from_kind(kind: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.kind() == kind)
    }
}

impl std::fmt::Display for ChildKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// Identity of a child object.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChildKey {
    pub kind: ChildKind,
    pub namespace: String,
    pub name: String,
}

impl ChildKey {
    pub fn new(kind: ChildKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a manifest or live object, read from its `kind` and metadata.
    pub fn of(object: &Value) -> Option<Self> {
        let kind = ChildKind::from_kind(object.get("kind")?.as_str()?)?;
        let metadata = object.get("metadata")?;
        Some(Self {
            kind,
            namespace: metadata.get("namespace")?.as_str()?.to_string(),
            name: metadata.get("name")?.as_str()?.to_string(),
        })
    }
}

impl std::fmt::Display for ChildKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// One synthesized child manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct ChildResource {
    pub key: ChildKey,
    pub manifest: Value,
}

/// Desired children of one parent, keyed and ordered by `(kind, name)`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChildResourceSet {
    parent_uid: String,
    children: BTreeMap<ChildKey, ChildResource>,
}

impl ChildResourceSet {
    pub fn new(parent_uid: impl Into<String>) -> Self {
        Self {
            parent_uid: parent_uid.into(),
            children: BTreeMap::new(),
        }
    }

    /// UID of the owning parent; stamped on every child as a label.
    pub fn parent_uid(&self) -> &str {
        &self.parent_uid
    }

    /// Serialize a typed manifest and add it. A child with the same key is
    /// replaced.
    pub fn insert<K: Serialize>(
        &mut self,
        kind: ChildKind,
        object: &K,
    ) -> Result<(), serde_json::Error> {
        let manifest = serde_json::to_value(object)?;
        let key = ChildKey::of(&manifest).ok_or_else(|| {
            <serde_json::Error as serde::de::Error>::custom(format!(
                "{kind} manifest is missing its name or namespace"
            ))
        })?;
        self.children.insert(key.clone(), ChildResource { key, manifest });
        Ok(())
    }

    pub fn get(&self, key: &ChildKey) -> Option<&ChildResource> {
        self.children.get(key)
    }

    pub fn contains(&self, key: &ChildKey) -> bool {
        self.children.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChildResource> {
        self.children.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ChildKey> {
        self.children.keys()
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether a live object belongs to this set's parent.
    pub fn owns(&self, object: &Value) -> bool {
        object
            .pointer("/metadata/labels")
            .and_then(|labels| labels.get(PARENT_UID_LABEL))
            .and_then(Value::as_str)
            .is_some_and(|uid| !self.parent_uid.is_empty() && uid == self.parent_uid)
    }
}
