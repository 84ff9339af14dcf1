//! RedisInstance Custom Resource Definition.
//!
//! A single standalone Redis process: one StatefulSet and one Service.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, ResourceRequirementsSpec, StorageSpec, TopologyStatus};

/// RedisInstance deploys one standalone Redis server.
///
/// Example:
/// ```yaml
/// apiVersion: cache.redisoperator.io/v1alpha1
/// kind: RedisInstance
/// metadata:
///   name: sessions
/// spec:
///   storage:
///     size: 2Gi
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cache.redisoperator.io",
    version = "v1alpha1",
    kind = "RedisInstance",
    plural = "redisinstances",
    shortname = "ri",
    status = "TopologyStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisInstanceSpec {
    #[serde(default)]
    pub image: ImageSpec,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default)]
    pub storage: StorageSpec,

    /// Additional labels to apply to all managed resources.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    /// Additional annotations to apply to all managed resources.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}
