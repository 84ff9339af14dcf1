//! RedisCluster Custom Resource Definition.
//!
//! Sharded Redis Cluster: `masters` shards, each with `replicasPerMaster`
//! replicas, sharing the 16384 hash slots.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, ResourceRequirementsSpec, StorageSpec, TopologyStatus};

/// RedisCluster deploys a sharded Redis Cluster.
///
/// Example:
/// ```yaml
/// apiVersion: cache.redisoperator.io/v1alpha1
/// kind: RedisCluster
/// metadata:
///   name: catalog
/// spec:
///   masters: 3
///   replicasPerMaster: 1
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cache.redisoperator.io",
    version = "v1alpha1",
    kind = "RedisCluster",
    plural = "redisclusters",
    shortname = "rc",
    status = "TopologyStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Masters", "type":"integer", "jsonPath":".spec.masters"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replicasPerMaster"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisClusterSpec {
    /// Number of master nodes (minimum 1, default 3).
    /// Each master owns a contiguous share of the 16384 hash slots.
    #[serde(default = "default_masters")]
    pub masters: i32,

    /// Number of replicas per master (default 1).
    #[serde(default = "default_replicas_per_master")]
    pub replicas_per_master: i32,

    #[serde(default)]
    pub image: ImageSpec,

    #[serde(default)]
    pub storage: StorageSpec,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default)]
    pub config: ClusterConfigSpec,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for RedisClusterSpec {
    fn default() -> Self {
        Self {
            masters: default_masters(),
            replicas_per_master: default_replicas_per_master(),
            image: ImageSpec::default(),
            storage: StorageSpec::default(),
            resources: ResourceRequirementsSpec::default(),
            config: ClusterConfigSpec::default(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_masters() -> i32 {
    3
}

fn default_replicas_per_master() -> i32 {
    1
}

/// Cluster-mode settings rendered into `redis.conf`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterConfigSpec {
    /// `cluster-node-timeout` in milliseconds (default: 15000).
    #[serde(default = "default_node_timeout_ms")]
    pub cluster_node_timeout_ms: i64,

    /// `cluster-require-full-coverage` (default: true).
    #[serde(default = "default_require_full_coverage")]
    pub cluster_require_full_coverage: bool,

    /// `cluster-migration-barrier` (default: 1).
    #[serde(default = "default_migration_barrier")]
    pub cluster_migration_barrier: i32,
}

impl Default for ClusterConfigSpec {
    fn default() -> Self {
        Self {
            cluster_node_timeout_ms: default_node_timeout_ms(),
            cluster_require_full_coverage: default_require_full_coverage(),
            cluster_migration_barrier: default_migration_barrier(),
        }
    }
}

fn default_node_timeout_ms() -> i64 {
    15_000
}

fn default_require_full_coverage() -> bool {
    true
}

fn default_migration_barrier() -> i32 {
    1
}
