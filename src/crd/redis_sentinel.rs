//! RedisSentinel Custom Resource Definition.
//!
//! A group of sentinel processes watching one master. The master is either
//! embedded (`redis`) or an existing RedisMasterReplica (`masterReplicaRef`).

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{
    ImageSpec, MasterRoleSpec, ReplicaRoleSpec, ResourceRequirementsSpec, TopologyStatus,
};

/// RedisSentinel deploys sentinels for a master/replica group.
///
/// Example:
/// ```yaml
/// apiVersion: cache.redisoperator.io/v1alpha1
/// kind: RedisSentinel
/// metadata:
///   name: orders-ha
/// spec:
///   replicas: 3
///   config:
///     quorum: 2
///   masterReplicaRef:
///     name: orders
/// ```
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cache.redisoperator.io",
    version = "v1alpha1",
    kind = "RedisSentinel",
    plural = "redissentinels",
    shortname = "rs",
    status = "TopologyStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Sentinels", "type":"integer", "jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Quorum", "type":"integer", "jsonPath":".spec.config.quorum"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisSentinelSpec {
    /// Number of sentinel processes (minimum 1, odd recommended).
    #[serde(default = "default_sentinel_replicas")]
    pub replicas: i32,

    #[serde(default)]
    pub config: SentinelConfigSpec,

    #[serde(default)]
    pub image: ImageSpec,

    /// Resources for sentinel pods.
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    /// Embedded master/replica group to deploy and monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<EmbeddedRedisSpec>,

    /// Existing RedisMasterReplica to monitor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_replica_ref: Option<MasterReplicaRef>,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl Default for RedisSentinelSpec {
    fn default() -> Self {
        Self {
            replicas: default_sentinel_replicas(),
            config: SentinelConfigSpec::default(),
            image: ImageSpec::default(),
            resources: ResourceRequirementsSpec::default(),
            redis: None,
            master_replica_ref: None,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }
}

fn default_sentinel_replicas() -> i32 {
    3
}

/// Failure detection and failover tuning written to `sentinel.conf`.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SentinelConfigSpec {
    /// Sentinels that must agree the master is down (default: 2).
    #[serde(default = "default_quorum")]
    pub quorum: i32,

    /// Milliseconds without reply before a master is subjectively down (default: 30000).
    #[serde(default = "default_down_after_ms")]
    pub down_after_ms: i64,

    /// Failover timeout in milliseconds (default: 180000).
    #[serde(default = "default_failover_timeout_ms")]
    pub failover_timeout_ms: i64,

    /// Replicas resynchronized in parallel after failover (default: 1).
    #[serde(default = "default_parallel_syncs")]
    pub parallel_syncs: i32,
}

impl Default for SentinelConfigSpec {
    fn default() -> Self {
        Self {
            quorum: default_quorum(),
            down_after_ms: default_down_after_ms(),
            failover_timeout_ms: default_failover_timeout_ms(),
            parallel_syncs: default_parallel_syncs(),
        }
    }
}

fn default_quorum() -> i32 {
    2
}

fn default_down_after_ms() -> i64 {
    30_000
}

fn default_failover_timeout_ms() -> i64 {
    180_000
}

fn default_parallel_syncs() -> i32 {
    1
}

/// Master/replica group owned by the sentinel object itself.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedRedisSpec {
    #[serde(default)]
    pub master: MasterRoleSpec,

    #[serde(default)]
    pub replica: ReplicaRoleSpec,
}

/// Reference to a RedisMasterReplica in the same namespace.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterReplicaRef {
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let spec = RedisSentinelSpec::default();
        assert_eq!(spec.replicas, 3);
        assert_eq!(spec.config.quorum, 2);
        assert_eq!(spec.config.down_after_ms, 30_000);
        assert_eq!(spec.config.failover_timeout_ms, 180_000);
        assert_eq!(spec.config.parallel_syncs, 1);
        assert!(spec.redis.is_none());
        assert!(spec.master_replica_ref.is_none());
    }

    #[test]
    fn test_ref_parses_camel_case() {
        let spec: RedisSentinelSpec = serde_json::from_str(
            r#"{"replicas":5,"config":{"quorum":3,"downAfterMs":5000},"masterReplicaRef":{"name":"orders"}}"#,
        )
        .expect("spec parses");
        assert_eq!(spec.replicas, 5);
        assert_eq!(spec.config.quorum, 3);
        assert_eq!(spec.config.down_after_ms, 5000);
        assert_eq!(
            spec.master_replica_ref.map(|r| r.name),
            Some("orders".to_string())
        );
    }
}
