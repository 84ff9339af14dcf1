//! RedisMasterReplica Custom Resource Definition.
//!
//! One master and a group of replicas following it via `replicaof`.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::common::{ImageSpec, MasterRoleSpec, ReplicaRoleSpec, TopologyStatus};

/// RedisMasterReplica deploys a master with asynchronous replicas.
///
/// Example:
/// ```yaml
/// apiVersion: cache.redisoperator.io/v1alpha1
/// kind: RedisMasterReplica
/// metadata:
///   name: orders
/// spec:
///   replica:
///     replicas: 2
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "cache.redisoperator.io",
    version = "v1alpha1",
    kind = "RedisMasterReplica",
    plural = "redismasterreplicas",
    shortname = "rmr",
    status = "TopologyStatus",
    namespaced,
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".spec.replica.replicas"}"#,
    printcolumn = r#"{"name":"Master", "type":"string", "jsonPath":".status.masterService"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RedisMasterReplicaSpec {
    #[serde(default)]
    pub image: ImageSpec,

    #[serde(default)]
    pub master: MasterRoleSpec,

    #[serde(default)]
    pub replica: ReplicaRoleSpec,

    #[serde(default)]
    pub labels: BTreeMap<String, String>,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}
