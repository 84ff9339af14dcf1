//! ConfigMap generation for roles that need runtime configuration.
//!
//! Replica, sentinel, and cluster roles read their settings from a file
//! mounted out of the role ConfigMap. Masters and standalone instances run
//! with command-line flags only.

use k8s_openapi::api::core::v1::ConfigMap;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::crd::{ClusterConfigSpec, REDIS_PORT, Role};
use crate::resources::common::ParentRef;
use crate::slots::SlotAssignment;

/// File holding the replica configuration.
pub const REPLICA_CONF_KEY: &str = "replica.conf";
/// File holding the cluster node configuration.
pub const CLUSTER_CONF_KEY: &str = "redis.conf";
/// File holding the recorded slot assignment.
pub const SLOTS_KEY: &str = "slots";

/// Generate a ConfigMap for one role.
pub fn generate_configmap(
    parent: &ParentRef,
    name: &str,
    role: Role,
    data: BTreeMap<String, String>,
) -> ConfigMap {
    ConfigMap {
        metadata: parent.child_metadata(name, role),
        data: Some(data),
        ..Default::default()
    }
}

/// `replica.conf` for replicas following `master_host`.
pub fn render_replica_conf(master_host: &str) -> String {
    let mut conf = String::new();
    let _ = writeln!(conf, "replicaof {} {}", master_host, REDIS_PORT);
    conf.push_str("replica-read-only yes\n");
    conf.push_str("appendonly yes\n");
    conf.push_str("dir /data\n");
    conf
}

/// `redis.conf` for a cluster node.
pub fn render_cluster_conf(config: &ClusterConfigSpec) -> String {
    let yes_no = |b: bool| if b { "yes" } else { "no" };
    let mut conf = String::new();
    conf.push_str("cluster-enabled yes\n");
    conf.push_str("cluster-config-file /data/nodes.conf\n");
    let _ = writeln!(conf, "cluster-node-timeout {}", config.cluster_node_timeout_ms);
    let _ = writeln!(
        conf,
        "cluster-require-full-coverage {}",
        yes_no(config.cluster_require_full_coverage)
    );
    let _ = writeln!(
        conf,
        "cluster-migration-barrier {}",
        config.cluster_migration_barrier
    );
    conf.push_str("appendonly yes\n");
    conf.push_str("dir /data\n");
    conf
}

/// Data of the cluster ConfigMap: node config plus the slot assignment.
pub fn cluster_config_data(
    config: &ClusterConfigSpec,
    slots: &SlotAssignment,
) -> BTreeMap<String, String> {
    BTreeMap::from([
        (CLUSTER_CONF_KEY.to_string(), render_cluster_conf(config)),
        (SLOTS_KEY.to_string(), slots.render()),
    ])
}
