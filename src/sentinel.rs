//! Sentinel topology: validation, master resolution, and `sentinel.conf`.
//!
//! A sentinel group watches exactly one master, either one it deploys itself
//! (`redis`) or an existing RedisMasterReplica (`masterReplicaRef`). The
//! monitor set is rendered into a ConfigMap; nothing is pushed to live
//! sentinels.

use std::fmt::Write as _;

use async_trait::async_trait;
use kube::{Api, Client};
use tracing::warn;

use crate::controller::error::{Error, Result};
use crate::crd::{
    REDIS_PORT, RedisMasterReplica, RedisSentinelSpec, SentinelConfigSpec, TopologyPhase,
};

/// Name every sentinel group uses for its monitored master.
pub const MONITOR_NAME: &str = "mymaster";

/// File holding the sentinel configuration.
pub const SENTINEL_CONF_KEY: &str = "sentinel.conf";

/// One `sentinel monitor` entry with its tuning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SentinelMonitor {
    pub master_name: String,
    pub host: String,
    pub port: i32,
    pub quorum: i32,
    pub down_after_ms: i64,
    pub failover_timeout_ms: i64,
    pub parallel_syncs: i32,
}

impl SentinelMonitor {
    pub fn new(host: impl Into<String>, config: &SentinelConfigSpec) -> Self {
        Self {
            master_name: MONITOR_NAME.to_string(),
            host: host.into(),
            port: REDIS_PORT,
            quorum: config.quorum,
            down_after_ms: config.down_after_ms,
            failover_timeout_ms: config.failover_timeout_ms,
            parallel_syncs: config.parallel_syncs,
        }
    }
}

/// Masters watched by one sentinel group.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SentinelMonitorSet {
    pub monitors: Vec<SentinelMonitor>,
}

impl SentinelMonitorSet {
    pub fn single(monitor: SentinelMonitor) -> Self {
        Self {
            monitors: vec![monitor],
        }
    }

    /// Host of the first monitored master.
    pub fn master_host(&self) -> Option<&str> {
        self.monitors.first().map(|m| m.host.as_str())
    }

    /// Render `sentinel.conf`.
    pub fn render(&self, announce_port: i32) -> String {
        let mut conf = String::new();
        let _ = writeln!(conf, "port {announce_port}");
        conf.push_str("dir /data\n");
        // Masters are addressed by service name, not IP
        conf.push_str("sentinel resolve-hostnames yes\n");
        conf.push_str("sentinel announce-hostnames yes\n");
        for m in &self.monitors {
            let _ = writeln!(
                conf,
                "sentinel monitor {} {} {} {}",
                m.master_name, m.host, m.port, m.quorum
            );
            let _ = writeln!(
                conf,
                "sentinel down-after-milliseconds {} {}",
                m.master_name, m.down_after_ms
            );
            let _ = writeln!(
                conf,
                "sentinel failover-timeout {} {}",
                m.master_name, m.failover_timeout_ms
            );
            let _ = writeln!(
                conf,
                "sentinel parallel-syncs {} {}",
                m.master_name, m.parallel_syncs
            );
        }
        conf
    }
}

/// Which master a sentinel group watches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MonitorTarget<'a> {
    /// Deployed by the sentinel object itself.
    Embedded,
    /// An existing RedisMasterReplica, by name.
    Reference(&'a str),
}

/// Check the sentinel spec and pick its target.
///
/// An even number of sentinels is allowed but logged.
pub fn validate<'a>(name: &str, spec: &'a RedisSentinelSpec) -> Result<MonitorTarget<'a>> {
    if spec.replicas < 1 {
        return Err(Error::InvalidSpec(format!(
            "replicas must be at least 1, got {}",
            spec.replicas
        )));
    }
    if spec.config.quorum < 1 {
        return Err(Error::InvalidSpec(format!(
            "quorum must be at least 1, got {}",
            spec.config.quorum
        )));
    }
    if spec.config.quorum > spec.replicas {
        return Err(Error::InvalidSpec(format!(
            "quorum {} exceeds sentinel replicas {}",
            spec.config.quorum, spec.replicas
        )));
    }
    if spec.config.down_after_ms < 1 || spec.config.failover_timeout_ms < 1 {
        return Err(Error::InvalidSpec(
            "downAfterMs and failoverTimeoutMs must be positive".to_string(),
        ));
    }
    if spec.config.parallel_syncs < 1 {
        return Err(Error::InvalidSpec(format!(
            "parallelSyncs must be at least 1, got {}",
            spec.config.parallel_syncs
        )));
    }

    let target = match (&spec.redis, &spec.master_replica_ref) {
        (Some(_), Some(_)) => {
            return Err(Error::InvalidSpec(
                "redis and masterReplicaRef are mutually exclusive".to_string(),
            ));
        }
        (None, None) => {
            return Err(Error::InvalidSpec(
                "one of redis or masterReplicaRef is required".to_string(),
            ));
        }
        (Some(embedded), None) => {
            if embedded.replica.replicas < 0 {
                return Err(Error::InvalidSpec(format!(
                    "redis.replica.replicas must not be negative, got {}",
                    embedded.replica.replicas
                )));
            }
            MonitorTarget::Embedded
        }
        (None, Some(reference)) => {
            if reference.name.is_empty() {
                return Err(Error::InvalidSpec(
                    "masterReplicaRef.name must not be empty".to_string(),
                ));
            }
            MonitorTarget::Reference(&reference.name)
        }
    };

    if spec.replicas % 2 == 0 {
        warn!(
            name = %name,
            replicas = spec.replicas,
            "Even number of sentinels, an odd count is recommended"
        );
    }

    Ok(target)
}

/// What a sentinel needs to know about a referenced RedisMasterReplica.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterReplicaSnapshot {
    pub phase: TopologyPhase,
    pub master_service: Option<String>,
}

/// Read access to other topology objects.
#[async_trait]
pub trait TopologyLookup: Send + Sync {
    /// Snapshot of a RedisMasterReplica, `None` if it does not exist.
    async fn master_replica(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MasterReplicaSnapshot>>;
}

/// Lookup against the API server.
#[derive(Clone)]
pub struct KubeLookup {
    client: Client,
}

impl KubeLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TopologyLookup for KubeLookup {
    async fn master_replica(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<MasterReplicaSnapshot>> {
        let api: Api<RedisMasterReplica> = Api::namespaced(self.client.clone(), namespace);
        let object = api.get_opt(name).await?;
        Ok(object.map(|mr| {
            let status = mr.status.unwrap_or_default();
            MasterReplicaSnapshot {
                phase: status.phase,
                master_service: status.master_service,
            }
        }))
    }
}

/// Resolve the master a referencing sentinel group should watch.
///
/// Absent or not-yet-Ready objects are a pending dependency; the caller
/// retries with backoff.
pub async fn resolve_reference(
    lookup: &dyn TopologyLookup,
    namespace: &str,
    name: &str,
) -> Result<String> {
    let Some(snapshot) = lookup.master_replica(namespace, name).await? else {
        return Err(Error::PendingDependency(format!(
            "RedisMasterReplica {namespace}/{name} not found"
        )));
    };
    if snapshot.phase != TopologyPhase::Ready {
        return Err(Error::PendingDependency(format!(
            "RedisMasterReplica {namespace}/{name} is {}, waiting for Ready",
            snapshot.phase
        )));
    }
    snapshot.master_service.ok_or_else(|| {
        Error::PendingDependency(format!(
            "RedisMasterReplica {namespace}/{name} has not published its master service"
        ))
    })
}
