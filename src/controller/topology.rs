//! Per-kind desired-state synthesis.
//!
//! Each topology kind implements [`TopologyKind`]: it resolves its extras
//! (slot assignment, sentinel monitors), turns spec plus extras into a
//! [`ChildResourceSet`], and adds its own fields to the aggregated status.
//! Synthesis is pure: the same object and extras give byte-identical
//! manifests.

use std::collections::BTreeMap;
use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::apply::{AppliedResult, ApplyOutcome};
use crate::controller::error::{Error, Result};
use crate::controller::status::{clear_condition, push_condition};
use crate::crd::{
    CLUSTER_BUS_PORT_OFFSET, Condition, ConditionType, ImageSpec, MasterRoleSpec, REDIS_PORT,
    RedisCluster, RedisInstance, RedisMasterReplica, RedisSentinel, ReplicaRoleSpec, Role,
    SENTINEL_PORT, TopologyPhase, TopologyStatus,
};
use crate::resources::configmap::{
    REPLICA_CONF_KEY, cluster_config_data, generate_configmap, render_replica_conf,
};
use crate::resources::services::{ServiceMode, generate_service};
use crate::resources::statefulset::{WorkloadParams, generate_statefulset};
use crate::resources::{ChildKey, ChildKind, ChildResourceSet, ParentRef};
use crate::sentinel::{
    self, MonitorTarget, SENTINEL_CONF_KEY, SentinelMonitor, SentinelMonitorSet, TopologyLookup,
};
use crate::slots::{MigrationPlan, SlotAssignment, TOTAL_SLOTS};

/// Capabilities the reconcile driver needs from a topology kind.
#[async_trait]
pub trait TopologyKind:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    /// Per-pass input resolved before synthesis.
    type Extra: Send + Sync;

    fn user_labels(&self) -> &BTreeMap<String, String>;

    fn user_annotations(&self) -> &BTreeMap<String, String>;

    fn status(&self) -> Option<&TopologyStatus>;

    /// Identity stamped on every child.
    fn parent(&self) -> ParentRef {
        ParentRef::new(self, self.user_labels(), self.user_annotations())
    }

    /// Resolve what synthesis needs beyond the spec.
    async fn allocate_extra(&self, lookup: &dyn TopologyLookup) -> Result<Self::Extra>;

    /// Desired children. Rejects malformed specs with `InvalidSpec`.
    fn synthesize(&self, extra: &Self::Extra) -> Result<ChildResourceSet>;

    /// Fill in kind-specific status. `applied` is `None` when the pass
    /// failed before or during apply.
    fn extend_status(
        &self,
        extra: Option<&Self::Extra>,
        applied: Option<&AppliedResult>,
        status: &mut TopologyStatus,
    );
}

fn data_command() -> Vec<String> {
    ["redis-server", "--appendonly", "yes", "--dir", "/data"]
        .iter()
        .map(|s| (*s).to_string())
        .collect()
}

fn config_command(file: &str) -> Vec<String> {
    vec!["redis-server".to_string(), format!("/etc/redis/{file}")]
}

/// Master and replica children shared by RedisMasterReplica and the
/// embedded form of RedisSentinel.
fn master_replica_children(
    parent: &ParentRef,
    image: &ImageSpec,
    master: &MasterRoleSpec,
    replica: &ReplicaRoleSpec,
    set: &mut ChildResourceSet,
) -> Result<()> {
    if replica.replicas < 0 {
        return Err(Error::InvalidSpec(format!(
            "replica.replicas must not be negative, got {}",
            replica.replicas
        )));
    }

    let master_name = parent.role_name(Role::Master);
    let replica_name = parent.role_name(Role::Replica);
    let replica_config = format!("{replica_name}-config");
    let ports = vec![("redis", REDIS_PORT)];

    set.insert(
        ChildKind::ConfigMap,
        &generate_configmap(
            parent,
            &replica_config,
            Role::Replica,
            BTreeMap::from([(
                REPLICA_CONF_KEY.to_string(),
                render_replica_conf(&parent.service_host(&master_name)),
            )]),
        ),
    )?;

    for (name, role) in [(&master_name, Role::Master), (&replica_name, Role::Replica)] {
        set.insert(
            ChildKind::Service,
            &generate_service(parent, name, role, &ports, ServiceMode::ClusterIp),
        )?;
    }

    set.insert(
        ChildKind::StatefulSet,
        &generate_statefulset(
            parent,
            &WorkloadParams {
                name: master_name.clone(),
                role: Role::Master,
                replicas: 1,
                service_name: master_name.clone(),
                image,
                resources: &master.resources,
                storage: Some(&master.storage),
                command: data_command(),
                ports: ports.clone(),
                config_map: None,
            },
        ),
    )?;
    set.insert(
        ChildKind::StatefulSet,
        &generate_statefulset(
            parent,
            &WorkloadParams {
                name: replica_name.clone(),
                role: Role::Replica,
                replicas: replica.replicas,
                service_name: replica_name,
                image,
                resources: &replica.resources,
                storage: Some(&replica.storage),
                command: config_command(REPLICA_CONF_KEY),
                ports,
                config_map: Some(replica_config),
            },
        ),
    )?;
    Ok(())
}

// === RedisInstance ===

#[async_trait]
impl TopologyKind for RedisInstance {
    type Extra = ();

    fn user_labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }

    fn user_annotations(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations
    }

    fn status(&self) -> Option<&TopologyStatus> {
        self.status.as_ref()
    }

    async fn allocate_extra(&self, _lookup: &dyn TopologyLookup) -> Result<()> {
        Ok(())
    }

    fn synthesize(&self, _extra: &()) -> Result<ChildResourceSet> {
        let parent = self.parent();
        let name = parent.name.clone();
        let ports = vec![("redis", REDIS_PORT)];
        let mut set = ChildResourceSet::new(parent.uid.clone());

        set.insert(
            ChildKind::Service,
            &generate_service(&parent, &name, Role::Master, &ports, ServiceMode::ClusterIp),
        )?;
        set.insert(
            ChildKind::StatefulSet,
            &generate_statefulset(
                &parent,
                &WorkloadParams {
                    name: name.clone(),
                    role: Role::Master,
                    replicas: 1,
                    service_name: name,
                    image: &self.spec.image,
                    resources: &self.spec.resources,
                    storage: Some(&self.spec.storage),
                    command: data_command(),
                    ports,
                    config_map: None,
                },
            ),
        )?;
        Ok(set)
    }

    fn extend_status(
        &self,
        _extra: Option<&()>,
        _applied: Option<&AppliedResult>,
        status: &mut TopologyStatus,
    ) {
        let parent = self.parent();
        status.master_service = Some(parent.service_host(&parent.name));
    }
}

// === RedisMasterReplica ===

#[async_trait]
impl TopologyKind for RedisMasterReplica {
    type Extra = ();

    fn user_labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }

    fn user_annotations(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations
    }

    fn status(&self) -> Option<&TopologyStatus> {
        self.status.as_ref()
    }

    async fn allocate_extra(&self, _lookup: &dyn TopologyLookup) -> Result<()> {
        Ok(())
    }

    fn synthesize(&self, _extra: &()) -> Result<ChildResourceSet> {
        let parent = self.parent();
        let mut set = ChildResourceSet::new(parent.uid.clone());
        master_replica_children(
            &parent,
            &self.spec.image,
            &self.spec.master,
            &self.spec.replica,
            &mut set,
        )?;
        Ok(set)
    }

    fn extend_status(
        &self,
        _extra: Option<&()>,
        _applied: Option<&AppliedResult>,
        status: &mut TopologyStatus,
    ) {
        let parent = self.parent();
        status.master_service = Some(parent.service_host(&parent.role_name(Role::Master)));
    }
}

// === RedisSentinel ===

impl RedisSentinel {
    fn sentinel_config_key(&self) -> ChildKey {
        let parent = self.parent();
        ChildKey::new(
            ChildKind::ConfigMap,
            parent.namespace.clone(),
            format!("{}-config", parent.role_name(Role::Sentinel)),
        )
    }
}

#[async_trait]
impl TopologyKind for RedisSentinel {
    type Extra = SentinelMonitorSet;

    fn user_labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }

    fn user_annotations(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations
    }

    fn status(&self) -> Option<&TopologyStatus> {
        self.status.as_ref()
    }

    async fn allocate_extra(&self, lookup: &dyn TopologyLookup) -> Result<SentinelMonitorSet> {
        let parent = self.parent();
        let host = match sentinel::validate(&parent.name, &self.spec)? {
            MonitorTarget::Embedded => parent.service_host(&parent.role_name(Role::Master)),
            MonitorTarget::Reference(name) => {
                sentinel::resolve_reference(lookup, &parent.namespace, name).await?
            }
        };
        Ok(SentinelMonitorSet::single(SentinelMonitor::new(
            host,
            &self.spec.config,
        )))
    }

    fn synthesize(&self, monitors: &SentinelMonitorSet) -> Result<ChildResourceSet> {
        let parent = self.parent();
        let target = sentinel::validate(&parent.name, &self.spec)?;
        let mut set = ChildResourceSet::new(parent.uid.clone());

        if let (MonitorTarget::Embedded, Some(embedded)) = (&target, &self.spec.redis) {
            master_replica_children(
                &parent,
                &self.spec.image,
                &embedded.master,
                &embedded.replica,
                &mut set,
            )?;
        }

        let sentinel_name = parent.role_name(Role::Sentinel);
        let config_name = format!("{sentinel_name}-config");
        let ports = vec![("sentinel", SENTINEL_PORT)];

        set.insert(
            ChildKind::ConfigMap,
            &generate_configmap(
                &parent,
                &config_name,
                Role::Sentinel,
                BTreeMap::from([(SENTINEL_CONF_KEY.to_string(), monitors.render(SENTINEL_PORT))]),
            ),
        )?;
        set.insert(
            ChildKind::Service,
            &generate_service(
                &parent,
                &sentinel_name,
                Role::Sentinel,
                &ports,
                ServiceMode::ClusterIp,
            ),
        )?;
        // Sentinels rewrite their config file; run from a writable copy
        let command = vec![
            "sh".to_string(),
            "-c".to_string(),
            format!(
                "cp /etc/redis/{SENTINEL_CONF_KEY} /data/{SENTINEL_CONF_KEY} && exec redis-sentinel /data/{SENTINEL_CONF_KEY}"
            ),
        ];
        set.insert(
            ChildKind::StatefulSet,
            &generate_statefulset(
                &parent,
                &WorkloadParams {
                    name: sentinel_name.clone(),
                    role: Role::Sentinel,
                    replicas: self.spec.replicas,
                    service_name: sentinel_name,
                    image: &self.spec.image,
                    resources: &self.spec.resources,
                    storage: None,
                    command,
                    ports,
                    config_map: Some(config_name),
                },
            ),
        )?;
        Ok(set)
    }

    fn extend_status(
        &self,
        monitors: Option<&SentinelMonitorSet>,
        applied: Option<&AppliedResult>,
        status: &mut TopologyStatus,
    ) {
        if let Some(host) = monitors.and_then(SentinelMonitorSet::master_host) {
            status.master_service = Some(host.to_string());
        }

        let patched = applied
            .and_then(|a| a.outcome(&self.sentinel_config_key()))
            .is_some_and(|o| matches!(o, ApplyOutcome::Patched { .. }));
        if patched {
            push_condition(
                status,
                Condition::new(
                    ConditionType::ConfigPendingRestart,
                    true,
                    "SentinelConfigChanged",
                    "sentinel.conf changed; running sentinels keep the old config until restarted",
                    self.metadata.generation,
                ),
            );
        }
    }
}

// === RedisCluster ===

/// Extras of a cluster pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClusterExtra {
    /// Assignment computed from `masters`.
    pub assignment: SlotAssignment,
    /// Ownership changes against the recorded assignment.
    pub plan: MigrationPlan,
}

impl RedisCluster {
    fn validate(&self) -> Result<u16> {
        let masters = self.spec.masters;
        if masters < 1 {
            return Err(Error::InvalidSpec(format!(
                "masters must be at least 1, got {masters}"
            )));
        }
        let masters = u16::try_from(masters)
            .ok()
            .filter(|m| *m <= TOTAL_SLOTS)
            .ok_or_else(|| {
                Error::InvalidSpec(format!(
                    "masters must not exceed {TOTAL_SLOTS}, got {masters}"
                ))
            })?;
        if self.spec.replicas_per_master < 0 {
            return Err(Error::InvalidSpec(format!(
                "replicasPerMaster must not be negative, got {}",
                self.spec.replicas_per_master
            )));
        }
        if self.spec.config.cluster_node_timeout_ms < 1 {
            return Err(Error::InvalidSpec(
                "clusterNodeTimeoutMs must be positive".to_string(),
            ));
        }
        Ok(masters)
    }
}

#[async_trait]
impl TopologyKind for RedisCluster {
    type Extra = ClusterExtra;

    fn user_labels(&self) -> &BTreeMap<String, String> {
        &self.spec.labels
    }

    fn user_annotations(&self) -> &BTreeMap<String, String> {
        &self.spec.annotations
    }

    fn status(&self) -> Option<&TopologyStatus> {
        self.status.as_ref()
    }

    async fn allocate_extra(&self, _lookup: &dyn TopologyLookup) -> Result<ClusterExtra> {
        let masters = self.validate()?;
        let assignment = SlotAssignment::for_masters(masters);
        let recorded = self
            .status
            .as_ref()
            .and_then(|s| SlotAssignment::from_status(&s.slot_assignment))
            .unwrap_or_default();
        let plan = MigrationPlan::between(&recorded, &assignment);
        Ok(ClusterExtra { assignment, plan })
    }

    fn synthesize(&self, extra: &ClusterExtra) -> Result<ChildResourceSet> {
        let masters = self.validate()?;
        let parent = self.parent();
        let mut set = ChildResourceSet::new(parent.uid.clone());

        let config_name = format!("{}-cluster-config", parent.name);
        let ports = vec![
            ("redis", REDIS_PORT),
            ("cluster-bus", REDIS_PORT + CLUSTER_BUS_PORT_OFFSET),
        ];

        set.insert(
            ChildKind::ConfigMap,
            &generate_configmap(
                &parent,
                &config_name,
                Role::Master,
                cluster_config_data(&self.spec.config, &extra.assignment),
            ),
        )?;

        let replicas = i32::from(masters)
            .checked_mul(self.spec.replicas_per_master)
            .ok_or_else(|| Error::InvalidSpec("replica count overflows".to_string()))?;
        for (role, count) in [(Role::Master, i32::from(masters)), (Role::Replica, replicas)] {
            let name = parent.role_name(role);
            set.insert(
                ChildKind::Service,
                &generate_service(&parent, &name, role, &ports, ServiceMode::Headless),
            )?;
            set.insert(
                ChildKind::StatefulSet,
                &generate_statefulset(
                    &parent,
                    &WorkloadParams {
                        name: name.clone(),
                        role,
                        replicas: count,
                        service_name: name,
                        image: &self.spec.image,
                        resources: &self.spec.resources,
                        storage: Some(&self.spec.storage),
                        command: config_command("redis.conf"),
                        ports: ports.clone(),
                        config_map: Some(config_name.clone()),
                    },
                ),
            )?;
        }
        Ok(set)
    }

    fn extend_status(
        &self,
        extra: Option<&ClusterExtra>,
        applied: Option<&AppliedResult>,
        status: &mut TopologyStatus,
    ) {
        let parent = self.parent();
        status.master_service = Some(parent.service_host(&parent.role_name(Role::Master)));

        // The recorded assignment only moves once the new config is written
        let (Some(extra), Some(_)) = (extra, applied) else {
            return;
        };
        if extra.plan.is_empty() {
            if status.phase == TopologyPhase::Ready {
                clear_condition(
                    status,
                    ConditionType::SlotsReassigned,
                    "SlotsSettled",
                    "Every master serves its assigned slots",
                    self.metadata.generation,
                );
            }
        } else {
            push_condition(
                status,
                Condition::new(
                    ConditionType::SlotsReassigned,
                    true,
                    "MastersChanged",
                    &extra.plan.summary(),
                    self.metadata.generation,
                ),
            );
        }
        status.slot_assignment = extra.assignment.to_status();
    }
}
