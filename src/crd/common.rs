//! Spec and status types shared by every Redis topology kind.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of all topology kinds.
pub const API_GROUP: &str = "cache.redisoperator.io";

/// API version of all topology kinds.
pub const API_VERSION: &str = "v1alpha1";

/// Default Redis client port.
pub const REDIS_PORT: i32 = 6379;

/// Default Sentinel port.
pub const SENTINEL_PORT: i32 = 26379;

/// Cluster bus port offset from client port (client port + 10000).
pub const CLUSTER_BUS_PORT_OFFSET: i32 = 10000;

/// Maximum number of conditions kept in a status history.
pub const MAX_CONDITIONS: usize = 32;

/// Container image specification.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageSpec {
    /// Container image repository (default: redis).
    #[serde(default = "default_image_repository")]
    pub repository: String,

    /// Image tag (default: 7.4-alpine).
    #[serde(default = "default_image_tag")]
    pub tag: String,

    /// Image pull policy (default: IfNotPresent).
    #[serde(default = "default_image_pull_policy")]
    pub pull_policy: String,

    /// Image pull secrets.
    #[serde(default)]
    pub pull_secrets: Vec<String>,
}

impl Default for ImageSpec {
    fn default() -> Self {
        Self {
            repository: default_image_repository(),
            tag: default_image_tag(),
            pull_policy: default_image_pull_policy(),
            pull_secrets: Vec::new(),
        }
    }
}

impl ImageSpec {
    /// Full image reference (`repository:tag`).
    pub fn reference(&self) -> String {
        format!("{}:{}", self.repository, self.tag)
    }
}

fn default_image_repository() -> String {
    "redis".to_string()
}

fn default_image_tag() -> String {
    "7.4-alpine".to_string()
}

fn default_image_pull_policy() -> String {
    "IfNotPresent".to_string()
}

/// Resource requests and limits for Redis pods.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirementsSpec {
    /// CPU and memory requests.
    #[serde(default)]
    pub requests: ResourceSpec,

    /// CPU and memory limits.
    #[serde(default)]
    pub limits: ResourceLimitsSpec,
}

/// Resource requests specification.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSpec {
    /// CPU request (default: 100m).
    #[serde(default = "default_cpu_request")]
    pub cpu: String,

    /// Memory request (default: 128Mi).
    #[serde(default = "default_memory_request")]
    pub memory: String,
}

impl Default for ResourceSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu_request(),
            memory: default_memory_request(),
        }
    }
}

fn default_cpu_request() -> String {
    "100m".to_string()
}

fn default_memory_request() -> String {
    "128Mi".to_string()
}

/// Resource limits specification.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceLimitsSpec {
    /// CPU limit (default: 1).
    #[serde(default = "default_cpu_limit")]
    pub cpu: String,

    /// Memory limit (default: 512Mi).
    #[serde(default = "default_memory_limit")]
    pub memory: String,
}

impl Default for ResourceLimitsSpec {
    fn default() -> Self {
        Self {
            cpu: default_cpu_limit(),
            memory: default_memory_limit(),
        }
    }
}

fn default_cpu_limit() -> String {
    "1".to_string()
}

fn default_memory_limit() -> String {
    "512Mi".to_string()
}

/// Persistent storage for a Redis role.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    /// Size of the PersistentVolumeClaim (default: 1Gi).
    #[serde(default = "default_storage_size")]
    pub size: String,

    /// Storage class name. Uses the cluster default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_class_name: Option<String>,
}

impl Default for StorageSpec {
    fn default() -> Self {
        Self {
            size: default_storage_size(),
            storage_class_name: None,
        }
    }
}

fn default_storage_size() -> String {
    "1Gi".to_string()
}

/// Settings for the single master of a master/replica group.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MasterRoleSpec {
    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default)]
    pub storage: StorageSpec,
}

/// Settings for the replicas of a master/replica group.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaRoleSpec {
    /// Number of replica processes (default: 1, may be 0).
    #[serde(default = "default_replica_count")]
    pub replicas: i32,

    #[serde(default)]
    pub resources: ResourceRequirementsSpec,

    #[serde(default)]
    pub storage: StorageSpec,
}

impl Default for ReplicaRoleSpec {
    fn default() -> Self {
        Self {
            replicas: default_replica_count(),
            resources: ResourceRequirementsSpec::default(),
            storage: StorageSpec::default(),
        }
    }
}

fn default_replica_count() -> i32 {
    1
}

/// Role a child workload plays in a topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Replica,
    Sentinel,
}

impl Role {
    /// Label value and name suffix for the role.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Master => "master",
            Role::Replica => "replica",
            Role::Sentinel => "sentinel",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle phase of a topology object.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize, JsonSchema)]
pub enum TopologyPhase {
    /// Waiting for the first pass or for a dependency.
    #[default]
    Pending,
    /// Child resources exist but are not all ready yet.
    Creating,
    /// Every role has its requested ready replicas.
    Ready,
    /// Serving, but under-provisioned or reported unhealthy.
    Degraded,
    /// Reconciliation cannot proceed without intervention.
    Failed,
    /// The spec was rejected; waits for a new generation.
    Invalid,
}

impl TopologyPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            TopologyPhase::Pending => "Pending",
            TopologyPhase::Creating => "Creating",
            TopologyPhase::Ready => "Ready",
            TopologyPhase::Degraded => "Degraded",
            TopologyPhase::Failed => "Failed",
            TopologyPhase::Invalid => "Invalid",
        }
    }
}

impl std::fmt::Display for TopologyPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Condition describes the state of a topology at a certain point.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition.
    pub r#type: String,
    /// Status of the condition ("True", "False", "Unknown").
    pub status: String,
    /// Machine-readable reason for the condition's last transition.
    pub reason: String,
    /// Human-readable message indicating details about last transition.
    pub message: String,
    /// Time the condition was recorded.
    pub last_transition_time: String,
    /// The generation of the resource this condition was observed for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a new condition.
    pub fn new(
        condition_type: ConditionType,
        status: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self {
            r#type: condition_type.to_string(),
            status: if status {
                "True".to_string()
            } else {
                "False".to_string()
            },
            reason: reason.to_string(),
            message: message.to_string(),
            last_transition_time: jiff::Timestamp::now().to_string(),
            observed_generation: generation,
        }
    }

    /// Create a "Ready" condition.
    pub fn ready(ready: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Ready, ready, reason, message, generation)
    }

    /// Create a "Progressing" condition.
    pub fn progressing(
        progressing: bool,
        reason: &str,
        message: &str,
        generation: Option<i64>,
    ) -> Self {
        Self::new(
            ConditionType::Progressing,
            progressing,
            reason,
            message,
            generation,
        )
    }

    /// Create a "Degraded" condition.
    pub fn degraded(degraded: bool, reason: &str, message: &str, generation: Option<i64>) -> Self {
        Self::new(ConditionType::Degraded, degraded, reason, message, generation)
    }

    /// Two conditions carry the same information, ignoring timestamps.
    pub fn same_as(&self, other: &Condition) -> bool {
        self.r#type == other.r#type
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
            && self.observed_generation == other.observed_generation
    }
}

/// Types of conditions recorded on topology objects.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Deserialize, Serialize, JsonSchema)]
pub enum ConditionType {
    /// All roles have their requested ready replicas.
    Ready,
    /// Child resources are being created or updated.
    Progressing,
    /// Serving but under-provisioned or unhealthy.
    Degraded,
    /// Waiting for a referenced object to become ready.
    PendingDependency,
    /// The spec was rejected.
    InvalidSpec,
    /// A write kept conflicting past the retry ceiling.
    ConflictExhausted,
    /// The platform API failed.
    ReconcileError,
    /// Sentinel config changed; takes effect on next process restart.
    ConfigPendingRestart,
    /// The cluster slot assignment changed and slots must move.
    SlotsReassigned,
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConditionType::Ready => write!(f, "Ready"),
            ConditionType::Progressing => write!(f, "Progressing"),
            ConditionType::Degraded => write!(f, "Degraded"),
            ConditionType::PendingDependency => write!(f, "PendingDependency"),
            ConditionType::InvalidSpec => write!(f, "InvalidSpec"),
            ConditionType::ConflictExhausted => write!(f, "ConflictExhausted"),
            ConditionType::ReconcileError => write!(f, "ReconcileError"),
            ConditionType::ConfigPendingRestart => write!(f, "ConfigPendingRestart"),
            ConditionType::SlotsReassigned => write!(f, "SlotsReassigned"),
        }
    }
}

/// Slot range owned by one cluster master, as recorded in status.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SlotRangeStatus {
    /// Master ordinal (pod index in the master StatefulSet).
    pub ordinal: i32,
    /// First slot (inclusive).
    pub start: i32,
    /// Last slot (inclusive).
    pub end: i32,
}

/// Status shared by every topology kind.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopologyStatus {
    /// Current phase of the topology lifecycle.
    #[serde(default)]
    pub phase: TopologyPhase,

    /// The generation most recently observed by the controller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Condition history, oldest first.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Ready replicas per role.
    #[serde(default)]
    pub ready_replicas: BTreeMap<String, i32>,

    /// Address of the synthesized master service, for dependents.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub master_service: Option<String>,

    /// Recorded hash-slot assignment (cluster only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slot_assignment: Vec<SlotRangeStatus>,
}

impl TopologyStatus {
    /// Most recent condition of a type.
    pub fn latest(&self, condition_type: ConditionType) -> Option<&Condition> {
        let wanted = condition_type.to_string();
        self.conditions.iter().rev().find(|c| c.r#type == wanted)
    }
}

/// Merge user-supplied metadata over a base map. Base keys win.
pub fn merge_metadata(
    base: BTreeMap<String, String>,
    user: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut merged = user.clone();
    merged.extend(base);
    merged
}
