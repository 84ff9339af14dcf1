//! StatefulSet generation for Redis roles.
//!
//! Every role of every topology runs as one StatefulSet:
//! - Stable network identity via the role's service
//! - Persistent storage for data roles, scratch space for sentinels
//! - Optional ConfigMap mounted at `/etc/redis`
//! - PING-based probes against the role's port

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, ContainerPort, EmptyDirVolumeSource, EnvVar,
    EnvVarSource, ExecAction, LocalObjectReference, ObjectFieldSelector, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecurityContext, Volume, VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use std::collections::BTreeMap;

use crate::crd::{ImageSpec, ResourceRequirementsSpec, Role, StorageSpec};
use crate::resources::common::ParentRef;

/// Redis user ID in the official container image
const REDIS_USER_ID: i64 = 999;
/// Termination grace period in seconds (allows time for a final save)
const TERMINATION_GRACE_PERIOD: i64 = 30;
/// Mount path of the role's ConfigMap
pub const CONFIG_MOUNT_PATH: &str = "/etc/redis";
/// Mount path of the data volume
pub const DATA_MOUNT_PATH: &str = "/data";

/// Everything that varies between role workloads.
#[derive(Clone, Debug)]
pub struct WorkloadParams<'a> {
    /// StatefulSet name; also the pod name prefix.
    pub name: String,
    pub role: Role,
    pub replicas: i32,
    /// Service governing pod DNS.
    pub service_name: String,
    pub image: &'a ImageSpec,
    pub resources: &'a ResourceRequirementsSpec,
    /// `None` gives the pods an emptyDir instead of a claim.
    pub storage: Option<&'a StorageSpec>,
    /// Container entrypoint.
    pub command: Vec<String>,
    /// Named container ports; the first is probed.
    pub ports: Vec<(&'static str, i32)>,
    /// ConfigMap to mount at [`CONFIG_MOUNT_PATH`].
    pub config_map: Option<String>,
}

/// Generate the StatefulSet for one role.
pub fn generate_statefulset(parent: &ParentRef, params: &WorkloadParams<'_>) -> StatefulSet {
    let labels = parent.labels(params.role);

    StatefulSet {
        metadata: parent.child_metadata(&params.name, params.role),
        spec: Some(StatefulSetSpec {
            replicas: Some(params.replicas),
            service_name: Some(params.service_name.clone()),
            selector: LabelSelector {
                match_labels: Some(parent.selector_labels(params.role)),
                ..Default::default()
            },
            // Pods of a role are peers; no ordering needed at startup
            pod_management_policy: Some("Parallel".to_string()),
            template: generate_pod_template(parent, params, &labels),
            volume_claim_templates: params.storage.map(|s| vec![generate_pvc_template(s)]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn generate_pod_template(
    parent: &ParentRef,
    params: &WorkloadParams<'_>,
    labels: &BTreeMap<String, String>,
) -> PodTemplateSpec {
    PodTemplateSpec {
        metadata: Some(ObjectMeta {
            labels: Some(labels.clone()),
            annotations: parent.annotations(),
            ..Default::default()
        }),
        spec: Some(PodSpec {
            termination_grace_period_seconds: Some(TERMINATION_GRACE_PERIOD),
            security_context: Some(generate_pod_security_context()),
            containers: vec![generate_redis_container(params)],
            volumes: generate_volumes(params),
            image_pull_secrets: convert_pull_secrets(&params.image.pull_secrets),
            ..Default::default()
        }),
    }
}

/// Convert pull_secrets list to LocalObjectReference list.
fn convert_pull_secrets(pull_secrets: &[String]) -> Option<Vec<LocalObjectReference>> {
    if pull_secrets.is_empty() {
        return None;
    }

    Some(
        pull_secrets
            .iter()
            .map(|name| LocalObjectReference { name: name.clone() })
            .collect(),
    )
}

fn generate_pod_security_context() -> PodSecurityContext {
    PodSecurityContext {
        run_as_non_root: Some(true),
        run_as_user: Some(REDIS_USER_ID),
        fs_group: Some(REDIS_USER_ID),
        ..Default::default()
    }
}

fn generate_redis_container(params: &WorkloadParams<'_>) -> Container {
    let probe_port = params.ports.first().map(|(_, port)| *port).unwrap_or_default();

    Container {
        name: params.role.as_str().to_string(),
        image: Some(params.image.reference()),
        image_pull_policy: Some(params.image.pull_policy.clone()),
        command: Some(params.command.clone()),
        ports: Some(
            params
                .ports
                .iter()
                .map(|(name, port)| ContainerPort {
                    container_port: *port,
                    name: Some((*name).to_string()),
                    protocol: Some("TCP".to_string()),
                    ..Default::default()
                })
                .collect(),
        ),
        env: Some(generate_env_vars()),
        resources: Some(generate_resource_requirements(params.resources)),
        volume_mounts: Some(generate_volume_mounts(params)),
        security_context: Some(SecurityContext {
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        liveness_probe: Some(generate_ping_probe(probe_port, 15)),
        readiness_probe: Some(generate_ping_probe(probe_port, 5)),
        ..Default::default()
    }
}

/// Pod identity via downward API, used for announced hostnames.
fn generate_env_vars() -> Vec<EnvVar> {
    ["metadata.name", "metadata.namespace"]
        .into_iter()
        .zip(["POD_NAME", "POD_NAMESPACE"])
        .map(|(path, name)| EnvVar {
            name: name.to_string(),
            value_from: Some(EnvVarSource {
                field_ref: Some(ObjectFieldSelector {
                    field_path: path.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect()
}

fn generate_resource_requirements(resources: &ResourceRequirementsSpec) -> ResourceRequirements {
    ResourceRequirements {
        limits: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(resources.limits.cpu.clone())),
            ("memory".to_string(), Quantity(resources.limits.memory.clone())),
        ])),
        requests: Some(BTreeMap::from([
            ("cpu".to_string(), Quantity(resources.requests.cpu.clone())),
            ("memory".to_string(), Quantity(resources.requests.memory.clone())),
        ])),
        ..Default::default()
    }
}

/// PING probe against the local process.
fn generate_ping_probe(port: i32, period_seconds: i32) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "redis-cli".to_string(),
                "-p".to_string(),
                port.to_string(),
                "ping".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(5),
        period_seconds: Some(period_seconds),
        timeout_seconds: Some(5),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn generate_volumes(params: &WorkloadParams<'_>) -> Option<Vec<Volume>> {
    let mut volumes = Vec::new();

    if let Some(config_map) = &params.config_map {
        volumes.push(Volume {
            name: "config".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: config_map.clone(),
                ..Default::default()
            }),
            ..Default::default()
        });
    }

    // Without a claim template the data volume is scratch space
    if params.storage.is_none() {
        volumes.push(Volume {
            name: "data".to_string(),
            empty_dir: Some(EmptyDirVolumeSource::default()),
            ..Default::default()
        });
    }

    if volumes.is_empty() {
        None
    } else {
        Some(volumes)
    }
}

fn generate_volume_mounts(params: &WorkloadParams<'_>) -> Vec<VolumeMount> {
    let mut mounts = vec![VolumeMount {
        name: "data".to_string(),
        mount_path: DATA_MOUNT_PATH.to_string(),
        ..Default::default()
    }];
    if params.config_map.is_some() {
        mounts.push(VolumeMount {
            name: "config".to_string(),
            mount_path: CONFIG_MOUNT_PATH.to_string(),
            read_only: Some(true),
            ..Default::default()
        });
    }
    mounts
}

fn generate_pvc_template(storage: &StorageSpec) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some("data".to_string()),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: storage.storage_class_name.clone(),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(storage.size.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}
