//! Status aggregation.
//!
//! Folds the outcome of a pass, the readiness of the applied StatefulSets, and
//! the cached health signal into a new [`TopologyStatus`]. Conditions are an
//! append-only history: a condition equal to the latest of its type is not
//! appended again, so a steady-state pass yields an identical status.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::apply::AppliedResult;
use crate::controller::error::{Error, ErrorClass};
use crate::controller::state_machine::{TopologyEvent, TopologyStateMachine, TransitionContext};
use crate::crd::{Condition, ConditionType, MAX_CONDITIONS, TopologyPhase, TopologyStatus};
use crate::resources::ChildKind;
use crate::resources::common::COMPONENT_LABEL;
use crate::signals::HealthSignal;

/// Ready and desired replicas of one role.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoleReadiness {
    pub ready: i32,
    pub desired: i32,
}

/// Readiness per role, keyed by role label.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub roles: BTreeMap<String, RoleReadiness>,
}

impl Readiness {
    /// Read `spec.replicas` and `status.readyReplicas` of every applied
    /// StatefulSet.
    pub fn from_applied(applied: &AppliedResult) -> Self {
        let mut roles: BTreeMap<String, RoleReadiness> = BTreeMap::new();
        for child in &applied.children {
            if child.key.kind != ChildKind::StatefulSet {
                continue;
            }
            let Some(object) = child.object.as_ref() else {
                continue;
            };
            let role = object
                .pointer("/metadata/labels")
                .and_then(|labels| labels.get(COMPONENT_LABEL))
                .and_then(Value::as_str)
                .unwrap_or(child.key.name.as_str())
                .to_string();
            let entry = roles.entry(role).or_default();
            entry.desired += read_i32(object, "/spec/replicas");
            entry.ready += read_i32(object, "/status/readyReplicas");
        }
        Self { roles }
    }

    pub fn ready(&self) -> i32 {
        self.roles.values().map(|r| r.ready).sum()
    }

    pub fn desired(&self) -> i32 {
        self.roles.values().map(|r| r.desired).sum()
    }

    /// Ready replicas per role, as recorded in status.
    pub fn ready_by_role(&self) -> BTreeMap<String, i32> {
        self.roles
            .iter()
            .map(|(role, r)| (role.clone(), r.ready))
            .collect()
    }

    /// `"master 1/1, replica 0/2"`
    pub fn summary(&self) -> String {
        self.roles
            .iter()
            .map(|(role, r)| format!("{} {}/{}", role, r.ready, r.desired))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn read_i32(object: &Value, pointer: &str) -> i32 {
    object
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|v| i32::try_from(v).ok())
        .unwrap_or(0)
}

/// How a pass ended, as far as status is concerned.
#[derive(Clone, Debug)]
pub enum PassOutcome {
    /// Children applied; readiness read from the applied objects.
    Applied(Readiness),
    /// The pass stopped with an error.
    Failed {
        class: ErrorClass,
        reason: String,
        message: String,
    },
}

impl PassOutcome {
    pub fn failed(error: &Error) -> Self {
        PassOutcome::Failed {
            class: error.class(),
            reason: error.reason().to_string(),
            message: error.to_string(),
        }
    }

    pub fn failure_class(&self) -> Option<ErrorClass> {
        match self {
            PassOutcome::Applied(_) => None,
            PassOutcome::Failed { class, .. } => Some(*class),
        }
    }
}

/// A phase change made by an aggregation, for events and logs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PhaseChange {
    pub from: TopologyPhase,
    pub to: TopologyPhase,
    pub event: TopologyEvent,
    pub description: &'static str,
}

/// Append a condition unless it repeats the latest condition of its type.
/// The history is capped, dropping the oldest entries.
pub fn push_condition(status: &mut TopologyStatus, condition: Condition) -> bool {
    let repeated = status
        .conditions
        .iter()
        .rev()
        .find(|c| c.r#type == condition.r#type)
        .is_some_and(|latest| latest.same_as(&condition));
    if repeated {
        return false;
    }
    status.conditions.push(condition);
    if status.conditions.len() > MAX_CONDITIONS {
        let excess = status.conditions.len() - MAX_CONDITIONS;
        status.conditions.drain(..excess);
    }
    true
}

/// Append a `False` condition only if the latest of its type is `True`.
pub fn clear_condition(
    status: &mut TopologyStatus,
    condition_type: ConditionType,
    reason: &str,
    message: &str,
    generation: Option<i64>,
) -> bool {
    if !is_condition_true(&status.conditions, condition_type) {
        return false;
    }
    push_condition(
        status,
        Condition::new(condition_type, false, reason, message, generation),
    )
}

/// Check if the latest condition of a type is true
pub fn is_condition_true(conditions: &[Condition], condition_type: ConditionType) -> bool {
    let wanted = condition_type.to_string();
    conditions
        .iter()
        .rev()
        .find(|c| c.r#type == wanted)
        .is_some_and(|c| c.status == "True")
}

/// Get the reason of the latest condition of a type
pub fn get_condition_reason(conditions: &[Condition], condition_type: ConditionType) -> Option<&str> {
    let wanted = condition_type.to_string();
    conditions
        .iter()
        .rev()
        .find(|c| c.r#type == wanted)
        .map(|c| c.reason.as_str())
}

/// Compute the next status from the previous one.
///
/// Per-kind fields (`masterService`, `slotAssignment`, kind-specific
/// conditions) are filled in afterwards by the topology.
pub fn aggregate(
    previous: Option<&TopologyStatus>,
    generation: Option<i64>,
    outcome: &PassOutcome,
    health: Option<&HealthSignal>,
) -> (TopologyStatus, Vec<PhaseChange>) {
    let mut status = previous.cloned().unwrap_or_default();
    let generation_changed = status.observed_generation != generation;

    let readiness = match outcome {
        PassOutcome::Applied(readiness) => Some(readiness),
        PassOutcome::Failed { .. } => None,
    };
    // A failed pass did not look at the workloads; keep the last known counts
    let (ready, desired) = match readiness {
        Some(r) => (r.ready(), r.desired()),
        None => {
            let ready: i32 = status.ready_replicas.values().sum();
            (ready, ready.max(1))
        }
    };
    let healthy = health.map(HealthSignal::is_healthy);

    let ctx = TransitionContext::new(ready, desired)
        .with_health(healthy)
        .with_generation_changed(generation_changed)
        .with_failure(outcome.failure_class());
    let (phase, steps) = TopologyStateMachine::new().advance(status.phase, &ctx);
    let changes = steps
        .into_iter()
        .filter(|(from, to, _, _)| from != to)
        .map(|(from, to, event, description)| PhaseChange {
            from,
            to,
            event,
            description,
        })
        .collect();

    status.phase = phase;
    status.observed_generation = generation;
    if let Some(r) = readiness {
        status.ready_replicas = r.ready_by_role();
    }

    record_outcome_conditions(&mut status, outcome, generation);
    record_phase_conditions(&mut status, readiness, health, generation);

    (status, changes)
}

fn record_outcome_conditions(
    status: &mut TopologyStatus,
    outcome: &PassOutcome,
    generation: Option<i64>,
) {
    match outcome {
        PassOutcome::Failed {
            class,
            reason,
            message,
        } => {
            let condition_type = match class {
                ErrorClass::InvalidSpec => ConditionType::InvalidSpec,
                ErrorClass::PendingDependency => ConditionType::PendingDependency,
                ErrorClass::ConflictExhausted => ConditionType::ConflictExhausted,
                ErrorClass::Transient | ErrorClass::Unrecoverable => ConditionType::ReconcileError,
            };
            push_condition(
                status,
                Condition::new(condition_type, true, reason, message, generation),
            );
        }
        PassOutcome::Applied(_) if status.phase == TopologyPhase::Invalid => {}
        PassOutcome::Applied(_) => {
            for condition_type in [
                ConditionType::InvalidSpec,
                ConditionType::PendingDependency,
                ConditionType::ConflictExhausted,
                ConditionType::ReconcileError,
            ] {
                clear_condition(status, condition_type, "Resolved", "Pass succeeded", generation);
            }
        }
    }
}

fn record_phase_conditions(
    status: &mut TopologyStatus,
    readiness: Option<&Readiness>,
    health: Option<&HealthSignal>,
    generation: Option<i64>,
) {
    let replicas = readiness.map(Readiness::summary).unwrap_or_default();
    let phase = status.phase;

    match phase {
        TopologyPhase::Ready => {
            push_condition(
                status,
                Condition::ready(true, "AllReplicasReady", "All replicas are ready", generation),
            );
            clear_condition(status, ConditionType::Progressing, "Complete", "All replicas are ready", generation);
            clear_condition(status, ConditionType::Degraded, "Recovered", "All replicas are ready", generation);
        }
        TopologyPhase::Creating => {
            push_condition(
                status,
                Condition::ready(false, "Creating", &replicas, generation),
            );
            push_condition(
                status,
                Condition::progressing(true, "WaitingForReplicas", &replicas, generation),
            );
        }
        TopologyPhase::Degraded => {
            let (reason, message) = match health {
                Some(signal) if !signal.is_healthy() => {
                    ("HealthSignalFailing", signal.summary())
                }
                _ => ("ReplicasNotReady", replicas),
            };
            push_condition(status, Condition::ready(false, "Degraded", &message, generation));
            push_condition(status, Condition::degraded(true, reason, &message, generation));
        }
        TopologyPhase::Pending | TopologyPhase::Failed | TopologyPhase::Invalid => {
            let message = format!("Phase: {phase}");
            push_condition(
                status,
                Condition::ready(false, &phase.to_string(), &message, generation),
            );
        }
    }
}
