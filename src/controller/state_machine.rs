//! Formal finite state machine for topology lifecycle management.
//!
//! This module implements an FSM with explicit state transitions and guards.
//! Only transitions in the table can happen, and every transition carries a
//! description for the audit trail in status conditions.

use std::fmt;

use crate::controller::error::ErrorClass;
use crate::crd::TopologyPhase;

/// Events that trigger state transitions in the topology lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TopologyEvent {
    /// The spec was rejected during synthesis or validation
    SpecRejected,
    /// A referenced object is absent or not ready
    DependencyPending,
    /// Child resources have been applied
    ResourcesApplied,
    /// Every role has its requested ready replicas and health is good
    AllReplicasReady,
    /// Replicas dropped or the health signal reports a problem
    ReplicasDegraded,
    /// A child write conflicted past the retry ceiling
    ConflictExhausted,
    /// An error that retrying cannot fix
    Unrecoverable,
    /// The spec generation moved past the last observed one
    GenerationChanged,
}

impl fmt::Display for TopologyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TopologyEvent::SpecRejected => write!(f, "SpecRejected"),
            TopologyEvent::DependencyPending => write!(f, "DependencyPending"),
            TopologyEvent::ResourcesApplied => write!(f, "ResourcesApplied"),
            TopologyEvent::AllReplicasReady => write!(f, "AllReplicasReady"),
            TopologyEvent::ReplicasDegraded => write!(f, "ReplicasDegraded"),
            TopologyEvent::ConflictExhausted => write!(f, "ConflictExhausted"),
            TopologyEvent::Unrecoverable => write!(f, "Unrecoverable"),
            TopologyEvent::GenerationChanged => write!(f, "GenerationChanged"),
        }
    }
}

/// Context information available during state transitions
#[derive(Debug, Clone)]
pub struct TransitionContext {
    /// Ready replicas summed over all roles
    pub ready_replicas: i32,
    /// Desired replicas summed over all roles
    pub desired_replicas: i32,
    /// External health signal; `None` when no signal is available
    pub healthy: Option<bool>,
    /// Whether the spec changed since the last observed generation
    pub generation_changed: bool,
    /// Class of the pass's error, if it failed
    pub failure: Option<ErrorClass>,
}

impl TransitionContext {
    /// Create a new transition context
    pub fn new(ready_replicas: i32, desired_replicas: i32) -> Self {
        Self {
            ready_replicas,
            desired_replicas,
            healthy: None,
            generation_changed: false,
            failure: None,
        }
    }

    /// Check if all replicas are ready
    pub fn all_replicas_ready(&self) -> bool {
        self.ready_replicas >= self.desired_replicas
    }

    /// All replicas ready and no unhealthy signal
    pub fn is_serving_fully(&self) -> bool {
        self.all_replicas_ready() && self.healthy != Some(false)
    }

    pub fn with_health(mut self, healthy: Option<bool>) -> Self {
        self.healthy = healthy;
        self
    }

    pub fn with_generation_changed(mut self, changed: bool) -> Self {
        self.generation_changed = changed;
        self
    }

    pub fn with_failure(mut self, failure: Option<ErrorClass>) -> Self {
        self.failure = failure;
        self
    }
}

/// A state transition definition
#[derive(Debug)]
pub struct Transition {
    /// Source state
    pub from: TopologyPhase,
    /// Target state
    pub to: TopologyPhase,
    /// Event that triggers this transition
    pub event: TopologyEvent,
    /// Human-readable description of this transition
    pub description: &'static str,
}

impl Transition {
    const fn new(
        from: TopologyPhase,
        to: TopologyPhase,
        event: TopologyEvent,
        description: &'static str,
    ) -> Self {
        Self {
            from,
            to,
            event,
            description,
        }
    }
}

/// Result of attempting a state transition
#[derive(Debug)]
pub enum TransitionResult {
    /// Transition was successful
    Success {
        from: TopologyPhase,
        to: TopologyPhase,
        event: TopologyEvent,
        description: &'static str,
    },
    /// Transition was not valid for current state
    InvalidTransition {
        current: TopologyPhase,
        event: TopologyEvent,
    },
    /// Guard condition prevented the transition
    GuardFailed {
        from: TopologyPhase,
        to: TopologyPhase,
        event: TopologyEvent,
        reason: String,
    },
}

/// Formal state machine for the topology lifecycle
pub struct TopologyStateMachine {
    transitions: Vec<Transition>,
}

impl Default for TopologyStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl TopologyStateMachine {
    /// Create a new state machine with the defined transition table
    pub fn new() -> Self {
        use TopologyEvent as E;
        use TopologyPhase as P;

        let mut transitions = vec![
            // === Pending ===
            Transition::new(P::Pending, P::Creating, E::ResourcesApplied, "Child resources applied"),
            Transition::new(P::Pending, P::Pending, E::DependencyPending, "Waiting for a referenced object"),
            Transition::new(P::Pending, P::Failed, E::ConflictExhausted, "Writes kept conflicting before the topology was serving"),
            // === Creating ===
            Transition::new(P::Creating, P::Ready, E::AllReplicasReady, "All replicas are ready"),
            Transition::new(P::Creating, P::Failed, E::ConflictExhausted, "Writes kept conflicting before the topology was serving"),
            // === Ready ===
            Transition::new(P::Ready, P::Degraded, E::ReplicasDegraded, "Replicas lost or health signal failing"),
            Transition::new(P::Ready, P::Degraded, E::ConflictExhausted, "Writes kept conflicting while serving"),
            // === Degraded ===
            Transition::new(P::Degraded, P::Ready, E::AllReplicasReady, "Recovered from degraded state"),
            // === Failed ===
            Transition::new(P::Failed, P::Creating, E::ResourcesApplied, "Recovered; child resources applied"),
            Transition::new(P::Failed, P::Pending, E::DependencyPending, "Recovered; waiting for a referenced object"),
            Transition::new(P::Failed, P::Pending, E::GenerationChanged, "Spec changed, retrying"),
            // === Invalid: left only through a new generation ===
            Transition::new(P::Invalid, P::Pending, E::GenerationChanged, "Spec changed, re-validating"),
        ];

        // Rejection and unrecoverable failures apply from every live phase
        for from in [P::Pending, P::Creating, P::Ready, P::Degraded, P::Failed] {
            transitions.push(Transition::new(from, P::Invalid, E::SpecRejected, "Spec rejected"));
        }
        for from in [P::Pending, P::Creating, P::Ready, P::Degraded] {
            transitions.push(Transition::new(from, P::Failed, E::Unrecoverable, "Reconciliation cannot proceed"));
        }

        Self { transitions }
    }

    /// Attempt to transition to a new state based on an event
    pub fn transition(
        &self,
        current: &TopologyPhase,
        event: TopologyEvent,
        ctx: &TransitionContext,
    ) -> TransitionResult {
        let transition = self
            .transitions
            .iter()
            .find(|t| t.from == *current && t.event == event);

        match transition {
            Some(t) => {
                if let Some(reason) = self.check_guard(t, ctx) {
                    TransitionResult::GuardFailed {
                        from: t.from,
                        to: t.to,
                        event,
                        reason,
                    }
                } else {
                    TransitionResult::Success {
                        from: t.from,
                        to: t.to,
                        event,
                        description: t.description,
                    }
                }
            }
            None => TransitionResult::InvalidTransition {
                current: *current,
                event,
            },
        }
    }

    /// Check if a transition is valid (ignoring guards)
    pub fn can_transition(&self, from: &TopologyPhase, event: &TopologyEvent) -> bool {
        self.transitions
            .iter()
            .any(|t| t.from == *from && t.event == *event)
    }

    /// Get all valid events for a given state
    pub fn valid_events(&self, state: &TopologyPhase) -> Vec<&TopologyEvent> {
        self.transitions
            .iter()
            .filter(|t| t.from == *state)
            .map(|t| &t.event)
            .collect()
    }

    fn check_guard(&self, transition: &Transition, ctx: &TransitionContext) -> Option<String> {
        match (&transition.to, &transition.event) {
            (TopologyPhase::Ready, TopologyEvent::AllReplicasReady) if !ctx.is_serving_fully() => {
                Some(format!(
                    "Not fully serving: {}/{} replicas ready, healthy={:?}",
                    ctx.ready_replicas, ctx.desired_replicas, ctx.healthy
                ))
            }
            (TopologyPhase::Degraded, TopologyEvent::ReplicasDegraded) if ctx.is_serving_fully() => {
                Some(format!(
                    "Not degraded: {}/{} replicas ready",
                    ctx.ready_replicas, ctx.desired_replicas
                ))
            }
            _ => None,
        }
    }

    /// Run events to a fixed point. Returns the final phase and each
    /// successful transition in order.
    pub fn advance(
        &self,
        current: TopologyPhase,
        ctx: &TransitionContext,
    ) -> (TopologyPhase, Vec<(TopologyPhase, TopologyPhase, TopologyEvent, &'static str)>) {
        let mut phase = current;
        let mut applied = Vec::new();
        let mut ctx = ctx.clone();
        // Longest chain: Invalid -> Pending -> Creating -> Ready
        for _ in 0..4 {
            let Some(event) = determine_event(&phase, &ctx) else {
                break;
            };
            // A new generation is observed once per pass
            if event == TopologyEvent::GenerationChanged {
                ctx.generation_changed = false;
            }
            match self.transition(&phase, event, &ctx) {
                TransitionResult::Success {
                    from,
                    to,
                    event,
                    description,
                } => {
                    applied.push((from, to, event, description));
                    if from == to {
                        break;
                    }
                    phase = to;
                }
                TransitionResult::InvalidTransition { .. }
                | TransitionResult::GuardFailed { .. } => break,
            }
        }
        // A round trip back to the starting phase is no change
        if phase == current && applied.iter().any(|(from, to, _, _)| from != to) {
            applied.clear();
        }
        (phase, applied)
    }
}

/// Determine the event a pass produces in the current phase, if any
pub fn determine_event(current: &TopologyPhase, ctx: &TransitionContext) -> Option<TopologyEvent> {
    if ctx.generation_changed && matches!(current, TopologyPhase::Invalid | TopologyPhase::Failed) {
        return Some(TopologyEvent::GenerationChanged);
    }

    match ctx.failure {
        Some(ErrorClass::InvalidSpec) => return Some(TopologyEvent::SpecRejected),
        Some(ErrorClass::PendingDependency) => return Some(TopologyEvent::DependencyPending),
        Some(ErrorClass::ConflictExhausted) => return Some(TopologyEvent::ConflictExhausted),
        Some(ErrorClass::Unrecoverable) => return Some(TopologyEvent::Unrecoverable),
        // Transient failures leave the phase alone
        Some(ErrorClass::Transient) => return None,
        None => {}
    }

    match current {
        TopologyPhase::Pending | TopologyPhase::Failed => Some(TopologyEvent::ResourcesApplied),
        TopologyPhase::Invalid => None,
        _ if ctx.is_serving_fully() => Some(TopologyEvent::AllReplicasReady),
        TopologyPhase::Ready => Some(TopologyEvent::ReplicasDegraded),
        _ => None,
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_to_creating() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(0, 3);

        let result = sm.transition(&TopologyPhase::Pending, TopologyEvent::ResourcesApplied, &ctx);

        match result {
            TransitionResult::Success { from, to, .. } => {
                assert_eq!(from, TopologyPhase::Pending);
                assert_eq!(to, TopologyPhase::Creating);
            }
            _ => panic!("Expected successful transition"),
        }
    }

    #[test]
    fn test_creating_to_ready_guard() {
        let sm = TopologyStateMachine::new();

        let ctx = TransitionContext::new(0, 3);
        let result = sm.transition(&TopologyPhase::Creating, TopologyEvent::AllReplicasReady, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));

        let ctx = TransitionContext::new(3, 3);
        let result = sm.transition(&TopologyPhase::Creating, TopologyEvent::AllReplicasReady, &ctx);
        assert!(matches!(result, TransitionResult::Success { .. }));

        // Ready pods with a failing health signal are not Ready
        let ctx = TransitionContext::new(3, 3).with_health(Some(false));
        let result = sm.transition(&TopologyPhase::Creating, TopologyEvent::AllReplicasReady, &ctx);
        assert!(matches!(result, TransitionResult::GuardFailed { .. }));
    }

    #[test]
    fn test_invalid_left_only_by_generation_change() {
        let sm = TopologyStateMachine::new();
        let events = sm.valid_events(&TopologyPhase::Invalid);
        assert_eq!(events, vec![&TopologyEvent::GenerationChanged]);
    }

    #[test]
    fn test_rejection_from_any_live_state() {
        let sm = TopologyStateMachine::new();
        for state in [
            TopologyPhase::Pending,
            TopologyPhase::Creating,
            TopologyPhase::Ready,
            TopologyPhase::Degraded,
            TopologyPhase::Failed,
        ] {
            assert!(
                sm.can_transition(&state, &TopologyEvent::SpecRejected),
                "Should be able to reject from {:?}",
                state
            );
        }
    }

    #[test]
    fn test_advance_chains_to_ready() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(6, 6);
        let (phase, steps) = sm.advance(TopologyPhase::Pending, &ctx);
        assert_eq!(phase, TopologyPhase::Ready);
        assert_eq!(steps.len(), 2);

        // Steady state: no transitions
        let (phase, steps) = sm.advance(TopologyPhase::Ready, &ctx);
        assert_eq!(phase, TopologyPhase::Ready);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_advance_stays_creating_until_ready() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(2, 6);
        let (phase, _) = sm.advance(TopologyPhase::Pending, &ctx);
        assert_eq!(phase, TopologyPhase::Creating);
        let (phase, steps) = sm.advance(TopologyPhase::Creating, &ctx);
        assert_eq!(phase, TopologyPhase::Creating);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_ready_degraded_flap() {
        let sm = TopologyStateMachine::new();
        let degraded = TransitionContext::new(5, 6);
        let (phase, _) = sm.advance(TopologyPhase::Ready, &degraded);
        assert_eq!(phase, TopologyPhase::Degraded);

        let healed = TransitionContext::new(6, 6);
        let (phase, _) = sm.advance(TopologyPhase::Degraded, &healed);
        assert_eq!(phase, TopologyPhase::Ready);
    }

    #[test]
    fn test_conflict_exhaustion_depends_on_serving() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(0, 3).with_failure(Some(ErrorClass::ConflictExhausted));
        assert_eq!(sm.advance(TopologyPhase::Creating, &ctx).0, TopologyPhase::Failed);
        assert_eq!(sm.advance(TopologyPhase::Ready, &ctx).0, TopologyPhase::Degraded);
    }

    #[test]
    fn test_invalid_waits_for_generation() {
        let sm = TopologyStateMachine::new();
        let ok = TransitionContext::new(1, 1);
        assert_eq!(sm.advance(TopologyPhase::Invalid, &ok).0, TopologyPhase::Invalid);

        let changed = TransitionContext::new(1, 1).with_generation_changed(true);
        assert_eq!(sm.advance(TopologyPhase::Invalid, &changed).0, TopologyPhase::Ready);

        let rejected_again = TransitionContext::new(0, 1)
            .with_generation_changed(true)
            .with_failure(Some(ErrorClass::InvalidSpec));
        let (phase, steps) = sm.advance(TopologyPhase::Invalid, &rejected_again);
        assert_eq!(phase, TopologyPhase::Invalid);
        assert!(steps.is_empty(), "round trip reported: {steps:?}");
    }

    #[test]
    fn test_failed_rejected_generation_moves_once() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(0, 1)
            .with_generation_changed(true)
            .with_failure(Some(ErrorClass::InvalidSpec));
        let (phase, steps) = sm.advance(TopologyPhase::Failed, &ctx);
        assert_eq!(phase, TopologyPhase::Invalid);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].1, TopologyPhase::Pending);
        assert_eq!(steps[1].1, TopologyPhase::Invalid);
    }

    #[test]
    fn test_transient_keeps_phase() {
        let ctx = TransitionContext::new(0, 3).with_failure(Some(ErrorClass::Transient));
        assert_eq!(determine_event(&TopologyPhase::Ready, &ctx), None);
    }

    #[test]
    fn test_pending_dependency_stays_pending() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(0, 3).with_failure(Some(ErrorClass::PendingDependency));
        let (phase, steps) = sm.advance(TopologyPhase::Pending, &ctx);
        assert_eq!(phase, TopologyPhase::Pending);
        assert_eq!(steps.len(), 1);
    }
}
