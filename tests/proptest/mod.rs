// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Property-based tests for redis-operator.
//!
//! Uses proptest to generate random inputs and verify invariants.

use proptest::prelude::*;

use redis_operator::controller::TopologyKind;
use redis_operator::controller::state_machine::{TopologyEvent, TopologyStateMachine};
use redis_operator::controller::topology::ClusterExtra;
use redis_operator::crd::{
    EmbeddedRedisSpec, RedisCluster, RedisClusterSpec, RedisSentinelSpec, SentinelConfigSpec,
    TopologyPhase,
};
use redis_operator::sentinel::validate;
use redis_operator::slots::{MigrationPlan, SlotAssignment, TOTAL_SLOTS};

fn any_phase() -> impl Strategy<Value = TopologyPhase> {
    prop_oneof![
        Just(TopologyPhase::Pending),
        Just(TopologyPhase::Creating),
        Just(TopologyPhase::Ready),
        Just(TopologyPhase::Degraded),
        Just(TopologyPhase::Failed),
        Just(TopologyPhase::Invalid),
    ]
}

fn any_event() -> impl Strategy<Value = TopologyEvent> {
    prop_oneof![
        Just(TopologyEvent::SpecRejected),
        Just(TopologyEvent::DependencyPending),
        Just(TopologyEvent::ResourcesApplied),
        Just(TopologyEvent::AllReplicasReady),
        Just(TopologyEvent::ReplicasDegraded),
        Just(TopologyEvent::ConflictExhausted),
        Just(TopologyEvent::Unrecoverable),
        Just(TopologyEvent::GenerationChanged),
    ]
}

proptest! {
    /// Property: every slot has exactly one owner, ranges are contiguous
    /// and ordered by ordinal.
    #[test]
    fn test_slot_assignment_covers_all_slots(masters in 1u16..=512) {
        let assignment = SlotAssignment::for_masters(masters);
        prop_assert!(assignment.is_full_coverage());
        prop_assert_eq!(assignment.covered_slots(), u32::from(TOTAL_SLOTS));
        prop_assert_eq!(assignment.ranges().len(), usize::from(masters));

        let mut next = 0u32;
        for range in assignment.ranges() {
            prop_assert_eq!(u32::from(range.start), next);
            next = u32::from(range.end) + 1;
        }
        prop_assert_eq!(next, u32::from(TOTAL_SLOTS));
    }

    /// Property: shares differ by at most one slot.
    #[test]
    fn test_slot_assignment_is_balanced(masters in 1u16..=512) {
        let assignment = SlotAssignment::for_masters(masters);
        let counts: Vec<u16> = assignment.ranges().iter().map(|r| r.count()).collect();
        let min = counts.iter().min().copied().unwrap();
        let max = counts.iter().max().copied().unwrap();
        prop_assert!(max - min <= 1);
    }

    /// Property: a plan only names slots whose owner actually changes, and
    /// the recorded assignment round-trips through status.
    #[test]
    fn test_migration_plan_moves_only_changed_slots(
        before in 1u16..=64,
        after in 1u16..=64,
        slot in 0u16..TOTAL_SLOTS
    ) {
        let previous = SlotAssignment::for_masters(before);
        let next = SlotAssignment::for_masters(after);
        prop_assert_eq!(SlotAssignment::from_status(&previous.to_status()), Some(previous.clone()));

        let plan = MigrationPlan::between(&previous, &next);
        let moved = plan.moves.iter().any(|m| m.start <= slot && slot <= m.end);
        prop_assert_eq!(moved, previous.owner(slot) != next.owner(slot));
    }

    /// Property: cluster synthesis is a pure function of spec and extras.
    #[test]
    fn test_cluster_synthesis_deterministic(masters in 1i32..=12, replicas in 0i32..=3) {
        let spec = RedisClusterSpec {
            masters,
            replicas_per_master: replicas,
            ..Default::default()
        };
        let mut cluster = RedisCluster::new("catalog", spec);
        cluster.metadata.namespace = Some("default".to_string());
        cluster.metadata.uid = Some("uid-catalog".to_string());
        let extra = ClusterExtra {
            assignment: SlotAssignment::for_masters(u16::try_from(masters).unwrap()),
            plan: MigrationPlan::default(),
        };

        let render = || -> Vec<String> {
            cluster
                .synthesize(&extra)
                .unwrap()
                .iter()
                .map(|c| serde_json::to_string(&c.manifest).unwrap())
                .collect()
        };
        prop_assert_eq!(render(), render());
    }

    /// Property: a quorum above the sentinel count is always rejected,
    /// and any quorum within it is accepted.
    #[test]
    fn test_sentinel_quorum_bound(replicas in 1i32..=9, quorum in 1i32..=12) {
        let spec = RedisSentinelSpec {
            replicas,
            config: SentinelConfigSpec {
                quorum,
                ..Default::default()
            },
            redis: Some(EmbeddedRedisSpec::default()),
            ..Default::default()
        };
        prop_assert_eq!(validate("ha", &spec).is_ok(), quorum <= replicas);
    }

    /// Property: transition checks are deterministic.
    #[test]
    fn test_state_transitions_deterministic(phase in any_phase(), event in any_event()) {
        let sm = TopologyStateMachine::new();
        prop_assert_eq!(sm.can_transition(&phase, &event), sm.can_transition(&phase, &event));
    }

    /// Property: Invalid is only left through a new generation.
    #[test]
    fn test_invalid_left_only_by_generation(event in any_event()) {
        let sm = TopologyStateMachine::new();
        let allowed = sm.can_transition(&TopologyPhase::Invalid, &event);
        prop_assert_eq!(allowed, event == TopologyEvent::GenerationChanged);
    }

    /// Property: every live phase accepts a spec rejection.
    #[test]
    fn test_rejection_from_live_phases(phase in any_phase()) {
        prop_assume!(phase != TopologyPhase::Invalid);
        let sm = TopologyStateMachine::new();
        prop_assert!(sm.can_transition(&phase, &TopologyEvent::SpecRejected));
    }
}
