//! Multi-pass lifecycles per topology kind.

use redis_operator::apply::{ApplyOutcome, ChildStore, MAX_APPLY_ATTEMPTS};
use redis_operator::controller::common::sweep_children;
use redis_operator::controller::{Error, ErrorClass, TopologyKind};
use redis_operator::crd::{
    ConditionType, EmbeddedRedisSpec, MasterReplicaRef, RedisCluster, RedisClusterSpec,
    RedisInstance, RedisInstanceSpec, RedisSentinel, RedisSentinelSpec, TopologyPhase,
    TopologyStatus,
};
use redis_operator::resources::{ChildKey, ChildKind};
use redis_operator::sentinel::SENTINEL_CONF_KEY;
use redis_operator::signals::HealthSignal;

use crate::harness::{BrokenStore, DEADLINE, Harness, NAMESPACE, bump_generation, persisted};

fn condition_status(status: &TopologyStatus, condition_type: ConditionType) -> Option<String> {
    status.latest(condition_type).map(|c| c.status.clone())
}

// ============================================================================
// RedisCluster
// ============================================================================

#[tokio::test]
async fn test_cluster_three_by_one() {
    let mut harness = Harness::new(persisted(
        RedisCluster::new("catalog", RedisClusterSpec::default()),
        "uid-catalog",
    ));

    let report = harness.pass().await;
    report.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);
    assert_eq!(harness.replicas_of("catalog-master"), 3);
    assert_eq!(harness.replicas_of("catalog-replica"), 3);

    let ranges: Vec<(i32, i32, i32)> = harness
        .status()
        .slot_assignment
        .iter()
        .map(|r| (r.ordinal, r.start, r.end))
        .collect();
    assert_eq!(
        ranges,
        vec![(0, 0, 5461), (1, 5462, 10922), (2, 10923, 16383)]
    );
    assert_eq!(
        harness.status().master_service.as_deref(),
        Some("catalog-master.default.svc")
    );

    let cm = harness
        .store
        .object(&ChildKey::new(ChildKind::ConfigMap, NAMESPACE, "catalog-cluster-config"))
        .unwrap();
    let conf = cm["data"]["redis.conf"].as_str().unwrap();
    assert!(conf.contains("cluster-enabled yes"));

    harness.store.mark_all_ready();
    let report = harness.pass().await;
    assert_eq!(report.result.unwrap().writes(), 0);
    assert_eq!(harness.phase(), TopologyPhase::Ready);
    assert_eq!(harness.status().ready_replicas.values().sum::<i32>(), 6);
    assert_eq!(
        condition_status(harness.status(), ConditionType::Ready).as_deref(),
        Some("True")
    );
}

#[tokio::test]
async fn test_cluster_scale_out_reassigns_slots() {
    let mut harness = Harness::new(persisted(
        RedisCluster::new("catalog", RedisClusterSpec::default()),
        "uid-catalog",
    ));
    harness.pass().await.result.unwrap();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);

    harness.obj.spec.masters = 4;
    bump_generation(&mut harness.obj);
    harness.pass().await.result.unwrap();

    // New pods are not ready yet
    assert_eq!(harness.phase(), TopologyPhase::Degraded);
    assert_eq!(harness.status().slot_assignment.len(), 4);
    let moved = harness.status().latest(ConditionType::SlotsReassigned).unwrap();
    assert_eq!(moved.status, "True");
    assert!(moved.message.contains("slots change owner"));

    let conditions_before = harness.status().conditions.len();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);
    // The recorded assignment already matches; the reassignment settles
    let reassigned = harness
        .status()
        .conditions
        .iter()
        .filter(|c| c.r#type == "SlotsReassigned")
        .count();
    assert_eq!(reassigned, 2);
    assert_eq!(
        condition_status(harness.status(), ConditionType::SlotsReassigned).as_deref(),
        Some("False")
    );

    // Settled stays settled
    harness.pass().await.result.unwrap();
    assert_eq!(
        harness
            .status()
            .conditions
            .iter()
            .filter(|c| c.r#type == "SlotsReassigned")
            .count(),
        2
    );
    assert!(harness.status().conditions.len() >= conditions_before);
}

#[tokio::test]
async fn test_cluster_invalid_spec_waits_for_new_generation() {
    let spec = RedisClusterSpec {
        masters: 0,
        ..Default::default()
    };
    let mut harness = Harness::new(persisted(RedisCluster::new("catalog", spec), "uid-catalog"));

    let report = harness.pass().await;
    assert_eq!(report.error().map(Error::class), Some(ErrorClass::InvalidSpec));
    assert_eq!(harness.phase(), TopologyPhase::Invalid);
    assert!(harness.store.keys().is_empty());
    assert_eq!(
        condition_status(harness.status(), ConditionType::InvalidSpec).as_deref(),
        Some("True")
    );

    // Same generation: stays Invalid
    harness.pass().await;
    assert_eq!(harness.phase(), TopologyPhase::Invalid);

    harness.obj.spec.masters = 3;
    bump_generation(&mut harness.obj);
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);
    assert_eq!(
        condition_status(harness.status(), ConditionType::InvalidSpec).as_deref(),
        Some("False")
    );
}

#[tokio::test]
async fn test_cluster_state_fail_degrades() {
    let mut harness = Harness::new(persisted(
        RedisCluster::new("catalog", RedisClusterSpec::default()),
        "uid-catalog",
    ));
    harness.pass().await.result.unwrap();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);

    harness.signals.insert(
        NAMESPACE,
        "catalog",
        HealthSignal {
            up: 6,
            down: 0,
            cluster_state_ok: Some(false),
        },
    );
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Degraded);
    let degraded = harness.status().latest(ConditionType::Degraded).unwrap();
    assert_eq!(degraded.reason, "HealthSignalFailing");

    harness.signals.clear();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);
}

// ============================================================================
// RedisInstance
// ============================================================================

#[tokio::test]
async fn test_instance_lost_replica_degrades_and_recovers() {
    let mut harness = Harness::new(persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-sessions",
    ));
    harness.pass().await.result.unwrap();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);

    let sts = ChildKey::new(ChildKind::StatefulSet, NAMESPACE, "sessions");
    harness.store.set_ready_replicas(&sts, 0);
    let report = harness.pass().await;
    assert_eq!(harness.phase(), TopologyPhase::Degraded);
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].from, TopologyPhase::Ready);

    harness.store.set_ready_replicas(&sts, 1);
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);
}

#[tokio::test]
async fn test_steady_state_status_is_stable() {
    let mut harness = Harness::new(persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-sessions",
    ));
    harness.pass().await.result.unwrap();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();

    let before = serde_json::to_value(harness.status()).unwrap();
    let report = harness.pass().await;
    assert!(report.changes.is_empty());
    assert_eq!(serde_json::to_value(harness.status()).unwrap(), before);
}

#[tokio::test]
async fn test_name_taken_by_other_parent_stays_invalid_until_new_generation() {
    let mut harness = Harness::new(persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-sessions",
    ));
    let squatter = persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-squatter",
    );
    redis_operator::apply::apply(&harness.store, &squatter.synthesize(&()).unwrap(), &[])
        .await
        .unwrap();

    let report = harness.pass().await;
    assert_eq!(report.error().map(Error::class), Some(ErrorClass::InvalidSpec));
    assert_eq!(harness.phase(), TopologyPhase::Invalid);

    // The name frees up, but the rejected generation is not retried
    sweep_children(&harness.store, NAMESPACE, "uid-squatter")
        .await
        .unwrap();
    let before = serde_json::to_value(harness.status()).unwrap();
    let report = harness.pass().await;
    assert_eq!(report.error().map(Error::class), Some(ErrorClass::InvalidSpec));
    assert!(report.changes.is_empty());
    assert_eq!(harness.phase(), TopologyPhase::Invalid);
    assert_eq!(
        condition_status(harness.status(), ConditionType::InvalidSpec).as_deref(),
        Some("True")
    );
    assert_eq!(serde_json::to_value(harness.status()).unwrap(), before);
    assert!(harness.store.keys().is_empty());

    bump_generation(&mut harness.obj);
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);
    assert_eq!(
        condition_status(harness.status(), ConditionType::InvalidSpec).as_deref(),
        Some("False")
    );
    assert_eq!(harness.store.keys().len(), 2);
}

// ============================================================================
// Failures
// ============================================================================

fn sessions() -> Harness<RedisInstance> {
    Harness::new(persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-sessions",
    ))
}

#[tokio::test]
async fn test_conflict_exhaustion_before_serving_fails() {
    let mut harness = sessions();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);

    let sts = ChildKey::new(ChildKind::StatefulSet, NAMESPACE, "sessions");
    harness.obj.spec.labels.insert("team".into(), "payments".into());
    harness.store.inject_conflicts(&sts, MAX_APPLY_ATTEMPTS);
    let report = harness.pass().await;
    assert_eq!(
        report.error().map(Error::class),
        Some(ErrorClass::ConflictExhausted)
    );
    assert_eq!(harness.phase(), TopologyPhase::Failed);
    assert_eq!(
        condition_status(harness.status(), ConditionType::ConflictExhausted).as_deref(),
        Some("True")
    );

    // Writes go through again: back to creating
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);
}

#[tokio::test]
async fn test_conflict_exhaustion_while_serving_degrades() {
    let mut harness = sessions();
    harness.pass().await.result.unwrap();
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);

    let sts = ChildKey::new(ChildKind::StatefulSet, NAMESPACE, "sessions");
    harness.obj.spec.labels.insert("team".into(), "payments".into());
    harness.store.inject_conflicts(&sts, MAX_APPLY_ATTEMPTS);
    let report = harness.pass().await;
    assert_eq!(
        report.error().map(Error::class),
        Some(ErrorClass::ConflictExhausted)
    );
    assert_eq!(harness.phase(), TopologyPhase::Degraded);

    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);
}

#[tokio::test]
async fn test_rejected_request_fails_topology() {
    let mut harness = sessions();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);

    let report = harness.pass_with(&BrokenStore::Rejecting).await;
    assert_eq!(
        report.error().map(Error::class),
        Some(ErrorClass::Unrecoverable)
    );
    assert_eq!(harness.phase(), TopologyPhase::Failed);
    assert_eq!(
        condition_status(harness.status(), ConditionType::ReconcileError).as_deref(),
        Some("True")
    );
    assert_eq!(report.changes.len(), 1);
    assert_eq!(report.changes[0].to, TopologyPhase::Failed);
}

#[tokio::test(start_paused = true)]
async fn test_stalled_pass_hits_deadline_and_keeps_phase() {
    let mut harness = sessions();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);

    let started = tokio::time::Instant::now();
    let report = harness.pass_with(&BrokenStore::Stalled).await;
    assert!(started.elapsed() >= DEADLINE);
    assert!(matches!(report.error(), Some(Error::DeadlineExceeded(d)) if *d == DEADLINE));
    assert_eq!(
        report.error().map(Error::class),
        Some(ErrorClass::Transient)
    );
    assert!(report.changes.is_empty());
    assert_eq!(harness.phase(), TopologyPhase::Creating);
    let condition = harness.status().latest(ConditionType::ReconcileError).unwrap();
    assert_eq!(condition.reason, "DeadlineExceeded");

    // Nothing was lost: the next pass resumes against the real store
    harness.store.mark_all_ready();
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Ready);
}

// ============================================================================
// RedisSentinel
// ============================================================================

fn referencing_sentinel() -> RedisSentinel {
    let spec = RedisSentinelSpec {
        master_replica_ref: Some(MasterReplicaRef {
            name: "orders".to_string(),
        }),
        ..Default::default()
    };
    persisted(RedisSentinel::new("ha", spec), "uid-ha")
}

#[tokio::test]
async fn test_sentinel_waits_for_master_replica() {
    let mut harness = Harness::new(referencing_sentinel());

    let report = harness.pass().await;
    assert_eq!(
        report.error().map(Error::class),
        Some(ErrorClass::PendingDependency)
    );
    assert_eq!(harness.phase(), TopologyPhase::Pending);
    assert!(harness.store.keys().is_empty());
    assert_eq!(
        condition_status(harness.status(), ConditionType::PendingDependency).as_deref(),
        Some("True")
    );

    // Exists but not Ready yet
    harness.lookup.set("orders", TopologyPhase::Creating, None);
    harness.pass().await;
    assert_eq!(harness.phase(), TopologyPhase::Pending);

    harness.lookup.set(
        "orders",
        TopologyPhase::Ready,
        Some("orders-master.default.svc"),
    );
    harness.pass().await.result.unwrap();
    assert_eq!(harness.phase(), TopologyPhase::Creating);
    assert_eq!(
        condition_status(harness.status(), ConditionType::PendingDependency).as_deref(),
        Some("False")
    );
    assert_eq!(
        harness.status().master_service.as_deref(),
        Some("orders-master.default.svc")
    );

    let cm = harness
        .store
        .object(&ChildKey::new(ChildKind::ConfigMap, NAMESPACE, "ha-sentinel-config"))
        .unwrap();
    let conf = cm["data"][SENTINEL_CONF_KEY].as_str().unwrap();
    assert!(conf.contains("sentinel monitor mymaster orders-master.default.svc 6379 2"));
    assert_eq!(harness.replicas_of("ha-sentinel"), 3);
}

#[tokio::test]
async fn test_sentinel_config_change_flags_restart() {
    let mut harness = Harness::new(referencing_sentinel());
    harness.lookup.set(
        "orders",
        TopologyPhase::Ready,
        Some("orders-master.default.svc"),
    );
    harness.pass().await.result.unwrap();
    assert!(
        harness
            .status()
            .latest(ConditionType::ConfigPendingRestart)
            .is_none()
    );

    harness.obj.spec.config.down_after_ms = 5_000;
    bump_generation(&mut harness.obj);
    let report = harness.pass().await;
    let cm = ChildKey::new(ChildKind::ConfigMap, NAMESPACE, "ha-sentinel-config");
    assert!(matches!(
        report.result.unwrap().outcome(&cm),
        Some(ApplyOutcome::Patched { .. })
    ));
    assert_eq!(
        condition_status(harness.status(), ConditionType::ConfigPendingRestart).as_deref(),
        Some("True")
    );
}

#[tokio::test]
async fn test_sentinel_switch_to_reference_prunes_embedded_redis() {
    let spec = RedisSentinelSpec {
        redis: Some(EmbeddedRedisSpec::default()),
        ..Default::default()
    };
    let mut harness = Harness::new(persisted(RedisSentinel::new("ha", spec), "uid-ha"));
    harness.pass().await.result.unwrap();
    assert_eq!(
        harness.status().master_service.as_deref(),
        Some("ha-master.default.svc")
    );
    assert!(
        harness
            .store
            .object(&ChildKey::new(ChildKind::StatefulSet, NAMESPACE, "ha-master"))
            .is_some()
    );

    harness.lookup.set(
        "orders",
        TopologyPhase::Ready,
        Some("orders-master.default.svc"),
    );
    harness.obj.spec.redis = None;
    harness.obj.spec.master_replica_ref = Some(MasterReplicaRef {
        name: "orders".to_string(),
    });
    bump_generation(&mut harness.obj);
    let applied = harness.pass().await.result.unwrap();

    let deleted: Vec<String> = applied
        .children
        .iter()
        .filter(|c| c.outcome == ApplyOutcome::Deleted)
        .map(|c| c.key.name.clone())
        .collect();
    assert!(deleted.contains(&"ha-master".to_string()));
    assert!(deleted.contains(&"ha-replica".to_string()));
    assert!(deleted.contains(&"ha-replica-config".to_string()));

    let remaining: Vec<String> = harness.store.keys().into_iter().map(|k| k.name).collect();
    assert!(remaining.iter().all(|n| n.starts_with("ha-sentinel")));
}

#[tokio::test]
async fn test_sentinel_both_targets_is_invalid() {
    let spec = RedisSentinelSpec {
        redis: Some(EmbeddedRedisSpec::default()),
        master_replica_ref: Some(MasterReplicaRef {
            name: "orders".to_string(),
        }),
        ..Default::default()
    };
    let mut harness = Harness::new(persisted(RedisSentinel::new("ha", spec), "uid-ha"));
    let report = harness.pass().await;
    assert!(matches!(report.error(), Some(Error::InvalidSpec(_))));
    assert_eq!(harness.phase(), TopologyPhase::Invalid);
}

// ============================================================================
// Deletion
// ============================================================================

#[tokio::test]
async fn test_deletion_sweeps_only_own_children() {
    let mut first = Harness::new(persisted(
        RedisCluster::new("catalog", RedisClusterSpec::default()),
        "uid-catalog",
    ));
    first.pass().await.result.unwrap();

    // A second object sharing the same store
    let other = persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-sessions",
    );
    let other_set = other.synthesize(&()).unwrap();
    redis_operator::apply::apply(&first.store, &other_set, &[])
        .await
        .unwrap();

    let deleted = sweep_children(&first.store, NAMESPACE, "uid-catalog")
        .await
        .unwrap();
    assert_eq!(deleted, 5);
    assert!(
        first
            .store
            .list_all_owned(NAMESPACE, "uid-catalog")
            .await
            .unwrap()
            .is_empty()
    );
    assert_eq!(
        first
            .store
            .list_all_owned(NAMESPACE, "uid-sessions")
            .await
            .unwrap()
            .len(),
        2
    );
}
