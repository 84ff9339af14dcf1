//! Apply engine behavior on synthesized topologies.

use std::collections::BTreeMap;

use futures::future::join_all;
use serde_json::json;

use redis_operator::apply::{ApplyError, ApplyOutcome, ChildStore, MAX_APPLY_ATTEMPTS, apply};
use redis_operator::controller::{Error, TopologyKind};
use redis_operator::crd::{RedisInstance, RedisInstanceSpec, RedisMasterReplica, RedisMasterReplicaSpec};
use redis_operator::resources::{ChildKey, ChildKind, ChildResourceSet};

use crate::harness::{Harness, NAMESPACE, persisted};

fn instance(labels: &[(&str, &str)]) -> RedisInstance {
    let spec = RedisInstanceSpec {
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>(),
        ..Default::default()
    };
    persisted(RedisInstance::new("sessions", spec), "uid-sessions")
}

fn synthesize(obj: &RedisInstance) -> ChildResourceSet {
    obj.synthesize(&()).unwrap()
}

fn sts_key() -> ChildKey {
    ChildKey::new(ChildKind::StatefulSet, NAMESPACE, "sessions")
}

#[tokio::test]
async fn test_second_apply_writes_nothing() {
    let obj = instance(&[]);
    let desired = synthesize(&obj);
    let mut harness = Harness::new(obj);

    let first = harness.pass().await.result.unwrap();
    assert_eq!(first.writes(), 2);
    let after_first = harness.store.write_count();

    let actual = harness
        .store
        .list_all_owned(NAMESPACE, "uid-sessions")
        .await
        .unwrap();
    let second = apply(&harness.store, &desired, &actual).await.unwrap();
    assert_eq!(second.writes(), 0);
    assert!(
        second
            .children
            .iter()
            .all(|c| c.outcome == ApplyOutcome::Unchanged)
    );
    assert_eq!(harness.store.write_count(), after_first);
}

#[tokio::test]
async fn test_server_defaulted_fields_do_not_cause_writes() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    // Fields the API server adds on its own
    assert!(harness.store.external_patch(
        &sts_key(),
        &json!({"spec": {"revisionHistoryLimit": 10, "minReadySeconds": 0}})
    ));
    let writes = harness.store.write_count();

    let applied = harness.pass().await.result.unwrap();
    assert_eq!(applied.writes(), 0);
    assert_eq!(harness.store.write_count(), writes);
}

#[tokio::test]
async fn test_drifted_field_is_restored() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    assert!(
        harness
            .store
            .external_patch(&sts_key(), &json!({"spec": {"replicas": 4}}))
    );
    let applied = harness.pass().await.result.unwrap();
    assert_eq!(
        applied.outcome(&sts_key()),
        Some(ApplyOutcome::Patched { attempts: 1 })
    );
    assert_eq!(harness.replicas_of("sessions"), 1);
}

#[tokio::test]
async fn test_conflicts_retried_within_ceiling() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    harness.obj.spec.labels.insert("team".into(), "payments".into());
    harness
        .store
        .inject_conflicts(&sts_key(), MAX_APPLY_ATTEMPTS - 1);

    let applied = harness.pass().await.result.unwrap();
    assert_eq!(
        applied.outcome(&sts_key()),
        Some(ApplyOutcome::Patched {
            attempts: MAX_APPLY_ATTEMPTS
        })
    );
    assert_eq!(applied.conflict_retries(), MAX_APPLY_ATTEMPTS - 1);
    let live = harness.store.object(&sts_key()).unwrap();
    assert_eq!(live["metadata"]["labels"]["team"], "payments");
}

#[tokio::test]
async fn test_conflicts_exhausted_after_ceiling() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    harness.obj.spec.labels.insert("team".into(), "payments".into());
    harness
        .store
        .inject_conflicts(&sts_key(), MAX_APPLY_ATTEMPTS);

    let report = harness.pass().await;
    match report.error() {
        Some(Error::ConflictExhausted { key, attempts }) => {
            assert_eq!(key, "StatefulSet/default/sessions");
            assert_eq!(*attempts, MAX_APPLY_ATTEMPTS);
        }
        other => panic!("expected ConflictExhausted, got {other:?}"),
    }
}

#[tokio::test]
async fn test_concurrent_label_writers_all_land() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    let writers: Vec<ChildResourceSet> = (0..5)
        .map(|i| {
            let key = format!("writer-{i}");
            synthesize(&instance(&[(key.as_str(), "yes")]))
        })
        .collect();
    let actual = harness
        .store
        .list_all_owned(NAMESPACE, "uid-sessions")
        .await
        .unwrap();

    let results = join_all(
        writers
            .iter()
            .map(|desired| apply(&harness.store, desired, &actual)),
    )
    .await;
    for result in &results {
        assert!(result.is_ok(), "writer failed: {result:?}");
    }

    let live = harness.store.object(&sts_key()).unwrap();
    for i in 0..5 {
        assert_eq!(live["metadata"]["labels"][format!("writer-{i}")], "yes");
    }
    // Nothing lost: the original replica count survives every merge
    assert_eq!(harness.replicas_of("sessions"), 1);
}

#[tokio::test]
async fn test_child_owned_by_other_parent_is_rejected() {
    let mut harness = Harness::new(instance(&[]));
    harness.pass().await.result.unwrap();

    // Same name, different parent uid
    let intruder = persisted(
        RedisInstance::new("sessions", RedisInstanceSpec::default()),
        "uid-other",
    );
    let desired = intruder.synthesize(&()).unwrap();
    let actual = harness
        .store
        .list_all_owned(NAMESPACE, "uid-other")
        .await
        .unwrap();
    assert!(actual.is_empty());

    let result = apply(&harness.store, &desired, &actual).await;
    let err = result.unwrap_err();
    assert!(matches!(err, ApplyError::OwnedElsewhere { .. }));
    assert!(matches!(Error::from(err), Error::InvalidSpec(_)));
}

#[tokio::test]
async fn test_scale_to_zero_replicas_keeps_statefulset() {
    let mut spec = RedisMasterReplicaSpec::default();
    spec.replica.replicas = 2;
    let mut harness = Harness::new(persisted(RedisMasterReplica::new("orders", spec), "uid-orders"));
    harness.pass().await.result.unwrap();
    assert_eq!(harness.replicas_of("orders-replica"), 2);

    harness.obj.spec.replica.replicas = 0;
    let applied = harness.pass().await.result.unwrap();
    assert_eq!(harness.replicas_of("orders-replica"), 0);
    assert!(
        applied
            .children
            .iter()
            .all(|c| c.outcome != ApplyOutcome::Deleted)
    );
}

#[tokio::test]
async fn test_exhausted_child_does_not_hold_back_siblings() {
    let mut harness = Harness::new(persisted(
        RedisMasterReplica::new("orders", RedisMasterReplicaSpec::default()),
        "uid-orders",
    ));
    harness.pass().await.result.unwrap();

    let replica_config = ChildKey::new(ChildKind::ConfigMap, NAMESPACE, "orders-replica-config");
    harness.obj.spec.labels.insert("team".into(), "payments".into());
    harness.obj.spec.replica.replicas = 3;
    harness
        .store
        .inject_conflicts(&replica_config, MAX_APPLY_ATTEMPTS);

    let report = harness.pass().await;
    match report.error() {
        Some(Error::ConflictExhausted { key, .. }) => {
            assert_eq!(key, "ConfigMap/default/orders-replica-config");
        }
        other => panic!("expected ConflictExhausted, got {other:?}"),
    }

    // Every sibling still got its write
    assert_eq!(harness.replicas_of("orders-replica"), 3);
    for (kind, name) in [
        (ChildKind::StatefulSet, "orders-master"),
        (ChildKind::StatefulSet, "orders-replica"),
        (ChildKind::Service, "orders-master"),
        (ChildKind::Service, "orders-replica"),
    ] {
        let live = harness
            .store
            .object(&ChildKey::new(kind, NAMESPACE, name))
            .unwrap();
        assert_eq!(live["metadata"]["labels"]["team"], "payments", "{kind}/{name}");
    }
    let config = harness.store.object(&replica_config).unwrap();
    assert!(config["metadata"]["labels"].get("team").is_none());

    // The next pass finishes the job
    let applied = harness.pass().await.result.unwrap();
    assert_eq!(
        applied.outcome(&replica_config),
        Some(ApplyOutcome::Patched { attempts: 1 })
    );
}
