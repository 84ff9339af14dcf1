// Test code is allowed to panic on failure
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::panic
)]

//! Unit tests for redis-operator.
//!
//! These tests run without a Kubernetes cluster and test individual
//! components through the public API.

mod crd_tests {
    use redis_operator::crd::{Condition, ConditionType, TopologyPhase, TopologyStatus};

    #[test]
    fn test_phase_display() {
        assert_eq!(TopologyPhase::Pending.to_string(), "Pending");
        assert_eq!(TopologyPhase::Ready.to_string(), "Ready");
        assert_eq!(TopologyPhase::Invalid.as_str(), "Invalid");
    }

    #[test]
    fn test_phase_default() {
        assert_eq!(TopologyPhase::default(), TopologyPhase::Pending);
    }

    #[test]
    fn test_condition_ready() {
        let condition = Condition::ready(true, "AllReplicasReady", "All replicas are ready", Some(1));
        assert_eq!(condition.r#type, "Ready");
        assert_eq!(condition.status, "True");
        assert_eq!(condition.reason, "AllReplicasReady");
        assert_eq!(condition.observed_generation, Some(1));
    }

    #[test]
    fn test_status_latest_condition() {
        let status = TopologyStatus {
            conditions: vec![
                Condition::ready(false, "Creating", "0/1 ready", Some(1)),
                Condition::degraded(true, "ReplicasNotReady", "1/2 ready", Some(1)),
                Condition::ready(true, "AllReplicasReady", "2/2 ready", Some(1)),
            ],
            ..Default::default()
        };
        let latest = status.latest(ConditionType::Ready).unwrap();
        assert_eq!(latest.reason, "AllReplicasReady");
        assert!(status.latest(ConditionType::SlotsReassigned).is_none());
    }

    #[test]
    fn test_status_serializes_camel_case() {
        let status = TopologyStatus {
            master_service: Some("orders-master.prod.svc".to_string()),
            observed_generation: Some(3),
            ..Default::default()
        };
        let value = serde_json::to_value(&status).unwrap();
        assert_eq!(value["masterService"], "orders-master.prod.svc");
        assert_eq!(value["observedGeneration"], 3);
        assert_eq!(value["phase"], "Pending");
    }
}

mod state_machine_tests {
    use redis_operator::controller::ErrorClass;
    use redis_operator::controller::state_machine::{TopologyStateMachine, TransitionContext};
    use redis_operator::crd::TopologyPhase;

    #[test]
    fn test_fresh_object_reaches_ready_in_one_pass() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(3, 3);
        let (phase, steps) = sm.advance(TopologyPhase::Pending, &ctx);
        assert_eq!(phase, TopologyPhase::Ready);
        assert_eq!(steps.len(), 2);
    }

    #[test]
    fn test_invalid_waits_for_generation() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(0, 1);
        let (phase, _) = sm.advance(TopologyPhase::Invalid, &ctx);
        assert_eq!(phase, TopologyPhase::Invalid);

        let ctx = TransitionContext::new(0, 1).with_generation_changed(true);
        let (phase, _) = sm.advance(TopologyPhase::Invalid, &ctx);
        assert_eq!(phase, TopologyPhase::Creating);
    }

    #[test]
    fn test_transient_failure_keeps_phase() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(1, 1).with_failure(Some(ErrorClass::Transient));
        let (phase, steps) = sm.advance(TopologyPhase::Ready, &ctx);
        assert_eq!(phase, TopologyPhase::Ready);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_unhealthy_signal_degrades_ready() {
        let sm = TopologyStateMachine::new();
        let ctx = TransitionContext::new(3, 3).with_health(Some(false));
        let (phase, _) = sm.advance(TopologyPhase::Ready, &ctx);
        assert_eq!(phase, TopologyPhase::Degraded);
    }
}

mod backoff_tests {
    use std::time::Duration;

    use redis_operator::controller::ErrorClass;
    use redis_operator::controller::backoff::Backoff;

    #[test]
    fn test_pending_dependency_caps_lower() {
        let backoff = Backoff::new(Duration::from_secs(300));
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            last = backoff.next_delay("RedisSentinel/prod/ha", ErrorClass::PendingDependency);
        }
        assert_eq!(last, Duration::from_secs(30));
    }

    #[test]
    fn test_reset_restarts_sequence() {
        let backoff = Backoff::new(Duration::from_secs(300));
        backoff.next_delay("k", ErrorClass::Transient);
        backoff.next_delay("k", ErrorClass::Transient);
        assert_eq!(backoff.failures("k"), 2);
        backoff.reset("k");
        assert_eq!(backoff.next_delay("k", ErrorClass::Transient), Duration::from_secs(1));
    }
}

mod error_tests {
    use redis_operator::controller::{Error, ErrorClass};

    #[test]
    fn test_classes() {
        assert_eq!(Error::InvalidSpec("x".into()).class(), ErrorClass::InvalidSpec);
        assert_eq!(
            Error::PendingDependency("x".into()).class(),
            ErrorClass::PendingDependency
        );
        assert_eq!(
            Error::ConflictExhausted {
                key: "StatefulSet/default/a".into(),
                attempts: 5
            }
            .class(),
            ErrorClass::ConflictExhausted
        );
        assert_eq!(
            Error::DeadlineExceeded(std::time::Duration::from_secs(30)).class(),
            ErrorClass::Transient
        );
        assert_eq!(Error::MissingField("uid".into()).class(), ErrorClass::Unrecoverable);
    }

    #[test]
    fn test_retryable() {
        assert!(ErrorClass::Transient.is_retryable());
        assert!(ErrorClass::PendingDependency.is_retryable());
        assert!(!ErrorClass::InvalidSpec.is_retryable());
        assert!(!ErrorClass::Unrecoverable.is_retryable());
    }
}

mod signal_tests {
    use redis_operator::signals::{SignalCache, parse_exposition};

    #[test]
    fn test_parse_and_cache() {
        let body = "\
# HELP redis_up Whether the instance answers PING
redis_up{namespace=\"prod\",parent=\"orders\",pod=\"orders-master-0\"} 1
redis_up{namespace=\"prod\",parent=\"orders\",pod=\"orders-replica-0\"} 0
redis_cluster_state{namespace=\"prod\",parent=\"catalog\",pod=\"catalog-master-0\"} 1
";
        let snapshot = parse_exposition(body).unwrap();
        let cache = SignalCache::new();
        cache.replace(snapshot);

        let orders = cache.get("prod", "orders").unwrap();
        assert_eq!((orders.up, orders.down), (1, 1));
        assert!(!orders.is_healthy());
        assert!(cache.get("prod", "catalog").unwrap().is_healthy());
        assert!(cache.get("staging", "orders").is_none());
    }
}

mod sentinel_tests {
    use redis_operator::crd::{MasterReplicaRef, RedisSentinelSpec, SentinelConfigSpec};
    use redis_operator::sentinel::{MonitorTarget, SentinelMonitor, SentinelMonitorSet, validate};

    #[test]
    fn test_render_monitor() {
        let monitors = SentinelMonitorSet::single(SentinelMonitor::new(
            "orders-master.prod.svc",
            &SentinelConfigSpec::default(),
        ));
        let conf = monitors.render(26379);
        assert!(conf.starts_with("port 26379\n"));
        assert!(conf.contains("sentinel monitor mymaster orders-master.prod.svc 6379 2\n"));
        assert!(conf.contains("sentinel down-after-milliseconds mymaster 30000\n"));
    }

    #[test]
    fn test_validate_reference() {
        let spec = RedisSentinelSpec {
            master_replica_ref: Some(MasterReplicaRef {
                name: "orders".to_string(),
            }),
            ..Default::default()
        };
        assert_eq!(
            validate("ha", &spec).unwrap(),
            MonitorTarget::Reference("orders")
        );
    }

    #[test]
    fn test_validate_requires_exactly_one_target() {
        assert!(validate("ha", &RedisSentinelSpec::default()).is_err());
    }
}
