//! Operator configuration from command-line flags and environment.

use std::time::Duration;

use clap::Parser;

/// Command-line configuration of the operator.
#[derive(Parser, Debug, Clone)]
#[command(name = "redis-operator")]
#[command(about = "Kubernetes operator for Redis topologies", long_about = None)]
pub struct OperatorConfig {
    /// Only watch this namespace; watches cluster-wide when unset
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Seconds between resyncs of a Ready object
    #[arg(long, env = "RESYNC_SECS", default_value_t = 60)]
    pub resync_secs: u64,

    /// Seconds before re-checking an object that is not Ready yet
    #[arg(long, env = "NOT_READY_REQUEUE_SECS", default_value_t = 10)]
    pub not_ready_requeue_secs: u64,

    /// Deadline of one reconcile pass, in seconds
    #[arg(long, env = "RECONCILE_TIMEOUT_SECS", default_value_t = 30)]
    pub reconcile_timeout: u64,

    /// Ceiling of the per-object error backoff, in seconds
    #[arg(long, env = "BACKOFF_CAP_SECS", default_value_t = 300)]
    pub backoff_cap_secs: u64,

    /// Objects reconciled concurrently per kind
    #[arg(long, env = "CONCURRENCY", default_value_t = 8)]
    pub concurrency: u16,

    /// Milliseconds to wait for a burst of changes to settle
    #[arg(long, env = "DEBOUNCE_MS", default_value_t = 500)]
    pub debounce_ms: u64,

    /// Prometheus text endpoint of the Redis metrics collector
    #[arg(long, env = "METRICS_COLLECTOR_URL")]
    pub metrics_collector_url: Option<String>,

    /// Seconds between collector scrapes
    #[arg(long, env = "SIGNAL_POLL_INTERVAL_SECS", default_value_t = 15)]
    pub signal_poll_interval: u64,

    /// Port of the health and metrics server
    #[arg(long, env = "HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Name of the leader election lease
    #[arg(long, env = "LEASE_NAME", default_value = "redis-operator-leader")]
    pub lease_name: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            watch_namespace: None,
            resync_secs: 60,
            not_ready_requeue_secs: 10,
            reconcile_timeout: 30,
            backoff_cap_secs: 300,
            concurrency: 8,
            debounce_ms: 500,
            metrics_collector_url: None,
            signal_poll_interval: 15,
            health_port: 8080,
            lease_name: "redis-operator-leader".to_string(),
        }
    }
}

impl OperatorConfig {
    pub fn resync(&self) -> Duration {
        Duration::from_secs(self.resync_secs)
    }

    pub fn not_ready_requeue(&self) -> Duration {
        Duration::from_secs(self.not_ready_requeue_secs)
    }

    pub fn reconcile_deadline(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout)
    }

    pub fn backoff_cap(&self) -> Duration {
        Duration::from_secs(self.backoff_cap_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn signal_poll_interval(&self) -> Duration {
        Duration::from_secs(self.signal_poll_interval.max(1))
    }
}
