//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the controllers run)
//! - `/metrics` - Prometheus metrics endpoint

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

/// Labels identifying one topology object
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ObjectLabels {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

impl ObjectLabels {
    fn new(kind: &str, namespace: &str, name: &str) -> Self {
        Self {
            kind: kind.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for ObjectLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for reconcile errors, by retry class
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorLabels {
    pub kind: String,
    pub class: String,
}

impl EncodeLabelSet for ErrorLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("class", self.class.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for phase-based metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PhaseLabels {
    pub kind: String,
    pub phase: String,
}

impl EncodeLabelSet for PhaseLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("phase", self.phase.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    /// Total reconciliations counter
    pub reconciliations_total: Family<ObjectLabels, Counter>,
    /// Failed reconciliations by class
    pub reconciliation_errors_total: Family<ErrorLabels, Counter>,
    /// Reconciliation duration histogram
    pub reconcile_duration_seconds: Family<ObjectLabels, Histogram>,
    /// Objects by phase
    pub objects_by_phase: Family<PhaseLabels, Gauge>,
    /// Conflicting writes absorbed by apply retries
    pub conflict_retries_total: Family<ObjectLabels, Counter>,
    /// Child writes performed by apply
    pub apply_writes_total: Family<ObjectLabels, Counter>,
    /// Desired replicas per object
    pub replicas_desired: Family<ObjectLabels, Gauge>,
    /// Ready replicas per object
    pub replicas_ready: Family<ObjectLabels, Gauge>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let reconciliations_total = Family::<ObjectLabels, Counter>::default();
        registry.register(
            "redisoperator_reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "redisoperator_reconciliation_errors",
            "Total number of reconciliation errors by class",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<ObjectLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "redisoperator_reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let objects_by_phase = Family::<PhaseLabels, Gauge>::default();
        registry.register(
            "redisoperator_objects",
            "Topology objects by kind and phase",
            objects_by_phase.clone(),
        );

        let conflict_retries_total = Family::<ObjectLabels, Counter>::default();
        registry.register(
            "redisoperator_conflict_retries",
            "Conflicting child writes retried by the apply engine",
            conflict_retries_total.clone(),
        );

        let apply_writes_total = Family::<ObjectLabels, Counter>::default();
        registry.register(
            "redisoperator_apply_writes",
            "Child creates, patches and deletes",
            apply_writes_total.clone(),
        );

        let replicas_desired = Family::<ObjectLabels, Gauge>::default();
        registry.register(
            "redisoperator_replicas_desired",
            "Desired replicas summed over all roles",
            replicas_desired.clone(),
        );

        let replicas_ready = Family::<ObjectLabels, Gauge>::default();
        registry.register(
            "redisoperator_replicas_ready",
            "Ready replicas summed over all roles",
            replicas_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            objects_by_phase,
            conflict_retries_total,
            apply_writes_total,
            replicas_desired,
            replicas_ready,
            registry,
        }
    }

    /// Record a finished reconciliation
    pub fn record_reconcile(&self, kind: &str, namespace: &str, name: &str, duration_secs: f64) {
        let labels = ObjectLabels::new(kind, namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, kind: &str, class: &str) {
        let labels = ErrorLabels {
            kind: kind.to_string(),
            class: class.to_string(),
        };
        self.reconciliation_errors_total.get_or_create(&labels).inc();
    }

    /// Record what an apply did
    pub fn record_apply(&self, kind: &str, namespace: &str, name: &str, writes: u64, retries: u64) {
        let labels = ObjectLabels::new(kind, namespace, name);
        self.apply_writes_total.get_or_create(&labels).inc_by(writes);
        self.conflict_retries_total
            .get_or_create(&labels)
            .inc_by(retries);
    }

    /// Move one object between phase gauges
    pub fn record_phase_change(&self, kind: &str, from: Option<&str>, to: &str) {
        if let Some(from) = from {
            self.objects_by_phase
                .get_or_create(&PhaseLabels {
                    kind: kind.to_string(),
                    phase: from.to_string(),
                })
                .dec();
        }
        self.objects_by_phase
            .get_or_create(&PhaseLabels {
                kind: kind.to_string(),
                phase: to.to_string(),
            })
            .inc();
    }

    /// Update replica metrics
    pub fn set_replicas(&self, kind: &str, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = ObjectLabels::new(kind, namespace, name);
        self.replicas_desired.get_or_create(&labels).set(desired);
        self.replicas_ready.get_or_create(&labels).set(ready);
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

/// Shared state for the health server
pub struct HealthState {
    /// Whether the operator is ready (acquired leadership and running controllers)
    ready: RwLock<bool>,
    /// Metrics registry
    pub metrics: Metrics,
    /// Last successful reconcile timestamp (Unix epoch seconds)
    pub last_reconcile: AtomicU64,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            metrics: Metrics::new(),
            last_reconcile: AtomicU64::new(0),
        }
    }

    /// Mark the operator as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the operator is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Stamp the time of a successful reconcile
    pub fn touch(&self) {
        let now = jiff::Timestamp::now().as_second();
        self.last_reconcile
            .store(u64::try_from(now).unwrap_or(0), Ordering::Relaxed);
    }
}

/// Liveness probe handler
///
/// Returns 200 OK if the process is alive.
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 200 OK if the operator is ready to serve.
/// Returns 503 Service Unavailable if not ready.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the health server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the health server on `0.0.0.0:<port>`.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
