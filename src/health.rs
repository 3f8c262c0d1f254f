//! Health server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (always returns 200 if server is running)
//! - `/readyz` - Readiness probe (returns 200 once the controller is running)
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

/// Labels identifying one Unit
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct UnitLabels {
    pub namespace: String,
    pub name: String,
}

impl UnitLabels {
    fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }
}

impl EncodeLabelSet for UnitLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("namespace", self.namespace.as_str()).encode(encoder.encode_label())?;
        ("name", self.name.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Labels for per-adapter failure counts
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct AdapterLabels {
    pub kind: String,
    pub step: String,
}

impl EncodeLabelSet for AdapterLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("kind", self.kind.as_str()).encode(encoder.encode_label())?;
        ("step", self.step.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Shared metrics for the operator
pub struct Metrics {
    pub reconciliations_total: Family<UnitLabels, Counter>,
    pub reconciliation_errors_total: Family<UnitLabels, Counter>,
    pub reconcile_duration_seconds: Family<UnitLabels, Histogram>,
    /// Failed adapter steps by owned kind
    pub adapter_failures_total: Family<AdapterLabels, Counter>,
    pub unit_replicas_desired: Family<UnitLabels, Gauge>,
    pub unit_replicas_ready: Family<UnitLabels, Gauge>,
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
        let mut registry = Registry::with_prefix("unit_operator");

        let reconciliations_total = Family::<UnitLabels, Counter>::default();
        registry.register(
            "reconciliations",
            "Total number of reconciliations",
            reconciliations_total.clone(),
        );

        let reconciliation_errors_total = Family::<UnitLabels, Counter>::default();
        registry.register(
            "reconciliation_errors",
            "Total number of reconciliation errors",
            reconciliation_errors_total.clone(),
        );

        let reconcile_duration_seconds =
            Family::<UnitLabels, Histogram>::new_with_constructor(|| {
                Histogram::new(exponential_buckets(0.001, 2.0, 15))
            });
        registry.register(
            "reconcile_duration_seconds",
            "Duration of reconciliation in seconds",
            reconcile_duration_seconds.clone(),
        );

        let adapter_failures_total = Family::<AdapterLabels, Counter>::default();
        registry.register(
            "adapter_failures",
            "Failed apply or status steps by owned resource kind",
            adapter_failures_total.clone(),
        );

        let unit_replicas_desired = Family::<UnitLabels, Gauge>::default();
        registry.register(
            "unit_replicas_desired",
            "Desired number of replicas for each Unit",
            unit_replicas_desired.clone(),
        );

        let unit_replicas_ready = Family::<UnitLabels, Gauge>::default();
        registry.register(
            "unit_replicas_ready",
            "Number of ready replicas for each Unit",
            unit_replicas_ready.clone(),
        );

        Self {
            reconciliations_total,
            reconciliation_errors_total,
            reconcile_duration_seconds,
            adapter_failures_total,
            unit_replicas_desired,
            unit_replicas_ready,
            registry,
        }
    }

    /// Record a successful reconciliation
    pub fn record_reconcile(&self, namespace: &str, name: &str, duration_secs: f64) {
        let labels = UnitLabels::new(namespace, name);
        self.reconciliations_total.get_or_create(&labels).inc();
        self.reconcile_duration_seconds
            .get_or_create(&labels)
            .observe(duration_secs);
    }

    /// Record a failed reconciliation
    pub fn record_error(&self, namespace: &str, name: &str) {
        self.reconciliation_errors_total
            .get_or_create(&UnitLabels::new(namespace, name))
            .inc();
    }

    /// Record one failed adapter step
    pub fn record_adapter_failure(&self, kind: &str, step: &str) {
        let labels = AdapterLabels {
            kind: kind.to_string(),
            step: step.to_string(),
        };
        self.adapter_failures_total.get_or_create(&labels).inc();
    }

    /// Update Unit replica metrics
    pub fn set_unit_replicas(&self, namespace: &str, name: &str, desired: i64, ready: i64) {
        let labels = UnitLabels::new(namespace, name);
        self.unit_replicas_desired.get_or_create(&labels).set(desired);
        self.unit_replicas_ready.get_or_create(&labels).set(ready);
    }

    /// Drop the replica series of a Unit that is gone or being deleted
    pub fn forget_unit(&self, namespace: &str, name: &str) {
        let labels = UnitLabels::new(namespace, name);
        self.unit_replicas_desired.remove(&labels);
        self.unit_replicas_ready.remove(&labels);
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
    /// Whether the controller stream is running
    ready: RwLock<bool>,
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

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Stamp the time of the latest successful pass
    pub fn touch(&self) {
        let now = u64::try_from(jiff::Timestamp::now().as_second()).unwrap_or(0);
        self.last_reconcile.store(now, Ordering::Relaxed);
    }
}

/// Liveness probe handler
async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe handler
///
/// Returns 503 Service Unavailable until the controller is running.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

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

/// Serve health and metrics endpoints on `0.0.0.0:port`.
pub async fn run_health_server(state: Arc<HealthState>, port: u16) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
