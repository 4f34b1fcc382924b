//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the engine's components:
//! - Reservation outcomes and commit latency
//! - Optimistic-concurrency conflicts
//! - Viewer sessions (notifications, snapshot rebuilds, promotions)
//! - Data-integrity faults
//! - Seat re-pick retries
//!
//! Recording is always on; without an installed recorder the `metrics`
//! facade discards everything. [`MetricsServer`] installs the Prometheus
//! recorder and serves the scrape endpoint on its address.
//!
//! # Example
//!
//! ```rust,no_run
//! use seatflow_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // curl http://0.0.0.0:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder plus the HTTP endpoint scrapers read it from.
///
/// The endpoint task is aborted when the server is dropped.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
    exporter: Option<JoinHandle<()>>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Address the scrape endpoint listens on (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            handle: None,
            exporter: None,
        }
    }

    /// Address the scrape endpoint listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Install the Prometheus recorder and start serving it on [`addr`](Self::addr).
    ///
    /// Must be called from within a Tokio runtime; the endpoint runs as a
    /// spawned task.
    ///
    /// # Errors
    ///
    /// Returns error if there is no Tokio runtime, or if the exporter cannot
    /// be built (including when the address cannot be bound).
    ///
    /// # Note
    ///
    /// A recorder can only be installed once per process. If one is already
    /// installed (e.g., by an earlier test) this logs a warning and succeeds
    /// without a handle or an endpoint.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }
        register_metrics();

        let addr = self.addr;
        self.exporter = Some(runtime.spawn(async move {
            if let Err(e) = exporter.await {
                tracing::error!(addr = %addr, error = ?e, "Metrics endpoint stopped");
            }
        }));
        self.handle = Some(handle);
        tracing::info!(addr = %self.addr, "Serving Prometheus metrics");
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

impl Drop for MetricsServer {
    fn drop(&mut self) {
        if let Some(exporter) = self.exporter.take() {
            exporter.abort();
        }
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Reservations
    describe_counter!(
        "seatflow_reservations_total",
        "Reservation attempts by intent and outcome"
    );
    describe_counter!(
        "seatflow_cancellations_total",
        "Holder-initiated cancellations by outcome"
    );
    describe_counter!(
        "seatflow_commit_conflicts_total",
        "Conditional commits rejected because the event changed since it was read"
    );
    describe_histogram!(
        "seatflow_reservation_duration_seconds",
        "Time from commit-time read to committed reservation"
    );

    // Viewers
    describe_gauge!("seatflow_active_viewers", "Viewer sessions currently running");
    describe_counter!(
        "seatflow_subscription_notifications_total",
        "Result sets pushed to viewer sessions, by feed"
    );
    describe_histogram!(
        "seatflow_snapshot_rebuild_duration_seconds",
        "Time taken to fold a capacity notification into a viewer"
    );
    describe_counter!(
        "seatflow_promotions_total",
        "One-shot promotion signals sent to queued holders"
    );
    describe_counter!(
        "seatflow_integrity_faults_total",
        "Data-integrity faults detected while building snapshots"
    );

    // Retry
    describe_counter!("seatflow_retry_attempts_total", "Retries started");
    describe_counter!("seatflow_retry_successes_total", "Operations that succeeded after retrying");
    describe_counter!("seatflow_retry_exhausted_total", "Operations that ran out of retries");
}

/// Reservation metrics recorder.
pub struct ReservationMetrics;

impl ReservationMetrics {
    /// Record the outcome of one `reserve` call.
    pub fn record_outcome(intent: &'static str, outcome: &'static str) {
        counter!("seatflow_reservations_total", "intent" => intent, "outcome" => outcome).increment(1);
    }

    /// Record a committed reservation.
    pub fn record_commit(duration: Duration) {
        histogram!("seatflow_reservation_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a revision conflict.
    pub fn record_conflict() {
        counter!("seatflow_commit_conflicts_total").increment(1);
    }

    /// Record the outcome of one `cancel` call.
    pub fn record_cancellation(outcome: &'static str) {
        counter!("seatflow_cancellations_total", "outcome" => outcome).increment(1);
    }
}

/// Viewer session metrics recorder.
pub struct ViewerMetrics;

impl ViewerMetrics {
    /// Record a viewer session starting.
    pub fn record_session_started() {
        gauge!("seatflow_active_viewers").increment(1.0);
    }

    /// Record a viewer session ending.
    pub fn record_session_ended() {
        gauge!("seatflow_active_viewers").decrement(1.0);
    }

    /// Record a pushed result set.
    pub fn record_notification(feed: &'static str) {
        counter!("seatflow_subscription_notifications_total", "feed" => feed).increment(1);
    }

    /// Record a snapshot rebuild.
    pub fn record_rebuild(duration: Duration) {
        histogram!("seatflow_snapshot_rebuild_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a promotion signal.
    pub fn record_promotion() {
        counter!("seatflow_promotions_total").increment(1);
    }

    /// Record an integrity fault.
    pub fn record_integrity_fault() {
        counter!("seatflow_integrity_faults_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("seatflow_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("seatflow_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("seatflow_retry_exhausted_total").increment(1);
    }
}
