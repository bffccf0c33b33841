//! Prometheus metrics for the booking engine.
//!
//! This module provides metric collection for:
//! - Booking operations (creations, conflicts, lock timeouts, transitions)
//! - Best-effort side effects (history appends, cache invalidation)
//! - Retries of transient failures
//!
//! # Example
//!
//! ```rust,no_run
//! use chairbook_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use chairbook_core::BookingStatus;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Register metric descriptions and install the Prometheus exporter.
    ///
    /// Must be called from within a Tokio runtime: the exporter serves
    /// `/metrics` on `addr` from a background task.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built (e.g. the address is taken).
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and leaves [`MetricsServer::render`] returning `None`.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let (recorder, exporter) = builder
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;
        let handle = recorder.handle();

        if metrics::set_global_recorder(recorder).is_err() {
            tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
            return Ok(());
        }

        tokio::spawn(async move {
            // The exporter's error type has no Debug or Display impl.
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });
        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Booking operations
    describe_counter!(
        "bookings_created_total",
        "Total number of bookings created"
    );
    describe_counter!(
        "booking_conflicts_total",
        "Total number of requests rejected because the slot was taken"
    );
    describe_counter!(
        "booking_lock_timeouts_total",
        "Total number of requests that timed out waiting for a provider lock"
    );
    describe_counter!(
        "booking_status_transitions_total",
        "Total number of status transitions, labelled by source and target status"
    );
    describe_histogram!(
        "booking_operation_duration_seconds",
        "Time taken by booking operations, labelled by operation and outcome"
    );
    describe_histogram!(
        "booking_store_lock_wait_seconds",
        "Time spent waiting for a provider's schedule lock"
    );

    // Side effects
    describe_counter!(
        "booking_side_effects_executed_total",
        "Total number of best-effort side effects that succeeded"
    );
    describe_counter!(
        "booking_side_effect_failures_total",
        "Total number of best-effort side effects that failed"
    );
    describe_histogram!(
        "booking_side_effect_duration_seconds",
        "Time taken to execute side effects"
    );
    describe_gauge!(
        "booking_side_effect_failure_queue_size",
        "Number of failed side effects held for inspection"
    );
    describe_counter!(
        "booking_side_effect_failures_dropped_total",
        "Total number of failure records evicted from a full queue"
    );

    // Retries
    describe_counter!(
        "booking_retry_attempts_total",
        "Total number of retries of transient failures"
    );
    describe_counter!(
        "booking_retry_successes_total",
        "Total number of operations that succeeded after retrying"
    );
    describe_counter!(
        "booking_retry_exhausted_total",
        "Total number of operations that failed after exhausting retries"
    );
}

/// Booking operation metrics recorder.
pub struct BookingMetrics;

impl BookingMetrics {
    /// Record a created booking.
    pub fn record_created() {
        counter!("bookings_created_total").increment(1);
    }

    /// Record a rejected overlapping request.
    pub fn record_conflict() {
        counter!("booking_conflicts_total").increment(1);
    }

    /// Record a provider lock wait that timed out.
    pub fn record_lock_timeout() {
        counter!("booking_lock_timeouts_total").increment(1);
    }

    /// Record a status transition.
    pub fn record_transition(from: BookingStatus, to: BookingStatus) {
        counter!(
            "booking_status_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }

    /// Record time spent acquiring a provider's schedule lock.
    pub fn record_lock_wait(duration: Duration) {
        histogram!("booking_store_lock_wait_seconds").record(duration.as_secs_f64());
    }

    /// Record the duration and outcome of an operation.
    pub fn record_operation(operation: &'static str, outcome: &'static str, duration: Duration) {
        histogram!(
            "booking_operation_duration_seconds",
            "operation" => operation,
            "outcome" => outcome
        )
        .record(duration.as_secs_f64());
    }
}

/// Side-effect metrics recorder.
pub struct EffectMetrics;

impl EffectMetrics {
    /// Record a successful side effect.
    pub fn record_execution(effect: &'static str, duration: Duration) {
        counter!("booking_side_effects_executed_total", "effect" => effect).increment(1);
        histogram!("booking_side_effect_duration_seconds", "effect" => effect)
            .record(duration.as_secs_f64());
    }

    /// Record a failed side effect.
    pub fn record_failure(effect: &'static str) {
        counter!("booking_side_effect_failures_total", "effect" => effect).increment(1);
    }

    /// Record the failure queue size.
    #[allow(clippy::cast_precision_loss)] // Queue size is bounded by configuration
    pub fn record_queue_size(size: usize) {
        gauge!("booking_side_effect_failure_queue_size").set(size as f64);
    }

    /// Record an evicted failure record.
    pub fn record_dropped() {
        counter!("booking_side_effect_failures_dropped_total").increment(1);
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("booking_retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("booking_retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("booking_retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_metrics_server_creation() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);
        server.start().unwrap();

        BookingMetrics::record_created();
        BookingMetrics::record_transition(BookingStatus::Pending, BookingStatus::Confirmed);
        EffectMetrics::record_failure("history");

        // The recorder is process-global; another test may have installed it first.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("bookings_created_total"));
            assert!(rendered.contains("booking_status_transitions_total"));
            assert!(rendered.contains("booking_side_effect_failures_total"));
        }
    }
}
