//! Prometheus metrics for the 2PC node
//!
//! One collector per process, shared as `Arc<MetricsCollector>` in
//! `AppState`. Tracks request volume, 2PC outcomes, and lock wait time as
//! an always-on observability surface, independent of which transfer
//! features are enabled.

use prometheus::{CounterVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use tracing::instrument;

use crate::error::{Error, Result};

pub struct MetricsCollector {
    registry: Registry,
    requests_total: IntCounter,
    request_duration: Histogram,
    errors_total: CounterVec,
    transactions_total: IntCounterVec,
    prepare_votes: IntCounterVec,
    lock_wait_seconds: Histogram,
    lock_timeouts_total: IntCounter,
    recovery_aborts_total: IntCounter,
}

impl MetricsCollector {
    #[instrument(level = "info")]
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let requests_total = IntCounter::with_opts(Opts::new(
            "twopc_requests_total",
            "Total number of HTTP requests handled by this node",
        ))
        .map_err(|e| Error::internal(format!("requests_total: {e}")))?;

        let request_duration = Histogram::with_opts(HistogramOpts::new(
            "twopc_request_duration_seconds",
            "HTTP request duration in seconds",
        ))
        .map_err(|e| Error::internal(format!("request_duration: {e}")))?;

        let errors_total = CounterVec::new(
            Opts::new("twopc_errors_total", "Total errors by category"),
            &["category"],
        )
        .map_err(|e| Error::internal(format!("errors_total: {e}")))?;

        let transactions_total = IntCounterVec::new(
            Opts::new(
                "twopc_transactions_total",
                "Global transactions reaching a terminal status, by outcome",
            ),
            &["outcome"],
        )
        .map_err(|e| Error::internal(format!("transactions_total: {e}")))?;

        let prepare_votes = IntCounterVec::new(
            Opts::new(
                "twopc_prepare_votes_total",
                "Votes cast by this participant during prepare",
            ),
            &["vote"],
        )
        .map_err(|e| Error::internal(format!("prepare_votes: {e}")))?;

        let lock_wait_seconds = Histogram::with_opts(HistogramOpts::new(
            "twopc_lock_wait_seconds",
            "Time spent polling for a write lock during prepare",
        ))
        .map_err(|e| Error::internal(format!("lock_wait_seconds: {e}")))?;

        let lock_timeouts_total = IntCounter::with_opts(Opts::new(
            "twopc_lock_timeouts_total",
            "Lock acquisitions that exceeded lock_timeout",
        ))
        .map_err(|e| Error::internal(format!("lock_timeouts_total: {e}")))?;

        let recovery_aborts_total = IntCounter::with_opts(Opts::new(
            "twopc_recovery_aborts_total",
            "Transactions unilaterally aborted by startup recovery",
        ))
        .map_err(|e| Error::internal(format!("recovery_aborts_total: {e}")))?;

        registry
            .register(Box::new(requests_total.clone()))
            .map_err(|e| Error::internal(format!("register requests_total: {e}")))?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(|e| Error::internal(format!("register request_duration: {e}")))?;
        registry
            .register(Box::new(errors_total.clone()))
            .map_err(|e| Error::internal(format!("register errors_total: {e}")))?;
        registry
            .register(Box::new(transactions_total.clone()))
            .map_err(|e| Error::internal(format!("register transactions_total: {e}")))?;
        registry
            .register(Box::new(prepare_votes.clone()))
            .map_err(|e| Error::internal(format!("register prepare_votes: {e}")))?;
        registry
            .register(Box::new(lock_wait_seconds.clone()))
            .map_err(|e| Error::internal(format!("register lock_wait_seconds: {e}")))?;
        registry
            .register(Box::new(lock_timeouts_total.clone()))
            .map_err(|e| Error::internal(format!("register lock_timeouts_total: {e}")))?;
        registry
            .register(Box::new(recovery_aborts_total.clone()))
            .map_err(|e| Error::internal(format!("register recovery_aborts_total: {e}")))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            errors_total,
            transactions_total,
            prepare_votes,
            lock_wait_seconds,
            lock_timeouts_total,
            recovery_aborts_total,
        })
    }

    #[instrument(level = "debug", skip(self))]
    pub fn record_request(&self, duration_seconds: f64) {
        self.requests_total.inc();
        self.request_duration.observe(duration_seconds);
    }

    pub fn record_error(&self, category: &str) {
        self.errors_total.with_label_values(&[category]).inc();
    }

    /// `outcome` is `"committed"` or `"aborted"`. Called once per global
    /// transaction, at the end of `execute_2pc`.
    pub fn record_transaction_outcome(&self, outcome: &str) {
        self.transactions_total.with_label_values(&[outcome]).inc();
    }

    /// `vote` is `"yes"` or `"no"`. Called once per `prepare` invocation.
    pub fn record_prepare_vote(&self, vote: &str) {
        self.prepare_votes.with_label_values(&[vote]).inc();
    }

    pub fn observe_lock_wait(&self, seconds: f64) {
        self.lock_wait_seconds.observe(seconds);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts_total.inc();
    }

    pub fn record_recovery_abort(&self) {
        self.recovery_aborts_total.inc();
    }

    pub fn export(&self) -> Result<String> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::internal(format!("encoding metrics: {e}")))?;
        String::from_utf8(buffer).map_err(|e| Error::internal(format!("metrics not utf8: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_registers_without_duplicate_names() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_request(0.01);
        collector.record_transaction_outcome("committed");
        collector.record_prepare_vote("yes");
        let text = collector.export().unwrap();
        assert!(text.contains("twopc_transactions_total"));
    }

    #[test]
    fn export_reflects_recorded_samples() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_transaction_outcome("aborted");
        let text = collector.export().unwrap();
        assert!(text.contains("outcome=\"aborted\""));
    }
}
