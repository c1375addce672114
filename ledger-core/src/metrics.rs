//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Each [`Metrics`] owns its registry, so several instances (one per test,
//! say) never collide.
//!
//! # Metrics
//!
//! - `ledger_operations_total{operation,outcome}` - Engine calls by result
//! - `ledger_operation_duration_seconds{operation}` - Engine call latency
//! - `ledger_idempotency_hits_total` - Replayed cached responses
//! - `ledger_idempotency_misses_total` - Requests that ran the handler

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Engine operations by name and outcome
    pub operations_total: IntCounterVec,

    /// Engine operation latency
    pub operation_duration: HistogramVec,

    /// Idempotency cache hits
    pub idempotency_hits: IntCounter,

    /// Idempotency cache misses
    pub idempotency_misses: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("idempotency_hits", &self.idempotency_hits.get())
            .field("idempotency_misses", &self.idempotency_misses.get())
            .finish_non_exhaustive()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounterVec::new(
            Opts::new("ledger_operations_total", "Ledger operations by outcome"),
            &["operation", "outcome"],
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of ledger operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        let idempotency_hits = IntCounter::new(
            "ledger_idempotency_hits_total",
            "Requests answered from the idempotency cache",
        )?;
        registry.register(Box::new(idempotency_hits.clone()))?;

        let idempotency_misses = IntCounter::new(
            "ledger_idempotency_misses_total",
            "Idempotent requests that executed the handler",
        )?;
        registry.register(Box::new(idempotency_misses.clone()))?;

        Ok(Self {
            operations_total,
            operation_duration,
            idempotency_hits,
            idempotency_misses,
            registry,
        })
    }

    /// Record one finished engine operation
    pub fn record_operation(&self, operation: &str, success: bool, duration_seconds: f64) {
        let outcome = if success { "success" } else { "error" };
        self.operations_total
            .with_label_values(&[operation, outcome])
            .inc();
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Record idempotency cache hit
    pub fn record_idempotency_hit(&self) {
        self.idempotency_hits.inc();
    }

    /// Record idempotency cache miss
    pub fn record_idempotency_miss(&self) {
        self.idempotency_misses.inc();
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render in the Prometheus text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
