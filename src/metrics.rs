//! Pipeline counters, passed down explicitly as a [`MetricsSink`].

use crate::event::Operation;
use crate::Result;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use std::fmt;
use std::time::Duration;

/// Why an event or batch failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Permanent error while executing a batch.
    ExecutionError,
    /// One deadlock attempt; recorded against the batch, not per statement.
    Deadlock,
    DeadlockExhausted,
    /// Event could not be turned into a statement.
    BuildError,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::ExecutionError => "execution_error",
            FailureKind::Deadlock => "deadlock",
            FailureKind::DeadlockExhausted => "deadlock_exhausted",
            FailureKind::BuildError => "build_error",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait MetricsSink: Send + Sync {
    /// One committed statement and its share of the batch latency.
    fn record_success(&self, table: &str, op: Operation, latency: Duration);

    fn record_failure(&self, table: &str, op: &str, kind: FailureKind);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_success(&self, _table: &str, _op: Operation, _latency: Duration) {}

    fn record_failure(&self, _table: &str, _op: &str, _kind: FailureKind) {}
}

/// Prometheus counters on a registry owned by this instance.
pub struct PrometheusMetrics {
    registry: Registry,
    events_processed: CounterVec,
    events_failed: CounterVec,
    query_duration: HistogramVec,
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let events_processed = CounterVec::new(
            Opts::new("cdc_events_processed_total", "Total number of CDC events applied"),
            &["table", "operation"],
        )?;
        let events_failed = CounterVec::new(
            Opts::new("cdc_events_failed_total", "Total number of CDC events that failed"),
            &["table", "operation", "error_type"],
        )?;
        let query_duration = HistogramVec::new(
            HistogramOpts::new(
                "cdc_query_duration_seconds",
                "Per-statement share of batch execution time",
            ),
            &["table", "operation"],
        )?;

        registry.register(Box::new(events_processed.clone()))?;
        registry.register(Box::new(events_failed.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;

        Ok(Self {
            registry,
            events_processed,
            events_failed,
            query_duration,
        })
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }

    pub fn processed_count(&self, table: &str, op: Operation) -> f64 {
        self.events_processed
            .with_label_values(&[table, op.as_str()])
            .get()
    }

    pub fn failed_count(&self, table: &str, op: &str, kind: FailureKind) -> f64 {
        self.events_failed
            .with_label_values(&[table, op, kind.as_str()])
            .get()
    }
}

impl MetricsSink for PrometheusMetrics {
    fn record_success(&self, table: &str, op: Operation, latency: Duration) {
        let labels = [table, op.as_str()];
        self.events_processed.with_label_values(&labels).inc();
        self.query_duration
            .with_label_values(&labels)
            .observe(latency.as_secs_f64());
    }

    fn record_failure(&self, table: &str, op: &str, kind: FailureKind) {
        self.events_failed
            .with_label_values(&[table, op, kind.as_str()])
            .inc();
    }
}
