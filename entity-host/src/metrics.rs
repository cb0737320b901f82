//! Metrics collection for observability
//!
//! Prometheus metrics for the actor host. Each host owns its own registry so
//! several hosts (one per entity type, or one per test) can live in a process.
//!
//! # Metrics
//!
//! - `entity_activations_total` - State hydrations, by entity type
//! - `entity_passivations_total` - Cached states dropped, by entity type
//! - `entity_operations_total` - Completed operations, by entity type and outcome
//! - `entity_commit_failures_total` - Snapshot commits that failed
//! - `entity_invoke_timeouts_total` - Operations cancelled while queued
//! - `entity_active_mailboxes` - Mailbox tasks currently running
//! - `entity_operation_duration_seconds` - Histogram of execute + commit latency

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

/// Outcome label for an operation that persisted a new snapshot
pub const OUTCOME_COMMITTED: &str = "committed";
/// Outcome label for an operation that left the state untouched
pub const OUTCOME_READ: &str = "read";
/// Outcome label for an operation whose body returned an error
pub const OUTCOME_REJECTED: &str = "rejected";
/// Outcome label for an operation that failed in activation or commit
pub const OUTCOME_FAILED: &str = "failed";

/// Metrics collector
#[derive(Clone)]
pub struct HostMetrics {
    /// State hydrations
    pub activations: IntCounterVec,

    /// Cached states dropped (explicitly or after a failed commit)
    pub passivations: IntCounterVec,

    /// Completed operations
    pub operations: IntCounterVec,

    /// Failed snapshot commits
    pub commit_failures: IntCounterVec,

    /// Operations cancelled by an invoke timeout
    pub invoke_timeouts: IntCounter,

    /// Running mailbox tasks
    pub active_mailboxes: IntGauge,

    /// Operation latency histogram
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for HostMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostMetrics")
            .field("active_mailboxes", &self.active_mailboxes.get())
            .field("invoke_timeouts", &self.invoke_timeouts.get())
            .finish()
    }
}

impl HostMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let activations = IntCounterVec::new(
            Opts::new("entity_activations_total", "Entity state hydrations"),
            &["entity_type"],
        )?;
        registry.register(Box::new(activations.clone()))?;

        let passivations = IntCounterVec::new(
            Opts::new("entity_passivations_total", "Cached entity states dropped"),
            &["entity_type"],
        )?;
        registry.register(Box::new(passivations.clone()))?;

        let operations = IntCounterVec::new(
            Opts::new("entity_operations_total", "Completed entity operations"),
            &["entity_type", "outcome"],
        )?;
        registry.register(Box::new(operations.clone()))?;

        let commit_failures = IntCounterVec::new(
            Opts::new("entity_commit_failures_total", "Failed snapshot commits"),
            &["entity_type"],
        )?;
        registry.register(Box::new(commit_failures.clone()))?;

        let invoke_timeouts = IntCounter::new(
            "entity_invoke_timeouts_total",
            "Operations cancelled while waiting in a mailbox",
        )?;
        registry.register(Box::new(invoke_timeouts.clone()))?;

        let active_mailboxes =
            IntGauge::new("entity_active_mailboxes", "Running entity mailbox tasks")?;
        registry.register(Box::new(active_mailboxes.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "entity_operation_duration_seconds",
                "Histogram of operation execute + commit latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            activations,
            passivations,
            operations,
            commit_failures,
            invoke_timeouts,
            active_mailboxes,
            operation_duration,
            registry,
        })
    }

    /// Record a completed operation
    pub fn record_operation(&self, entity_type: &str, outcome: &str, duration_secs: f64) {
        self.operations
            .with_label_values(&[entity_type, outcome])
            .inc();
        self.operation_duration.observe(duration_secs);
    }

    /// Number of completed operations for a type and outcome
    pub fn operation_count(&self, entity_type: &str, outcome: &str) -> u64 {
        self.operations
            .with_label_values(&[entity_type, outcome])
            .get()
    }

    /// Render the registry in the Prometheus text format
    pub fn gather_text(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
