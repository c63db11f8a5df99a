//! Observability for the trigger engine
//!
//! Provides:
//! - Prometheus metrics (tick latency, per-kind usage, dump decisions, errors)
//! - Structured JSON logging with tracing, including the one-line decision
//!   record emitted for every fired, suppressed or over-max evaluation

use prometheus::{
    register_gauge_vec, register_histogram, register_int_counter_vec, register_int_gauge,
    GaugeVec, Histogram, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{error, info, warn};

use crate::config::TriggerConfig;
use crate::dump::DumpRecord;
use crate::error::{CaptureError, SampleError};
use crate::models::ResourceKind;
use crate::trigger::{Evaluation, Outcome};

/// Histogram buckets for tick latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.0001, 0.0005, 0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<EngineMetricsInner> = OnceLock::new();

struct EngineMetricsInner {
    tick_latency_seconds: Histogram,
    resource_usage: GaugeVec,
    dump_decisions: IntCounterVec,
    sample_errors: IntCounterVec,
    capture_errors: IntCounterVec,
    dumps_in_flight: IntGauge,
}

impl EngineMetricsInner {
    fn new() -> Self {
        Self {
            tick_latency_seconds: register_histogram!(
                "holmes_tick_latency_seconds",
                "Time spent sampling and evaluating all enabled kinds in one tick",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register tick_latency_seconds"),

            resource_usage: register_gauge_vec!(
                "holmes_resource_usage",
                "Last sampled value per kind (percent or raw count)",
                &["kind"]
            )
            .expect("Failed to register resource_usage"),

            dump_decisions: register_int_counter_vec!(
                "holmes_dump_decisions_total",
                "Trigger decisions that matched a rule, by outcome",
                &["kind", "outcome"]
            )
            .expect("Failed to register dump_decisions"),

            sample_errors: register_int_counter_vec!(
                "holmes_sample_errors_total",
                "Samples that could not be taken",
                &["kind", "error"]
            )
            .expect("Failed to register sample_errors"),

            capture_errors: register_int_counter_vec!(
                "holmes_capture_errors_total",
                "Dumps that failed to capture or persist",
                &["error"]
            )
            .expect("Failed to register capture_errors"),

            dumps_in_flight: register_int_gauge!(
                "holmes_dumps_in_flight",
                "Captures currently running"
            )
            .expect("Failed to register dumps_in_flight"),
        }
    }
}

/// Handle to the global engine metrics
///
/// Clones share the same underlying metrics.
#[derive(Clone)]
pub struct EngineMetrics {
    _private: (),
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineMetrics {
    /// Create a new metrics handle (initializes global metrics if needed)
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &EngineMetricsInner {
        GLOBAL_METRICS.get_or_init(EngineMetricsInner::new)
    }

    pub fn observe_tick_latency(&self, duration_secs: f64) {
        self.inner().tick_latency_seconds.observe(duration_secs);
    }

    pub fn set_usage(&self, kind: ResourceKind, value: f64) {
        self.inner()
            .resource_usage
            .with_label_values(&[kind.check_name()])
            .set(value);
    }

    /// Count a decision; outcomes that matched nothing are not counted
    pub fn record_outcome(&self, kind: ResourceKind, outcome: Outcome) {
        let label = match outcome {
            Outcome::Fired(_) => "fired",
            Outcome::CoolingDown(_) => "suppressed",
            Outcome::OverMax => "over_max",
            Outcome::WarmingUp | Outcome::Quiet => return,
        };
        self.inner()
            .dump_decisions
            .with_label_values(&[kind.check_name(), label])
            .inc();
    }

    pub fn dump_decisions(&self, kind: ResourceKind, outcome: &str) -> u64 {
        self.inner()
            .dump_decisions
            .with_label_values(&[kind.check_name(), outcome])
            .get()
    }

    pub fn inc_sample_errors(&self, kind: ResourceKind, error: &str) {
        self.inner()
            .sample_errors
            .with_label_values(&[kind.check_name(), error])
            .inc();
    }

    pub fn inc_capture_errors(&self, error: &str) {
        self.inner().capture_errors.with_label_values(&[error]).inc();
    }

    pub fn set_dumps_in_flight(&self, count: i64) {
        self.inner().dumps_in_flight.set(count);
    }
}

/// Decision record for outcomes worth reporting
///
/// Returns `None` for warm-up and quiet ticks.
pub fn decision_line(eval: &Evaluation, cfg: &TriggerConfig) -> Option<String> {
    let verdict = match eval.outcome {
        Outcome::Fired(_) => "fired",
        Outcome::CoolingDown(_) => "would-fire",
        Outcome::OverMax => "over-max",
        Outcome::WarmingUp | Outcome::Quiet => return None,
    };

    Some(format!(
        "[Holmes] {} {}, config_min: {}, config_diff: {}, config_abs: {}, config_max: {}, previous: {}, current: {}",
        eval.kind.check_name(),
        verdict,
        cfg.min,
        cfg.diff,
        cfg.abs,
        cfg.max,
        eval.previous,
        eval.current,
    ))
}

/// Structured logger for engine events
#[derive(Clone)]
pub struct StructuredLogger {
    instance: String,
}

impl StructuredLogger {
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
        }
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn log_startup(&self, version: &str, cgroup: &str, enabled: &[ResourceKind]) {
        let enabled: Vec<&str> = enabled.iter().map(|k| k.check_name()).collect();
        info!(
            event = "engine_started",
            instance = %self.instance,
            version = %version,
            cgroup = %cgroup,
            enabled = ?enabled,
            "Holmes engine started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "engine_shutdown",
            instance = %self.instance,
            reason = %reason,
            "Holmes engine shutting down"
        );
    }

    /// Log a fired, suppressed or over-max decision
    pub fn log_decision(&self, eval: &Evaluation, cfg: &TriggerConfig) {
        let Some(line) = decision_line(eval, cfg) else {
            return;
        };
        let reason = eval.outcome.reason().map(|r| r.to_string());

        match eval.outcome {
            Outcome::Fired(_) => info!(
                event = "dump_fired",
                instance = %self.instance,
                kind = %eval.kind,
                reason = ?reason,
                config_min = cfg.min,
                config_diff = cfg.diff,
                config_abs = cfg.abs,
                config_max = cfg.max,
                previous = eval.previous,
                current = eval.current,
                "{}", line
            ),
            _ => info!(
                event = "dump_skipped",
                instance = %self.instance,
                kind = %eval.kind,
                reason = ?reason,
                config_min = cfg.min,
                config_diff = cfg.diff,
                config_abs = cfg.abs,
                config_max = cfg.max,
                previous = eval.previous,
                current = eval.current,
                "{}", line
            ),
        }
    }

    pub fn log_sample_failure(&self, kind: ResourceKind, err: &SampleError) {
        warn!(
            event = "sample_failed",
            instance = %self.instance,
            kind = %kind,
            error = %err,
            "Sample failed, skipping kind this tick"
        );
    }

    pub fn log_dump_written(&self, record: &DumpRecord) {
        info!(
            event = "dump_written",
            instance = %self.instance,
            kind = %record.kind,
            path = %record.path.display(),
            bytes = record.bytes,
            "Dump written"
        );
    }

    pub fn log_capture_failure(&self, err: &CaptureError) {
        error!(
            event = "dump_failed",
            instance = %self.instance,
            error = %err,
            "Dump failed"
        );
    }

    /// Emit a trimmed textual profile
    pub fn log_text_dump(&self, kind: ResourceKind, text: &str) {
        info!(
            event = "dump_text",
            instance = %self.instance,
            kind = %kind,
            "[Holmes] {} dump\n{}", kind.check_name(), text
        );
    }
}
