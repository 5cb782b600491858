//! Vendor-agnostic metrics collection via a pluggable sink.
//!
//! The engine reports every evaluation and every reload to a process-wide
//! [`MetricsSink`]. Nothing is collected until a sink is installed with
//! [`set_sink`].
//!
//! ```ignore
//! use treetop_slice::metrics::{MetricsSink, EvaluationStats, ReloadStats};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! struct Counter {
//!     evals: AtomicU64,
//! }
//!
//! impl MetricsSink for Counter {
//!     fn on_evaluation(&self, stats: &EvaluationStats) {
//!         self.evals.fetch_add(1, Ordering::Relaxed);
//!     }
//!
//!     fn on_reload(&self, stats: &ReloadStats) {
//!         eprintln!("slice {} loaded", stats.version_hash);
//!     }
//! }
//!
//! treetop_slice::metrics::set_sink(Arc::new(Counter { evals: AtomicU64::new(0) }));
//! ```

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime};
use tracing::warn;

use crate::timers::PhaseDurations;
use crate::types::{Decision, Request};

/// Snapshot of a single evaluation, passed to [`MetricsSink::on_evaluation`].
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationStats {
    /// Wall-clock time of the whole `PolicyEngine::evaluate` call.
    pub duration: Duration,
    pub allowed: bool,
    /// Principal UID in text form, e.g. `User::"alice"`.
    pub principal_id: String,
    pub action_id: String,
    pub resource_id: String,
    /// Ids of the determining policies.
    pub determining_policies: Vec<String>,
    /// Number of condition errors recorded on the decision.
    pub errors: usize,
}

impl EvaluationStats {
    pub(crate) fn new(request: &Request, decision: &Decision, duration: Duration) -> Self {
        EvaluationStats {
            duration,
            allowed: decision.allowed,
            principal_id: request.principal.to_string(),
            action_id: request.action.to_string(),
            resource_id: request.resource.to_string(),
            determining_policies: decision
                .determining_policies
                .iter()
                .map(|id| id.to_string())
                .collect(),
            errors: decision.errors.len(),
        }
    }
}

/// Evaluation time broken down by phase, in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationPhases {
    /// Scope matching over the whole policy set.
    pub scope_ms: f64,
    /// Condition evaluation of the scope matches.
    pub conditions_ms: f64,
    pub total_ms: f64,
}

impl EvaluationPhases {
    pub(crate) fn new(phases: &PhaseDurations, total: Duration) -> Self {
        EvaluationPhases {
            scope_ms: phases.scope.as_secs_f64() * 1_000.0,
            conditions_ms: phases.conditions.as_secs_f64() * 1_000.0,
            total_ms: total.as_secs_f64() * 1_000.0,
        }
    }

    /// Time not accounted for by the measured phases.
    pub fn overhead_ms(&self) -> f64 {
        self.total_ms - (self.scope_ms + self.conditions_ms)
    }
}

/// Passed to [`MetricsSink::on_reload`] after a new slice is installed.
#[derive(Debug, Clone, Serialize)]
pub struct ReloadStats {
    pub reload_time: SystemTime,
    /// Hash of the slice now being served.
    pub version_hash: String,
    /// Evaluable policies, linked templates included.
    pub policies: usize,
    pub entities: usize,
    /// Template links skipped while building the slice.
    pub link_errors: usize,
}

/// Consumer of evaluation and reload metrics.
///
/// Called synchronously from `PolicyEngine::evaluate`, possibly from many
/// threads at once, so implementations must be cheap and must not block.
pub trait MetricsSink: Send + Sync {
    fn on_evaluation(&self, stats: &EvaluationStats);

    /// Called after every successful reload.
    fn on_reload(&self, stats: &ReloadStats);

    /// Called only when phase timings are enabled in the engine config.
    fn on_evaluation_phases(&self, _stats: &EvaluationStats, _phases: &EvaluationPhases) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// Install the global metrics sink.
///
/// The sink can be set once per process; install it at startup, before the
/// first evaluation. Later calls are ignored with a warning.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            "Metrics sink was already initialized. Ignoring subsequent set_sink call. Set the sink before the first evaluation."
        );
    }
}

/// The installed sink; events are dropped until one is set.
pub(crate) fn get_sink() -> Option<&'static dyn MetricsSink> {
    SINK.get().map(|sink| sink.as_ref())
}

pub(crate) fn record_evaluation(stats: &EvaluationStats) {
    if let Some(sink) = get_sink() {
        sink.on_evaluation(stats);
    }
}

pub(crate) fn record_evaluation_phases(stats: &EvaluationStats, phases: &EvaluationPhases) {
    if let Some(sink) = get_sink() {
        sink.on_evaluation_phases(stats, phases);
    }
}

pub(crate) fn record_reload(stats: ReloadStats) {
    if let Some(sink) = get_sink() {
        sink.on_reload(&stats);
    }
}
