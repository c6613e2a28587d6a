//! Observability for the optimizer engine
//!
//! Provides:
//! - The [`ActionReporter`] seam the engine reports cycle results through
//! - Prometheus counters and gauges registered into a caller-owned registry
//! - Structured JSON logging with tracing

use crate::engine::{CycleState, Decision, Outcome};
use crate::error::EngineError;
use crate::models::{ActionKind, PolicyKind, ProfileKey, WorkloadRef};
use prometheus::{GaugeVec, IntCounterVec, Opts, Registry};
use std::time::Duration;
use tracing::{info, warn};

/// Receives engine events. Every method defaults to doing nothing.
pub trait ActionReporter: Send + Sync {
    /// Representative value of a cycle, `None` when it had no data
    fn observed_value(&self, _profile: &ProfileKey, _value: Option<f64>) {}

    fn cycle_evaluated(
        &self,
        _profile: &ProfileKey,
        _policy: PolicyKind,
        _state: CycleState,
        _action: ActionKind,
    ) {
    }

    fn action_blocked(&self, _profile: &ProfileKey, _action: ActionKind, _remaining: Duration) {}

    fn workload_outcome(&self, _workload: &WorkloadRef, _action: ActionKind, _outcome: &Outcome) {}

    fn cycle_failed(&self, _profile: &ProfileKey, _error: &EngineError) {}

    /// The profile was deleted; drop any per-profile state
    fn profile_removed(&self, _profile: &ProfileKey) {}
}

/// Reporter that drops every event
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopReporter;

impl ActionReporter for NoopReporter {}

/// Exports engine events as Prometheus metrics
#[derive(Clone)]
pub struct PrometheusReporter {
    cycles_total: IntCounterVec,
    actions_blocked_total: IntCounterVec,
    workload_outcomes_total: IntCounterVec,
    cycle_failures_total: IntCounterVec,
    observed_cpu_percent: GaugeVec,
}

impl PrometheusReporter {
    /// Create the metrics and register them into `registry`
    pub fn new(registry: &Registry) -> prometheus::Result<Self> {
        let cycles_total = IntCounterVec::new(
            Opts::new("k20s_cycles_total", "Evaluation cycles completed"),
            &["policy", "state", "action"],
        )?;
        let actions_blocked_total = IntCounterVec::new(
            Opts::new("k20s_actions_blocked_total", "Actions held back by the cooldown gate"),
            &["action"],
        )?;
        let workload_outcomes_total = IntCounterVec::new(
            Opts::new("k20s_workload_outcomes_total", "Per-workload dispatch outcomes"),
            &["action", "outcome"],
        )?;
        let cycle_failures_total = IntCounterVec::new(
            Opts::new("k20s_cycle_failures_total", "Evaluation cycles that ended in an error"),
            &["retryable"],
        )?;
        let observed_cpu_percent = GaugeVec::new(
            Opts::new(
                "k20s_observed_cpu_percent",
                "Average cpu utilization observed in the last cycle",
            ),
            &["profile"],
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(actions_blocked_total.clone()))?;
        registry.register(Box::new(workload_outcomes_total.clone()))?;
        registry.register(Box::new(cycle_failures_total.clone()))?;
        registry.register(Box::new(observed_cpu_percent.clone()))?;

        Ok(Self {
            cycles_total,
            actions_blocked_total,
            workload_outcomes_total,
            cycle_failures_total,
            observed_cpu_percent,
        })
    }
}

impl ActionReporter for PrometheusReporter {
    fn observed_value(&self, profile: &ProfileKey, value: Option<f64>) {
        let label = profile.to_string();
        match value {
            Some(v) => self.observed_cpu_percent.with_label_values(&[&label]).set(v),
            // A stale gauge would read as a real measurement.
            None => {
                let _ = self.observed_cpu_percent.remove_label_values(&[&label]);
            }
        }
    }

    fn cycle_evaluated(
        &self,
        _profile: &ProfileKey,
        policy: PolicyKind,
        state: CycleState,
        action: ActionKind,
    ) {
        self.cycles_total
            .with_label_values(&[policy.as_str(), state.as_str(), action.as_str()])
            .inc();
    }

    fn action_blocked(&self, _profile: &ProfileKey, action: ActionKind, _remaining: Duration) {
        self.actions_blocked_total.with_label_values(&[action.as_str()]).inc();
    }

    fn workload_outcome(&self, _workload: &WorkloadRef, action: ActionKind, outcome: &Outcome) {
        self.workload_outcomes_total
            .with_label_values(&[action.as_str(), outcome.label()])
            .inc();
    }

    fn cycle_failed(&self, _profile: &ProfileKey, error: &EngineError) {
        let retryable = if error.is_retryable() { "true" } else { "false" };
        self.cycle_failures_total.with_label_values(&[retryable]).inc();
    }

    fn profile_removed(&self, profile: &ProfileKey) {
        let _ = self
            .observed_cpu_percent
            .remove_label_values(&[&profile.to_string()]);
    }
}

/// Structured logger for optimizer events
///
/// Emits JSON-friendly tracing events with a stable `event` key.
#[derive(Debug, Clone)]
pub struct StructuredLogger {
    component: String,
}

impl StructuredLogger {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn component(&self) -> &str {
        &self.component
    }

    /// Log the end of a successful cycle
    pub fn log_cycle(&self, decision: &Decision) {
        let profile = decision.profile.to_string();
        let requeue_secs = decision.requeue_after.as_secs();
        match decision.state() {
            CycleState::Acted => {
                let details = decision
                    .new_action_record
                    .as_ref()
                    .map(|r| r.details.as_str())
                    .unwrap_or_default();
                info!(
                    event = "action_applied",
                    component = %self.component,
                    profile = %profile,
                    policy = %decision.policy,
                    action = %decision.action,
                    value = ?decision.value,
                    details = %details,
                    requeue_secs = requeue_secs,
                    "Applied optimization action"
                );
            }
            CycleState::Blocked => {
                info!(
                    event = "action_blocked",
                    component = %self.component,
                    profile = %profile,
                    action = %decision.action,
                    value = ?decision.value,
                    requeue_secs = requeue_secs,
                    "Action blocked by cooldown"
                );
            }
            CycleState::NoData => {
                warn!(
                    event = "no_data",
                    component = %self.component,
                    profile = %profile,
                    requeue_secs = requeue_secs,
                    "No cpu samples for profile"
                );
            }
            state => {
                info!(
                    event = "cycle_completed",
                    component = %self.component,
                    profile = %profile,
                    policy = %decision.policy,
                    state = state.as_str(),
                    value = ?decision.value,
                    recommendations = decision.recommendations.len(),
                    requeue_secs = requeue_secs,
                    "Evaluation cycle completed"
                );
            }
        }
    }

    pub fn log_cycle_failed(&self, profile: &ProfileKey, error: &EngineError) {
        warn!(
            event = "cycle_failed",
            component = %self.component,
            profile = %profile,
            retryable = error.is_retryable(),
            error = %error,
            "Evaluation cycle failed"
        );
    }

    /// Log controller startup
    pub fn log_startup(&self, version: &str, metrics_endpoint: &str) {
        info!(
            event = "controller_started",
            component = %self.component,
            version = %version,
            metrics_endpoint = %metrics_endpoint,
            "Resource optimizer started"
        );
    }

    /// Log controller shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "controller_shutdown",
            component = %self.component,
            reason = %reason,
            "Resource optimizer shutting down"
        );
    }
}
