//! One evaluation cycle per profile
//!
//! ```text
//! Start -> Sampled -> Classified -> Gated -> Acted | Blocked | NoOp -> Reported
//!                               \-> Recommended ---------------------/
//! Start -> NoData -> Reported
//! ```
//!
//! A cycle reads the profile, samples the metrics source, decides, acts,
//! and writes the whole status in a single call at the end. Nothing is
//! cached between cycles; all per-profile memory lives in the status.

use super::aggregator::{aggregate, Aggregate};
use super::classifier::{classify, Classification};
use super::cooldown::{CooldownGate, DEFAULT_COOLDOWN};
use super::dispatcher::{DispatchParams, DispatchReport, Dispatcher, WorkloadOutcome};
use super::resize::ResizeBounds;
use crate::error::EngineError;
use crate::models::{
    ActionKind, ActionRecord, PolicyKind, ProfileKey, ProfileSpec, ProfileStatus, Thresholds,
    CPU_USAGE_METRIC, NO_DATA_MARKER,
};
use crate::observability::{ActionReporter, NoopReporter, StructuredLogger};
use crate::sources::{MetricsSource, ProfileStore, WorkloadStore};
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::debug;

/// Default delay between two evaluations of the same profile
pub const DEFAULT_EVALUATION_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Delay after a cycle that saw no samples
pub const DEFAULT_NO_DATA_REQUEUE: Duration = Duration::from_secs(5 * 60);

/// Engine-wide defaults
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cooldown for profiles that do not set `cooldownPeriod`
    pub default_cooldown: Duration,
    /// Fixed re-evaluation interval, independent of cooldown
    pub evaluation_interval: Duration,
    pub no_data_requeue: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_cooldown: DEFAULT_COOLDOWN,
            evaluation_interval: DEFAULT_EVALUATION_INTERVAL,
            no_data_requeue: DEFAULT_NO_DATA_REQUEUE,
        }
    }
}

/// Profile settings with all defaults applied, resolved once per cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSettings {
    pub cooldown: Duration,
    pub evaluation_interval: Duration,
    pub bounds: ResizeBounds,
}

impl ResolvedSettings {
    pub fn resolve(spec: &ProfileSpec, config: &EngineConfig) -> Self {
        Self {
            cooldown: spec.cooldown_period.unwrap_or(config.default_cooldown),
            evaluation_interval: config.evaluation_interval,
            bounds: ResizeBounds::new(spec.min_cpu, spec.max_cpu),
        }
    }
}

/// States a cycle passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CycleState {
    Start,
    NoData,
    Sampled,
    Classified,
    Gated,
    Acted,
    Blocked,
    Recommended,
    NoOp,
    Reported,
}

impl CycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleState::Start => "start",
            CycleState::NoData => "no_data",
            CycleState::Sampled => "sampled",
            CycleState::Classified => "classified",
            CycleState::Gated => "gated",
            CycleState::Acted => "acted",
            CycleState::Blocked => "blocked",
            CycleState::Recommended => "recommended",
            CycleState::NoOp => "noop",
            CycleState::Reported => "reported",
        }
    }
}

/// Side-effect-free verdict of a cycle, before any actuation
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    NoData,
    /// Value inside the goldilocks zone for a Scale or Resize profile
    NoOp { value: f64 },
    /// Real action held back by the cooldown gate
    Blocked {
        value: f64,
        action: ActionKind,
        remaining: Duration,
    },
    /// Real action cleared for actuation
    Admitted { value: f64, action: ActionKind },
    /// Recommend policy; `None` clears stored recommendations
    Recommend { value: f64, recommendation: Option<String> },
}

impl Evaluation {
    pub fn value(&self) -> Option<f64> {
        match self {
            Evaluation::NoData => None,
            Evaluation::NoOp { value }
            | Evaluation::Blocked { value, .. }
            | Evaluation::Admitted { value, .. }
            | Evaluation::Recommend { value, .. } => Some(*value),
        }
    }

    pub fn action(&self) -> ActionKind {
        match self {
            Evaluation::Blocked { action, .. } | Evaluation::Admitted { action, .. } => *action,
            _ => ActionKind::DoNothing,
        }
    }

    fn states(&self) -> &'static [CycleState] {
        use CycleState::*;
        match self {
            Evaluation::NoData => &[NoData],
            Evaluation::NoOp { .. } => &[Sampled, Classified, Gated, NoOp],
            Evaluation::Blocked { .. } => &[Sampled, Classified, Gated, Blocked],
            Evaluation::Admitted { .. } => &[Sampled, Classified, Gated, Acted],
            Evaluation::Recommend { .. } => &[Sampled, Classified, Recommended],
        }
    }

    /// Delay until the next evaluation
    pub fn requeue_after(&self, settings: &ResolvedSettings, config: &EngineConfig) -> Duration {
        match self {
            Evaluation::NoData => config.no_data_requeue,
            Evaluation::Blocked { remaining, .. } => (*remaining).min(settings.evaluation_interval),
            _ => settings.evaluation_interval,
        }
    }
}

/// Human-readable advice for the Recommend policy
pub fn recommendation_text(action: ActionKind, value: f64, thresholds: &Thresholds) -> String {
    match action {
        ActionKind::ScaleUp | ActionKind::ResizeUp => format!(
            "{}: average cpu {:.2}% is above the {}% threshold; {}",
            action, value, thresholds.max, "consider adding a replica or raising the cpu request"
        ),
        ActionKind::ScaleDown | ActionKind::ResizeDown => format!(
            "{}: average cpu {:.2}% is below the {}% threshold; {}",
            action, value, thresholds.min, "consider removing a replica or lowering the cpu request"
        ),
        ActionKind::DoNothing => {
            format!("{}: average cpu {:.2}% is within thresholds", action, value)
        }
    }
}

/// Classify and gate one aggregated value. Pure: same inputs, same verdict.
pub fn evaluate(
    spec: &ProfileSpec,
    last_action: Option<&ActionRecord>,
    aggregate: Aggregate,
    settings: &ResolvedSettings,
    now: DateTime<Utc>,
) -> Evaluation {
    let value = match aggregate {
        Aggregate::NoData => return Evaluation::NoData,
        Aggregate::Value(v) => v,
    };

    match classify(value, &spec.cpu_thresholds, spec.optimization_policy) {
        Classification::Advise(action) => Evaluation::Recommend {
            value,
            recommendation: Some(recommendation_text(action, value, &spec.cpu_thresholds)),
        },
        Classification::NoAction if spec.optimization_policy == PolicyKind::Recommend => {
            Evaluation::Recommend {
                value,
                recommendation: None,
            }
        }
        Classification::NoAction => Evaluation::NoOp { value },
        Classification::Actuate(action) => {
            let gate = CooldownGate::new(settings.cooldown);
            match gate.check(action, last_action, now).requeue_after() {
                Some(remaining) => Evaluation::Blocked {
                    value,
                    action,
                    remaining,
                },
                None => Evaluation::Admitted { value, action },
            }
        }
    }
}

/// Status to write at the end of a cycle
pub fn next_status(
    previous: &ProfileStatus,
    policy: PolicyKind,
    evaluation: &Evaluation,
    record: Option<ActionRecord>,
) -> ProfileStatus {
    let mut status = previous.clone();
    let observed = match evaluation.value() {
        Some(value) => format!("{:.2}", value),
        None => NO_DATA_MARKER.to_string(),
    };
    status.observed_metrics = BTreeMap::from([(CPU_USAGE_METRIC.to_string(), observed)]);

    match evaluation {
        Evaluation::NoData => {}
        Evaluation::Recommend { recommendation, .. } => {
            status.recommendations = recommendation.iter().cloned().collect();
        }
        _ => {
            if policy != PolicyKind::Recommend {
                status.recommendations.clear();
            }
        }
    }
    if let Some(record) = record {
        status.last_action = Some(record);
    }
    status
}

fn serialize_secs<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(d.as_secs_f64())
}

/// Output of one completed cycle
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Decision {
    pub profile: ProfileKey,
    pub policy: PolicyKind,
    pub action: ActionKind,
    /// Representative value, `None` when the cycle had no data
    pub value: Option<f64>,
    #[serde(rename = "requeueAfterSecs", serialize_with = "serialize_secs")]
    pub requeue_after: Duration,
    pub recommendations: Vec<String>,
    pub new_action_record: Option<ActionRecord>,
    pub outcomes: Vec<WorkloadOutcome>,
    pub status: ProfileStatus,
    pub path: Vec<CycleState>,
}

impl Decision {
    /// Terminal state reached before `Reported`
    pub fn state(&self) -> CycleState {
        self.path
            .iter()
            .rev()
            .copied()
            .find(|s| *s != CycleState::Reported)
            .unwrap_or(CycleState::Start)
    }
}

/// Result of `Orchestrator::run_cycle`
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    Evaluated(Box<Decision>),
    /// The profile was deleted before the cycle ran
    ProfileGone,
}

async fn cancelled(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        // Sender dropped: nobody can cancel any more.
        std::future::pending::<()>().await;
    }
}

fn is_cancelled(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}

/// Drives evaluation cycles against the external collaborators
pub struct Orchestrator {
    metrics: Arc<dyn MetricsSource>,
    workloads: Arc<dyn WorkloadStore>,
    profiles: Arc<dyn ProfileStore>,
    reporter: Arc<dyn ActionReporter>,
    logger: StructuredLogger,
    config: EngineConfig,
}

impl Orchestrator {
    pub fn new(
        metrics: Arc<dyn MetricsSource>,
        workloads: Arc<dyn WorkloadStore>,
        profiles: Arc<dyn ProfileStore>,
    ) -> Self {
        Self {
            metrics,
            workloads,
            profiles,
            reporter: Arc::new(NoopReporter),
            logger: StructuredLogger::new("orchestrator"),
            config: EngineConfig::default(),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ActionReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_logger(mut self, logger: StructuredLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Release per-profile reporter state for a deleted profile
    pub fn forget(&self, key: &ProfileKey) {
        self.reporter.profile_removed(key);
    }

    /// Run one cycle for `key` as of the current time
    pub async fn run_cycle(
        &self,
        key: &ProfileKey,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, EngineError> {
        self.run_cycle_at(key, Utc::now(), shutdown).await
    }

    /// Run one cycle for `key` as of `now`.
    ///
    /// On error nothing has been written to the profile status. A set
    /// shutdown signal aborts the cycle before the next collaborator call.
    pub async fn run_cycle_at(
        &self,
        key: &ProfileKey,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, EngineError> {
        let result = self.cycle(key, now, shutdown).await;
        match &result {
            Ok(CycleOutcome::Evaluated(decision)) => {
                self.reporter
                    .cycle_evaluated(key, decision.policy, decision.state(), decision.action);
                self.logger.log_cycle(decision);
            }
            Ok(CycleOutcome::ProfileGone) => {
                debug!(profile = %key, "Profile no longer exists, nothing to do");
            }
            Err(error) => {
                self.reporter.cycle_failed(key, error);
                self.logger.log_cycle_failed(key, error);
            }
        }
        result
    }

    async fn cycle(
        &self,
        key: &ProfileKey,
        now: DateTime<Utc>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<CycleOutcome, EngineError> {
        let mut path = vec![CycleState::Start];

        let profile = tokio::select! {
            res = self.profiles.get(key) => match res {
                Ok(profile) => profile,
                Err(e) if e.is_not_found() => return Ok(CycleOutcome::ProfileGone),
                Err(e) => return Err(EngineError::Profile(e)),
            },
            _ = cancelled(shutdown) => return Err(EngineError::Cancelled),
        };
        let spec = &profile.spec;
        let settings = ResolvedSettings::resolve(spec, &self.config);

        let expression = self.metrics.expression(&profile);
        let samples = tokio::select! {
            res = self.metrics.query(&expression, now) => res.map_err(EngineError::Metrics)?,
            _ = cancelled(shutdown) => return Err(EngineError::Cancelled),
        };
        let aggregate = aggregate(&samples);
        self.reporter.observed_value(key, aggregate.as_option());

        let last_action = profile.status.last_action.as_ref();
        let evaluation = evaluate(spec, last_action, aggregate, &settings, now);
        path.extend_from_slice(evaluation.states());

        let mut report = DispatchReport::default();
        let mut record = None;
        match &evaluation {
            Evaluation::Admitted { value, action } => {
                if is_cancelled(shutdown) {
                    return Err(EngineError::Cancelled);
                }
                let workloads = tokio::select! {
                    res = self.workloads.list_scalable(&key.namespace, &spec.selector) => {
                        res.map_err(EngineError::Workloads)?
                    }
                    _ = cancelled(shutdown) => return Err(EngineError::Cancelled),
                };

                let params = DispatchParams {
                    observed_percent: *value,
                    thresholds: spec.cpu_thresholds,
                    bounds: settings.bounds,
                };
                report = Dispatcher::new(self.workloads.clone(), self.reporter.clone())
                    .dispatch(*action, &workloads, &params)
                    .await;

                if report.all_failed() {
                    return Err(EngineError::Actuation {
                        failed: report.failed(),
                        first: report.first_failure().unwrap_or_default().to_string(),
                    });
                }
                record = Some(ActionRecord::new(*action, now, report.summary()));
            }
            Evaluation::Blocked { action, remaining, .. } => {
                self.reporter.action_blocked(key, *action, *remaining);
            }
            _ => {}
        }

        let status = next_status(
            &profile.status,
            spec.optimization_policy,
            &evaluation,
            record.clone(),
        );
        // Applied patches always get their action record persisted before a
        // shutdown is surfaced.
        let committed = report.applied() > 0;
        if !committed && is_cancelled(shutdown) {
            return Err(EngineError::Cancelled);
        }
        self.profiles
            .write_status(&profile, &status)
            .await
            .map_err(EngineError::Status)?;
        if committed && is_cancelled(shutdown) {
            return Err(EngineError::Cancelled);
        }
        path.push(CycleState::Reported);

        Ok(CycleOutcome::Evaluated(Box::new(Decision {
            profile: key.clone(),
            policy: spec.optimization_policy,
            action: evaluation.action(),
            value: evaluation.value(),
            requeue_after: evaluation.requeue_after(&settings, &self.config),
            recommendations: status.recommendations.clone(),
            new_action_record: record,
            outcomes: report.outcomes,
            status,
            path,
        })))
    }
}
