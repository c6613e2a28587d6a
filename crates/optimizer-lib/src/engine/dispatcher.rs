//! Applies an admitted action to the workloads a profile targets
//!
//! Planning is pure: each workload snapshot becomes an [`Intent`] or a
//! skip reason. Applying goes through the [`WorkloadStore`], one workload
//! at a time; a failed write is recorded and the loop moves on.

use super::resize::{compute_resize, ResizeBounds};
use crate::models::{ActionKind, ScalableWorkload, Thresholds, WorkloadRef};
use crate::observability::ActionReporter;
use crate::quantity::CpuQuantity;
use crate::sources::WorkloadStore;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Inputs the vertical path needs besides the workload itself
#[derive(Debug, Clone, Copy)]
pub struct DispatchParams {
    pub observed_percent: f64,
    pub thresholds: Thresholds,
    pub bounds: ResizeBounds,
}

/// A mutation to request from the workload store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum Intent {
    SetReplicas {
        from: i32,
        to: i32,
    },
    SetCpuRequest {
        container_index: usize,
        container: String,
        from: CpuQuantity,
        to: CpuQuantity,
    },
}

impl Intent {
    /// True when applying the intent would not change anything
    pub fn is_unchanged(&self) -> bool {
        match self {
            Intent::SetReplicas { from, to } => from == to,
            Intent::SetCpuRequest { from, to, .. } => from == to,
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Intent::SetReplicas { from, to } => write!(f, "replicas {} -> {}", from, to),
            Intent::SetCpuRequest { container, from, to, .. } => {
                write!(f, "container {} cpu request {} -> {}", container, from, to)
            }
        }
    }
}

/// Why a workload was left alone
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason", content = "detail")]
pub enum SkipReason {
    /// No container in the pod template declares a cpu request
    NoCpuRequest,
    /// The targeted container's request is not a valid cpu quantity
    UnparseableCpuRequest { container: String, value: String },
    /// Thresholds give no usable resize target
    InvalidThresholds(String),
    /// Computed value equals the current one
    Unchanged(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::NoCpuRequest => f.write_str("no container declares a cpu request"),
            SkipReason::UnparseableCpuRequest { container, value } => {
                write!(f, "container {} has unparseable cpu request {:?}", container, value)
            }
            SkipReason::InvalidThresholds(detail) => write!(f, "{}", detail),
            SkipReason::Unchanged(intent) => write!(f, "already at target ({})", intent),
        }
    }
}

/// Per-workload result of a dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum Outcome {
    Applied { intent: Intent },
    Skipped { reason: SkipReason },
    Failed { error: String },
}

impl Outcome {
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Applied { .. } => "applied",
            Outcome::Skipped { .. } => "skipped",
            Outcome::Failed { .. } => "failed",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Applied { intent } => write!(f, "applied: {}", intent),
            Outcome::Skipped { reason } => write!(f, "skipped: {}", reason),
            Outcome::Failed { error } => write!(f, "failed: {}", error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadOutcome {
    pub workload: WorkloadRef,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// All outcomes of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub outcomes: Vec<WorkloadOutcome>,
}

impl DispatchReport {
    fn count(&self, label: &str) -> usize {
        self.outcomes.iter().filter(|o| o.outcome.label() == label).count()
    }

    pub fn applied(&self) -> usize {
        self.count("applied")
    }

    pub fn skipped(&self) -> usize {
        self.count("skipped")
    }

    pub fn failed(&self) -> usize {
        self.count("failed")
    }

    /// Every targeted workload failed; an empty report never counts
    pub fn all_failed(&self) -> bool {
        !self.outcomes.is_empty() && self.failed() == self.outcomes.len()
    }

    pub fn first_failure(&self) -> Option<&str> {
        self.outcomes.iter().find_map(|o| match &o.outcome {
            Outcome::Failed { error } => Some(error.as_str()),
            _ => None,
        })
    }

    /// One-line summary suitable for `lastAction.details`
    pub fn summary(&self) -> String {
        let mut out = format!(
            "{} applied, {} skipped, {} failed",
            self.applied(),
            self.skipped(),
            self.failed()
        );
        let applied: Vec<String> = self
            .outcomes
            .iter()
            .filter_map(|o| match &o.outcome {
                Outcome::Applied { intent } => Some(format!("{} {}", o.workload, intent)),
                _ => None,
            })
            .collect();
        if !applied.is_empty() {
            out.push_str(": ");
            out.push_str(&applied.join("; "));
        }
        out
    }
}

/// Plan the mutation `action` implies for one workload.
///
/// Horizontal actions move by exactly one replica and never below one.
/// Vertical actions target only the first container declaring a cpu request.
pub fn plan(
    action: ActionKind,
    workload: &ScalableWorkload,
    params: &DispatchParams,
) -> Result<Intent, SkipReason> {
    match action {
        ActionKind::ScaleUp | ActionKind::ScaleDown => {
            let from = workload.current_replicas();
            let to = if action == ActionKind::ScaleUp {
                from.saturating_add(1)
            } else {
                from.saturating_sub(1)
            };
            Ok(Intent::SetReplicas { from, to: to.max(1) })
        }
        ActionKind::ResizeUp | ActionKind::ResizeDown => {
            let (index, container) = workload
                .first_cpu_container()
                .ok_or(SkipReason::NoCpuRequest)?;
            let current = container
                .cpu_request
                .ok_or_else(|| SkipReason::UnparseableCpuRequest {
                    container: container.name.clone(),
                    value: container.unparsed_cpu_request.clone().unwrap_or_default(),
                })?;
            let to = compute_resize(
                params.observed_percent,
                current,
                &params.thresholds,
                &params.bounds,
            )
            .map_err(|e| SkipReason::InvalidThresholds(e.to_string()))?;
            Ok(Intent::SetCpuRequest {
                container_index: index,
                container: container.name.clone(),
                from: current,
                to,
            })
        }
        ActionKind::DoNothing => Ok(Intent::SetReplicas {
            from: workload.current_replicas(),
            to: workload.current_replicas(),
        }),
    }
}

/// Applies admitted actions through a workload store
pub struct Dispatcher {
    store: Arc<dyn WorkloadStore>,
    reporter: Arc<dyn ActionReporter>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn WorkloadStore>, reporter: Arc<dyn ActionReporter>) -> Self {
        Self { store, reporter }
    }

    /// Apply `action` to every workload, collecting one outcome each
    pub async fn dispatch(
        &self,
        action: ActionKind,
        workloads: &[ScalableWorkload],
        params: &DispatchParams,
    ) -> DispatchReport {
        if action.is_noop() {
            return DispatchReport::default();
        }

        let mut outcomes = Vec::with_capacity(workloads.len());
        for workload in workloads {
            let outcome = match plan(action, workload, params) {
                Err(reason) => Outcome::Skipped { reason },
                Ok(intent) if intent.is_unchanged() => Outcome::Skipped {
                    reason: SkipReason::Unchanged(intent.to_string()),
                },
                Ok(intent) => match self.apply(workload, &intent).await {
                    Ok(()) => Outcome::Applied { intent },
                    Err(error) => Outcome::Failed { error },
                },
            };

            let reference = workload.reference();
            match &outcome {
                Outcome::Applied { intent } => {
                    info!(
                        workload = %reference,
                        action = %action,
                        change = %intent,
                        "Patched workload"
                    );
                }
                Outcome::Skipped { reason } => {
                    debug!(
                        workload = %reference,
                        action = %action,
                        reason = %reason,
                        "Skipped workload"
                    );
                }
                Outcome::Failed { error } => {
                    warn!(
                        workload = %reference,
                        action = %action,
                        error = %error,
                        "Failed to patch workload"
                    );
                }
            }
            self.reporter.workload_outcome(&reference, action, &outcome);

            outcomes.push(WorkloadOutcome {
                workload: reference,
                outcome,
            });
        }

        DispatchReport { outcomes }
    }

    async fn apply(&self, workload: &ScalableWorkload, intent: &Intent) -> Result<(), String> {
        let result = match intent {
            Intent::SetReplicas { to, .. } => self.store.apply_replica_change(workload, *to).await,
            Intent::SetCpuRequest { container_index, to, .. } => {
                self.store.apply_quantity_change(workload, *container_index, *to).await
            }
        };
        result.map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::models::{ContainerResources, LabelSelector, WorkloadKind};
    use crate::observability::NoopReporter;
    use crate::sources::MemoryWorkloadStore;
    use std::collections::BTreeMap;

    fn params() -> DispatchParams {
        DispatchParams {
            observed_percent: 90.0,
            thresholds: Thresholds::new(30, 70),
            bounds: ResizeBounds::default(),
        }
    }

    fn workload(name: &str, replicas: Option<i32>, cpu: &[Option<i64>]) -> ScalableWorkload {
        ScalableWorkload {
            kind: WorkloadKind::Deployment,
            namespace: "default".into(),
            name: name.into(),
            labels: BTreeMap::from([("app".to_string(), "web".to_string())]),
            replicas,
            containers: cpu
                .iter()
                .enumerate()
                .map(|(i, m)| {
                    ContainerResources::new(format!("c{}", i), m.map(CpuQuantity::from_millis))
                })
                .collect(),
        }
    }

    #[test]
    fn test_plan_single_step_replicas() {
        let w = workload("web", Some(3), &[]);
        assert_eq!(
            plan(ActionKind::ScaleUp, &w, &params()),
            Ok(Intent::SetReplicas { from: 3, to: 4 })
        );
        assert_eq!(
            plan(ActionKind::ScaleDown, &w, &params()),
            Ok(Intent::SetReplicas { from: 3, to: 2 })
        );
    }

    #[test]
    fn test_plan_replica_floor() {
        let w = workload("web", Some(1), &[]);
        let intent = plan(ActionKind::ScaleDown, &w, &params()).unwrap();
        assert_eq!(intent, Intent::SetReplicas { from: 1, to: 1 });
        assert!(intent.is_unchanged());

        let w = workload("web", Some(0), &[]);
        assert_eq!(
            plan(ActionKind::ScaleDown, &w, &params()),
            Ok(Intent::SetReplicas { from: 0, to: 1 })
        );
    }

    #[test]
    fn test_plan_resize_targets_first_cpu_container_only() {
        let w = workload("web", Some(2), &[None, Some(500), Some(800)]);
        let intent = plan(ActionKind::ResizeUp, &w, &params()).unwrap();
        assert_eq!(
            intent,
            Intent::SetCpuRequest {
                container_index: 1,
                container: "c1".into(),
                from: CpuQuantity::from_millis(500),
                to: CpuQuantity::from_millis(1125),
            }
        );
    }

    #[test]
    fn test_plan_resize_without_cpu_request_is_skipped() {
        let w = workload("web", Some(2), &[None, None]);
        assert_eq!(plan(ActionKind::ResizeDown, &w, &params()), Err(SkipReason::NoCpuRequest));
    }

    #[test]
    fn test_plan_resize_unparseable_request_skips_workload() {
        let mut w = workload("web", Some(2), &[None, Some(500)]);
        w.containers[0] = ContainerResources::unparsed("c0", "1k");
        assert_eq!(
            plan(ActionKind::ResizeUp, &w, &params()),
            Err(SkipReason::UnparseableCpuRequest {
                container: "c0".to_string(),
                value: "1k".to_string(),
            })
        );
    }

    #[test]
    fn test_plan_resize_invalid_thresholds_is_skipped() {
        let w = workload("web", Some(2), &[Some(500)]);
        let mut p = params();
        p.thresholds = Thresholds::new(0, 0);
        assert!(matches!(
            plan(ActionKind::ResizeUp, &w, &p),
            Err(SkipReason::InvalidThresholds(_))
        ));
    }

    #[tokio::test]
    async fn test_dispatch_noop_writes_nothing() {
        let store = Arc::new(MemoryWorkloadStore::new());
        store.insert(workload("web", Some(2), &[])).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(NoopReporter));

        let workloads = store.list_scalable("default", &LabelSelector::default()).await.unwrap();
        let report = dispatcher.dispatch(ActionKind::DoNothing, &workloads, &params()).await;

        assert!(report.outcomes.is_empty());
        assert!(store.applied().await.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_continues_past_failures() {
        let store = Arc::new(MemoryWorkloadStore::new());
        store.insert(workload("stuck", Some(2), &[])).await;
        store.insert(workload("healthy", Some(2), &[])).await;
        store.fail_writes_for("stuck", SourceError::Transport("etcd timeout".into()));
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(NoopReporter));

        let workloads = store.list_scalable("default", &LabelSelector::default()).await.unwrap();
        let report = dispatcher.dispatch(ActionKind::ScaleUp, &workloads, &params()).await;

        assert_eq!(report.applied(), 1);
        assert_eq!(report.failed(), 1);
        assert!(!report.all_failed());
        assert!(report.first_failure().unwrap().contains("etcd timeout"));
        assert_eq!(store.get("default", "healthy").await.unwrap().replicas, Some(3));
        assert_eq!(store.get("default", "stuck").await.unwrap().replicas, Some(2));
    }

    #[tokio::test]
    async fn test_dispatch_floor_skips_write() {
        let store = Arc::new(MemoryWorkloadStore::new());
        store.insert(workload("web", Some(1), &[])).await;
        let dispatcher = Dispatcher::new(store.clone(), Arc::new(NoopReporter));

        let workloads = store.list_scalable("default", &LabelSelector::default()).await.unwrap();
        let report = dispatcher.dispatch(ActionKind::ScaleDown, &workloads, &params()).await;

        assert_eq!(report.skipped(), 1);
        assert!(store.applied().await.is_empty());
        assert_eq!(store.get("default", "web").await.unwrap().replicas, Some(1));
    }

    #[test]
    fn test_report_summary() {
        let report = DispatchReport {
            outcomes: vec![
                WorkloadOutcome {
                    workload: workload("a", Some(1), &[]).reference(),
                    outcome: Outcome::Applied { intent: Intent::SetReplicas { from: 1, to: 2 } },
                },
                WorkloadOutcome {
                    workload: workload("b", Some(1), &[]).reference(),
                    outcome: Outcome::Failed { error: "boom".into() },
                },
            ],
        };
        assert_eq!(
            report.summary(),
            "1 applied, 0 skipped, 1 failed: Deployment/default/a replicas 1 -> 2"
        );
    }
}
