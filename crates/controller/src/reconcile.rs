//! Watch-driven reconcile loop
//!
//! Every profile event runs at most one evaluation cycle. Status writes
//! produce watch events of their own, so the loop remembers when each
//! profile is next due and ignores events that arrive earlier unless the
//! spec generation changed.

use crate::k8s::ResourceOptimizerProfile;
use dashmap::DashMap;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher;
use kube::ResourceExt;
use optimizer_lib::{CycleOutcome, EngineError, HealthRegistry, Orchestrator, ProfileKey};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

/// Delay before retrying a cycle that failed with a transient error
pub const ERROR_REQUEUE: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("profile {0} has no namespace")]
    MissingNamespace(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl ReconcileError {
    fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::MissingNamespace(_) => false,
            ReconcileError::Engine(e) => e.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct NextRun {
    generation: Option<i64>,
    due: Instant,
}

/// State shared by every reconcile call
pub struct Context {
    pub orchestrator: Orchestrator,
    pub health: HealthRegistry,
    shutdown: watch::Receiver<bool>,
    schedule: DashMap<ProfileKey, NextRun>,
}

impl Context {
    pub fn new(
        orchestrator: Orchestrator,
        health: HealthRegistry,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            health,
            shutdown,
            schedule: DashMap::new(),
        }
    }

    /// Time left until `key` is due, if an event for `generation` arrives early
    fn not_yet_due(
        &self,
        key: &ProfileKey,
        generation: Option<i64>,
        now: Instant,
    ) -> Option<Duration> {
        let next = *self.schedule.get(key)?;
        (next.generation == generation && now < next.due).then(|| next.due - now)
    }

    /// Drop schedule entries overdue by more than two evaluation intervals.
    ///
    /// Deleted profiles are never reconciled again, so their entries only
    /// leave the schedule this way.
    fn prune_stale(&self, now: Instant) -> Vec<ProfileKey> {
        let grace = self.orchestrator.config().evaluation_interval * 2;
        let stale: Vec<ProfileKey> = self
            .schedule
            .iter()
            .filter(|entry| now.saturating_duration_since(entry.value().due) > grace)
            .map(|entry| entry.key().clone())
            .collect();
        for key in &stale {
            self.schedule.remove(key);
            self.orchestrator.forget(key);
        }
        stale
    }
}

pub async fn reconcile(
    obj: Arc<ResourceOptimizerProfile>,
    ctx: Arc<Context>,
) -> Result<Action, ReconcileError> {
    let namespace = obj
        .namespace()
        .ok_or_else(|| ReconcileError::MissingNamespace(obj.name_any()))?;
    let key = ProfileKey::new(namespace, obj.name_any());
    let generation = obj.metadata.generation;

    if let Some(wait) = ctx.not_yet_due(&key, generation, Instant::now()) {
        debug!(profile = %key, wait_secs = wait.as_secs(), "Profile not yet due");
        return Ok(Action::requeue(wait));
    }

    let mut shutdown = ctx.shutdown.clone();
    let result = ctx.orchestrator.run_cycle(&key, &mut shutdown).await;
    ctx.health.record_cycle(&result).await;

    match result {
        Ok(CycleOutcome::Evaluated(decision)) => {
            ctx.schedule.insert(
                key,
                NextRun {
                    generation,
                    due: Instant::now() + decision.requeue_after,
                },
            );
            Ok(Action::requeue(decision.requeue_after))
        }
        Ok(CycleOutcome::ProfileGone) => {
            ctx.schedule.remove(&key);
            ctx.orchestrator.forget(&key);
            Ok(Action::await_change())
        }
        Err(e) => {
            ctx.schedule.remove(&key);
            Err(e.into())
        }
    }
}

pub fn error_policy(
    obj: Arc<ResourceOptimizerProfile>,
    error: &ReconcileError,
    ctx: Arc<Context>,
) -> Action {
    if error.is_retryable() {
        warn!(profile = %obj.name_any(), error = %error, "Reconcile failed, retrying");
        Action::requeue(ERROR_REQUEUE)
    } else {
        // Waiting for a spec fix; the interval is a fallback.
        warn!(
            profile = %obj.name_any(),
            error = %error,
            "Reconcile failed, waiting for profile change"
        );
        Action::requeue(ctx.orchestrator.config().evaluation_interval)
    }
}

/// Run the controller until `shutdown` flips to true
pub async fn run(api: Api<ResourceOptimizerProfile>, ctx: Arc<Context>) {
    let mut stop = ctx.shutdown.clone();
    let (stopped_tx, stopped_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = stop.wait_for(|stop| *stop).await;
        let _ = stopped_tx.send(());
    });

    let prune_ctx = ctx.clone();
    let mut prune_stop = ctx.shutdown.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(prune_ctx.orchestrator.config().evaluation_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let pruned = prune_ctx.prune_stale(Instant::now());
                    if !pruned.is_empty() {
                        debug!(count = pruned.len(), "Pruned schedule entries of deleted profiles");
                    }
                }
                _ = prune_stop.wait_for(|stop| *stop) => break,
            }
        }
    });

    Controller::new(api, watcher::Config::default())
        .graceful_shutdown_on(async move {
            let _ = stopped_rx.await;
        })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((obj, _action)) => debug!(profile = %obj.name, "Reconciled"),
                Err(e) => debug!(error = %e, "Reconcile error"),
            }
        })
        .await;
    info!("Controller loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use optimizer_lib::sources::{MemoryMetricsSource, MemoryProfileStore, MemoryWorkloadStore};

    fn context() -> Context {
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryMetricsSource::new()),
            Arc::new(MemoryWorkloadStore::new()),
            Arc::new(MemoryProfileStore::new()),
        );
        let (_tx, rx) = watch::channel(false);
        Context::new(orchestrator, HealthRegistry::new(), rx)
    }

    #[test]
    fn test_early_event_waits_for_schedule() {
        let ctx = context();
        let key = ProfileKey::new("shop", "web");
        let now = Instant::now();
        ctx.schedule.insert(
            key.clone(),
            NextRun {
                generation: Some(1),
                due: now + Duration::from_secs(60),
            },
        );

        assert_eq!(ctx.not_yet_due(&key, Some(1), now), Some(Duration::from_secs(60)));
        // A spec change is evaluated immediately.
        assert_eq!(ctx.not_yet_due(&key, Some(2), now), None);
        assert_eq!(ctx.not_yet_due(&key, Some(1), now + Duration::from_secs(61)), None);
    }

    #[test]
    fn test_unknown_profile_is_due() {
        let ctx = context();
        let key = ProfileKey::new("shop", "web");
        assert_eq!(ctx.not_yet_due(&key, None, Instant::now()), None);
    }

    #[test]
    fn test_prune_drops_only_long_overdue_entries() {
        let ctx = context();
        let now = Instant::now();
        let interval = ctx.orchestrator.config().evaluation_interval;
        let live = ProfileKey::new("shop", "web");
        let deleted = ProfileKey::new("shop", "old");
        ctx.schedule.insert(
            live.clone(),
            NextRun {
                generation: Some(1),
                due: now + interval * 3,
            },
        );
        ctx.schedule.insert(
            deleted.clone(),
            NextRun {
                generation: Some(1),
                due: now,
            },
        );

        assert!(ctx.prune_stale(now + interval).is_empty());

        let pruned = ctx.prune_stale(now + interval * 3);
        assert_eq!(pruned, vec![deleted.clone()]);
        assert!(ctx.schedule.contains_key(&live));
        assert!(!ctx.schedule.contains_key(&deleted));
    }

    #[test]
    fn test_missing_namespace_not_retryable() {
        assert!(!ReconcileError::MissingNamespace("web".into()).is_retryable());
        assert!(ReconcileError::Engine(EngineError::Cancelled).is_retryable());
    }
}
