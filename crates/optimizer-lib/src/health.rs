//! Component health for liveness and readiness checks
//!
//! The controller registers one entry per external collaborator and
//! feeds every cycle result through [`HealthRegistry::record_cycle`].

use crate::engine::{CycleOutcome, Outcome};
use crate::error::EngineError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Recent calls failed but the controller keeps retrying
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check: Utc::now(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Body of `/healthz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components; healthy when there are none
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, status| match (worst, status) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

/// Body of `/readyz`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const METRICS_SOURCE: &str = "metrics_source";
    pub const WORKLOAD_STORE: &str = "workload_store";
    pub const PROFILE_STORE: &str = "profile_store";

    pub const ALL: [&str; 3] = [METRICS_SOURCE, WORKLOAD_STORE, PROFILE_STORE];
}

/// Shared, cloneable registry of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every collaborator registered as healthy
    pub async fn with_default_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Fold the result of one evaluation cycle into component health.
    ///
    /// A failing collaborator is marked degraded; a successful cycle marks
    /// the collaborators it reached as healthy again. Any failed workload
    /// patch keeps the workload store degraded even when the cycle succeeds.
    pub async fn record_cycle(&self, result: &Result<CycleOutcome, EngineError>) {
        match result {
            Ok(CycleOutcome::ProfileGone) => self.set_healthy(components::PROFILE_STORE).await,
            Ok(CycleOutcome::Evaluated(decision)) => {
                self.set_healthy(components::PROFILE_STORE).await;
                self.set_healthy(components::METRICS_SOURCE).await;
                let failure = decision.outcomes.iter().find_map(|o| match &o.outcome {
                    Outcome::Failed { error } => Some(format!("{}: {}", o.workload, error)),
                    _ => None,
                });
                match failure {
                    Some(message) => self.set_degraded(components::WORKLOAD_STORE, message).await,
                    None if !decision.outcomes.is_empty() => {
                        self.set_healthy(components::WORKLOAD_STORE).await
                    }
                    None => {}
                }
            }
            Err(error @ EngineError::Metrics(_)) => {
                self.set_degraded(components::METRICS_SOURCE, error.to_string()).await
            }
            Err(error @ (EngineError::Workloads(_) | EngineError::Actuation { .. })) => {
                self.set_degraded(components::WORKLOAD_STORE, error.to_string()).await
            }
            Err(error @ (EngineError::Profile(_) | EngineError::Status(_))) => {
                self.set_degraded(components::PROFILE_STORE, error.to_string()).await
            }
            Err(EngineError::InvalidThresholds { .. } | EngineError::Cancelled) => {}
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        let ready = *self.ready.read().await;
        let health = self.health().await;

        let reason = if !ready {
            Some("Controller not yet initialized")
        } else if health.status == ComponentStatus::Unhealthy {
            Some("Critical component unhealthy")
        } else {
            None
        };
        ReadinessResponse {
            ready: reason.is_none(),
            reason: reason.map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Orchestrator;
    use crate::error::SourceError;
    use crate::models::{
        LabelSelector, PolicyKind, Profile, ProfileKey, ProfileSpec, ScalableWorkload, Thresholds,
        WorkloadKind,
    };
    use crate::sources::{MemoryMetricsSource, MemoryProfileStore, MemoryWorkloadStore};
    use tokio::sync::watch;

    #[tokio::test]
    async fn test_health_registry_initial_state() {
        let registry = HealthRegistry::new();
        let health = registry.health().await;

        assert_eq!(health.status, ComponentStatus::Healthy);
        assert!(health.components.is_empty());
    }

    #[tokio::test]
    async fn test_default_components_registered() {
        let registry = HealthRegistry::with_default_components().await;
        let health = registry.health().await;
        for name in components::ALL {
            assert_eq!(health.components[name].status, ComponentStatus::Healthy);
        }
    }

    #[tokio::test]
    async fn test_metrics_failure_degrades_metrics_source() {
        let registry = HealthRegistry::with_default_components().await;
        let result = Err(EngineError::Metrics(SourceError::Transport("connection refused".into())));
        registry.record_cycle(&result).await;

        let health = registry.health().await;
        assert_eq!(health.status, ComponentStatus::Degraded);
        assert_eq!(
            health.components[components::METRICS_SOURCE].status,
            ComponentStatus::Degraded
        );
        assert!(health.components[components::METRICS_SOURCE]
            .message
            .as_deref()
            .unwrap_or_default()
            .contains("connection refused"));
    }

    #[tokio::test]
    async fn test_profile_gone_recovers_profile_store() {
        let registry = HealthRegistry::with_default_components().await;
        registry
            .record_cycle(&Err(EngineError::Status(SourceError::Conflict("stale".into()))))
            .await;
        registry.record_cycle(&Ok(CycleOutcome::ProfileGone)).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    fn workload(name: &str) -> ScalableWorkload {
        ScalableWorkload {
            kind: WorkloadKind::Deployment,
            namespace: "shop".into(),
            name: name.into(),
            labels: [("app".to_string(), "web".to_string())].into(),
            replicas: Some(2),
            containers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_partial_actuation_failure_degrades_workload_store() {
        let workloads = Arc::new(MemoryWorkloadStore::new());
        workloads.insert(workload("web")).await;
        workloads.insert(workload("db")).await;
        workloads.fail_writes_for("db", SourceError::Transport("etcd timeout".into()));

        let profiles = Arc::new(MemoryProfileStore::new());
        let key = ProfileKey::new("shop", "web-profile");
        profiles.insert(Profile::new(
            key.clone(),
            ProfileSpec::new(
                LabelSelector::from_labels([("app", "web")]),
                Thresholds::new(20, 60),
                PolicyKind::Scale,
            ),
        ));
        let orchestrator = Orchestrator::new(
            Arc::new(MemoryMetricsSource::with_values(&[90.0])),
            workloads,
            profiles,
        );
        let (_tx, mut rx) = watch::channel(false);
        let result = orchestrator.run_cycle(&key, &mut rx).await;
        assert!(result.is_ok());

        let registry = HealthRegistry::with_default_components().await;
        registry.record_cycle(&result).await;

        let health = registry.health().await;
        let store = &health.components[components::WORKLOAD_STORE];
        assert_eq!(store.status, ComponentStatus::Degraded);
        assert!(store.message.as_deref().unwrap_or_default().contains("etcd timeout"));
        assert_eq!(
            health.components[components::METRICS_SOURCE].status,
            ComponentStatus::Healthy
        );
    }

    #[tokio::test]
    async fn test_cancelled_cycle_changes_nothing() {
        let registry = HealthRegistry::with_default_components().await;
        registry.record_cycle(&Err(EngineError::Cancelled)).await;
        assert_eq!(registry.health().await.status, ComponentStatus::Healthy);
    }

    #[tokio::test]
    async fn test_readiness_not_ready_initially() {
        let registry = HealthRegistry::new();
        let readiness = registry.readiness().await;

        assert!(!readiness.ready);
        assert!(readiness.reason.is_some());
    }

    #[tokio::test]
    async fn test_readiness_not_ready_when_unhealthy() {
        let registry = HealthRegistry::with_default_components().await;
        registry.set_ready(true).await;
        assert!(registry.readiness().await.ready);

        registry.set_unhealthy(components::PROFILE_STORE, "CRD not installed").await;
        assert!(!registry.readiness().await.ready);
    }
}
