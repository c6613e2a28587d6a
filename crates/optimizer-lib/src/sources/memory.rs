//! In-process collaborators for tests and dry runs

use super::{async_trait, MetricsSource, ProfileStore, WorkloadStore};
use crate::error::SourceError;
use crate::models::{
    LabelSelector, ObservedSample, Profile, ProfileKey, ProfileStatus, ScalableWorkload,
    WorkloadRef,
};
use crate::quantity::CpuQuantity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::RwLock;

/// Metrics source returning a fixed set of samples
#[derive(Default)]
pub struct MemoryMetricsSource {
    samples: RwLock<Vec<ObservedSample>>,
    failure: Mutex<Option<SourceError>>,
    queries: AtomicUsize,
}

impl MemoryMetricsSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_values(values: &[f64]) -> Self {
        Self {
            samples: RwLock::new(values.iter().copied().map(ObservedSample::new).collect()),
            ..Self::default()
        }
    }

    pub async fn set_values(&self, values: &[f64]) {
        *self.samples.write().await = values.iter().copied().map(ObservedSample::new).collect();
    }

    /// Make every query fail with `error`, `None` to recover
    pub fn fail_with(&self, error: Option<SourceError>) {
        if let Ok(mut failure) = self.failure.lock() {
            *failure = error;
        }
    }

    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricsSource for MemoryMetricsSource {
    fn expression(&self, profile: &Profile) -> String {
        format!(
            "cpu_usage{{namespace={:?},{}}}",
            profile.key.namespace,
            profile.spec.selector.to_query()
        )
    }

    async fn query(
        &self,
        _expression: &str,
        _at: DateTime<Utc>,
    ) -> Result<Vec<ObservedSample>, SourceError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        if let Some(error) = self.failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        Ok(self.samples.read().await.clone())
    }
}

/// A write accepted by [`MemoryWorkloadStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "change")]
pub enum AppliedChange {
    Replicas {
        workload: WorkloadRef,
        replicas: i32,
    },
    CpuRequest {
        workload: WorkloadRef,
        container: String,
        quantity: CpuQuantity,
    },
}

/// Workload store over an in-memory list, keeping a log of applied writes
#[derive(Default)]
pub struct MemoryWorkloadStore {
    workloads: RwLock<Vec<ScalableWorkload>>,
    applied: RwLock<Vec<AppliedChange>>,
    failing_writes: DashMap<String, SourceError>,
    list_failure: Mutex<Option<SourceError>>,
}

impl MemoryWorkloadStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a workload, replacing one with the same namespace and name
    pub async fn insert(&self, workload: ScalableWorkload) {
        let mut workloads = self.workloads.write().await;
        match workloads
            .iter_mut()
            .find(|w| w.namespace == workload.namespace && w.name == workload.name)
        {
            Some(existing) => *existing = workload,
            None => workloads.push(workload),
        }
    }

    pub async fn get(&self, namespace: &str, name: &str) -> Option<ScalableWorkload> {
        self.workloads
            .read()
            .await
            .iter()
            .find(|w| w.namespace == namespace && w.name == name)
            .cloned()
    }

    /// Make writes to the workload called `name` fail with `error`
    pub fn fail_writes_for(&self, name: impl Into<String>, error: SourceError) {
        self.failing_writes.insert(name.into(), error);
    }

    /// Make list calls fail with `error`, `None` to recover
    pub fn fail_list(&self, error: Option<SourceError>) {
        if let Ok(mut failure) = self.list_failure.lock() {
            *failure = error;
        }
    }

    /// Writes accepted so far, in order
    pub async fn applied(&self) -> Vec<AppliedChange> {
        self.applied.read().await.clone()
    }

    fn check_write(&self, workload: &ScalableWorkload) -> Result<(), SourceError> {
        match self.failing_writes.get(&workload.name) {
            Some(error) => Err(error.value().clone()),
            None => Ok(()),
        }
    }
}

fn stored_mut<'a>(
    workloads: &'a mut [ScalableWorkload],
    target: &ScalableWorkload,
) -> Result<&'a mut ScalableWorkload, SourceError> {
    workloads
        .iter_mut()
        .find(|w| w.kind == target.kind && w.namespace == target.namespace && w.name == target.name)
        .ok_or_else(|| SourceError::NotFound(target.reference().to_string()))
}

#[async_trait]
impl WorkloadStore for MemoryWorkloadStore {
    async fn list_scalable(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ScalableWorkload>, SourceError> {
        if let Some(error) = self.list_failure.lock().ok().and_then(|f| f.clone()) {
            return Err(error);
        }
        Ok(self
            .workloads
            .read()
            .await
            .iter()
            .filter(|w| w.namespace == namespace && selector.matches(&w.labels))
            .cloned()
            .collect())
    }

    async fn apply_replica_change(
        &self,
        workload: &ScalableWorkload,
        replicas: i32,
    ) -> Result<(), SourceError> {
        self.check_write(workload)?;
        {
            let mut workloads = self.workloads.write().await;
            let stored = stored_mut(&mut workloads, workload)?;
            stored.replicas = Some(replicas);
        }
        self.applied.write().await.push(AppliedChange::Replicas {
            workload: workload.reference(),
            replicas,
        });
        Ok(())
    }

    async fn apply_quantity_change(
        &self,
        workload: &ScalableWorkload,
        container_index: usize,
        quantity: CpuQuantity,
    ) -> Result<(), SourceError> {
        self.check_write(workload)?;
        let container = {
            let mut workloads = self.workloads.write().await;
            let stored = stored_mut(&mut workloads, workload)?;
            let container = stored.containers.get_mut(container_index).ok_or_else(|| {
                SourceError::Rejected(format!(
                    "{} has no container at index {}",
                    workload.reference(),
                    container_index
                ))
            })?;
            container.cpu_request = Some(quantity);
            container.unparsed_cpu_request = None;
            container.name.clone()
        };
        self.applied.write().await.push(AppliedChange::CpuRequest {
            workload: workload.reference(),
            container,
            quantity,
        });
        Ok(())
    }
}

/// Profile store with resource-version conflict detection
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: DashMap<ProfileKey, Profile>,
    next_version: AtomicU64,
    status_writes: AtomicUsize,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn bump_version(&self) -> String {
        (self.next_version.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    /// Store `profile` under a fresh resource version and return that version
    pub fn insert(&self, mut profile: Profile) -> String {
        let version = self.bump_version();
        profile.resource_version = Some(version.clone());
        self.profiles.insert(profile.key.clone(), profile);
        version
    }

    pub fn remove(&self, key: &ProfileKey) -> Option<Profile> {
        self.profiles.remove(key).map(|(_, profile)| profile)
    }

    /// Current copy of a profile, without going through the trait
    pub fn snapshot(&self, key: &ProfileKey) -> Option<Profile> {
        self.profiles.get(key).map(|p| p.value().clone())
    }

    /// Number of successful status writes
    pub fn status_writes(&self) -> usize {
        self.status_writes.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, key: &ProfileKey) -> Result<Profile, SourceError> {
        self.snapshot(key)
            .ok_or_else(|| SourceError::NotFound(format!("profile {}", key)))
    }

    async fn write_status(
        &self,
        profile: &Profile,
        status: &ProfileStatus,
    ) -> Result<(), SourceError> {
        let mut stored = self
            .profiles
            .get_mut(&profile.key)
            .ok_or_else(|| SourceError::NotFound(format!("profile {}", profile.key)))?;

        let stale = stored.resource_version != profile.resource_version;
        if profile.resource_version.is_some() && stale {
            return Err(SourceError::Conflict(format!(
                "profile {} is at version {:?}, write was based on {:?}",
                profile.key, stored.resource_version, profile.resource_version
            )));
        }

        stored.status = status.clone();
        stored.resource_version = Some(self.bump_version());
        self.status_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
