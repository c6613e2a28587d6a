//! External collaborators consumed by the engine
//!
//! The engine never talks to a cluster or a metrics backend directly; it
//! drives these traits. `memory` holds in-process implementations used by
//! tests and dry runs, `promql` queries a Prometheus HTTP API.

mod memory;
mod promql;

pub use memory::{AppliedChange, MemoryMetricsSource, MemoryProfileStore, MemoryWorkloadStore};
pub use promql::{
    decode_query_response, render_selector_matchers, PrometheusSource, DEFAULT_CPU_QUERY,
};

use crate::error::SourceError;
use crate::models::{
    LabelSelector, ObservedSample, Profile, ProfileKey, ProfileStatus, ScalableWorkload,
};
use crate::quantity::CpuQuantity;
use chrono::{DateTime, Utc};

pub use async_trait::async_trait;

/// Source of utilization samples
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Backend-specific query expression for a profile
    fn expression(&self, profile: &Profile) -> String;

    /// Evaluate `expression` at `at`, one sample per reporting instance
    async fn query(
        &self,
        expression: &str,
        at: DateTime<Utc>,
    ) -> Result<Vec<ObservedSample>, SourceError>;
}

/// Store of scalable workloads targeted by profiles
#[async_trait]
pub trait WorkloadStore: Send + Sync {
    /// Workloads in `namespace` matching `selector`
    async fn list_scalable(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ScalableWorkload>, SourceError>;

    /// Set the desired replica count of a workload
    async fn apply_replica_change(
        &self,
        workload: &ScalableWorkload,
        replicas: i32,
    ) -> Result<(), SourceError>;

    /// Set the cpu request of the container at `container_index` in the pod template
    async fn apply_quantity_change(
        &self,
        workload: &ScalableWorkload,
        container_index: usize,
        quantity: CpuQuantity,
    ) -> Result<(), SourceError>;
}

/// Store holding profiles and their status subresource
#[async_trait]
pub trait ProfileStore: Send + Sync {
    /// Latest profile, `SourceError::NotFound` once deleted
    async fn get(&self, key: &ProfileKey) -> Result<Profile, SourceError>;

    /// Replace the status of `profile` in one write.
    ///
    /// Implementations must reject the write with `SourceError::Conflict`
    /// when `profile.resource_version` is stale.
    async fn write_status(
        &self,
        profile: &Profile,
        status: &ProfileStatus,
    ) -> Result<(), SourceError>;
}
