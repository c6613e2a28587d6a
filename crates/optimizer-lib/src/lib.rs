//! Resource optimizer library
//!
//! This crate provides the core functionality for:
//! - Evaluating resource optimizer profiles against observed cpu utilization
//! - Deciding between horizontal scaling, vertical resizing and recommendations
//! - Applying decisions through pluggable workload and profile stores
//! - Health checks and observability

pub mod engine;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod quantity;
pub mod sources;

pub use engine::{CycleOutcome, CycleState, Decision, EngineConfig, Orchestrator};
pub use error::{EngineError, QuantityError, SourceError, ValidationError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ActionReporter, NoopReporter, PrometheusReporter, StructuredLogger};
pub use quantity::CpuQuantity;
