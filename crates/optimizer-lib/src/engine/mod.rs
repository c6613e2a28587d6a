//! Decision engine
//!
//! Pure components (`aggregator`, `classifier`, `cooldown`, `resize`) are
//! composed by the [`Orchestrator`], which also drives the [`Dispatcher`].

pub mod aggregator;
pub mod classifier;
pub mod cooldown;
pub mod dispatcher;
pub mod orchestrator;
pub mod resize;

pub use aggregator::{aggregate, Aggregate};
pub use classifier::{classify, Classification};
pub use cooldown::{CooldownGate, GateDecision, DEFAULT_COOLDOWN};
pub use dispatcher::{
    plan, DispatchParams, DispatchReport, Dispatcher, Intent, Outcome, SkipReason, WorkloadOutcome,
};
pub use orchestrator::{
    evaluate, next_status, recommendation_text, CycleOutcome, CycleState, Decision, EngineConfig,
    Evaluation, Orchestrator, ResolvedSettings, DEFAULT_EVALUATION_INTERVAL,
    DEFAULT_NO_DATA_REQUEUE,
};
pub use resize::{compute_resize, ResizeBounds, SAFETY_BUFFER};
