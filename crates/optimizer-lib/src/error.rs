//! Error types for the optimizer engine and its collaborators

use thiserror::Error;

/// A profile field rejected at the profile-store boundary
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("threshold {field}={value} is outside 1..=100")]
    ThresholdOutOfRange { field: &'static str, value: i32 },

    #[error("threshold min ({min}) must be below max ({max})")]
    InvertedThresholds { min: i32, max: i32 },

    #[error("unknown optimization policy {0:?}, expected one of Scale, Resize, Recommend")]
    UnknownPolicy(String),

    #[error("invalid duration {0:?}")]
    InvalidDuration(String),

    #[error("invalid cpu quantity: {0}")]
    Quantity(#[from] QuantityError),
}

/// CPU quantity parse failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuantityError {
    #[error("empty quantity")]
    Empty,

    #[error("malformed quantity {0:?}")]
    Malformed(String),

    #[error("negative quantity {0:?}")]
    Negative(String),

    #[error("quantity {0:?} overflows milli-unit precision")]
    Overflow(String),
}

/// Failure reported by an external collaborator (metrics source, workload or profile store)
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic concurrency conflict on write
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("rejected: {0}")]
    Rejected(String),
}

impl SourceError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SourceError::NotFound(_))
    }
}

/// Errors that abort an evaluation cycle
#[derive(Debug, Error)]
pub enum EngineError {
    /// Thresholds whose midpoint is not a usable resize target
    #[error("invalid thresholds min={min} max={max}: resize target must be positive")]
    InvalidThresholds { min: i32, max: i32 },

    #[error("metrics query failed: {0}")]
    Metrics(#[source] SourceError),

    #[error("listing workloads failed: {0}")]
    Workloads(#[source] SourceError),

    #[error("reading profile failed: {0}")]
    Profile(#[source] SourceError),

    #[error("writing profile status failed: {0}")]
    Status(#[source] SourceError),

    /// Every targeted workload failed to apply
    #[error("all {failed} targeted workload(s) failed, first error: {first}")]
    Actuation { failed: usize, first: String },

    #[error("cycle cancelled")]
    Cancelled,
}

impl EngineError {
    /// Whether the caller should schedule a retry
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::InvalidThresholds { .. } => false,
            EngineError::Profile(e) | EngineError::Status(e) => {
                !matches!(e, SourceError::Rejected(_))
            }
            EngineError::Metrics(_)
            | EngineError::Workloads(_)
            | EngineError::Actuation { .. }
            | EngineError::Cancelled => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collaborator_errors_are_retryable() {
        assert!(EngineError::Metrics(SourceError::Transport("timeout".into())).is_retryable());
        assert!(EngineError::Status(SourceError::Conflict("stale".into())).is_retryable());
        assert!(!EngineError::Status(SourceError::Rejected("schema".into())).is_retryable());
        assert!(!EngineError::InvalidThresholds { min: 0, max: 0 }.is_retryable());
    }

    #[test]
    fn test_error_messages() {
        let err = EngineError::Actuation { failed: 2, first: "boom".into() };
        assert_eq!(err.to_string(), "all 2 targeted workload(s) failed, first error: boom");

        let err = ValidationError::InvertedThresholds { min: 70, max: 30 };
        assert!(err.to_string().contains("min (70)"));
    }
}
