//! Reduces per-instance samples to one representative value

use crate::models::ObservedSample;

/// Result of aggregating one cycle's samples
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Aggregate {
    /// The source returned nothing usable; not the same as a 0% reading
    NoData,
    /// Arithmetic mean of the finite sample values
    Value(f64),
}

impl Aggregate {
    /// Representative value, 0 when there was no data
    pub fn value(&self) -> f64 {
        match self {
            Aggregate::NoData => 0.0,
            Aggregate::Value(v) => *v,
        }
    }

    pub fn is_no_data(&self) -> bool {
        matches!(self, Aggregate::NoData)
    }

    pub fn as_option(&self) -> Option<f64> {
        match self {
            Aggregate::NoData => None,
            Aggregate::Value(v) => Some(*v),
        }
    }
}

/// Average the samples.
///
/// Non-finite readings (a pod with no cpu request yields NaN or +Inf from
/// the utilization ratio) are ignored; if nothing finite remains the
/// result is `NoData`.
pub fn aggregate(samples: &[ObservedSample]) -> Aggregate {
    let (sum, count) = samples
        .iter()
        .map(|s| s.value)
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(sum, n), v| (sum + v, n + 1));

    if count == 0 {
        Aggregate::NoData
    } else {
        Aggregate::Value(sum / count as f64)
    }
}
