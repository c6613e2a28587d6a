//! Vertical resize computation
//!
//! Scales the current cpu request so that the observed utilization would
//! land on the midpoint of the goldilocks zone, then adds headroom:
//!
//! ```text
//! target  = (min + max) / 2
//! new     = observed / target * current * 1.25
//! new     = clamp(new, minCPU, maxCPU)      (each bound optional)
//! new     = max(new, 1m)
//! ```

use crate::error::EngineError;
use crate::models::Thresholds;
use crate::quantity::CpuQuantity;

/// Headroom multiplier applied after proportional scaling
pub const SAFETY_BUFFER: f64 = 1.25;

/// Tolerance absorbed before truncating to whole milli-units
const ROUNDING_EPSILON: f64 = 1e-6;

/// Optional floor and ceiling for a computed request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResizeBounds {
    pub min: Option<CpuQuantity>,
    pub max: Option<CpuQuantity>,
}

impl ResizeBounds {
    pub fn new(min: Option<CpuQuantity>, max: Option<CpuQuantity>) -> Self {
        Self { min, max }
    }

    fn apply(&self, mut quantity: CpuQuantity) -> CpuQuantity {
        if let Some(min) = self.min {
            if quantity < min {
                quantity = min;
            }
        }
        if let Some(max) = self.max {
            if quantity > max {
                quantity = max;
            }
        }
        quantity
    }
}

/// Compute the new cpu request for one container
pub fn compute_resize(
    observed_percent: f64,
    current: CpuQuantity,
    thresholds: &Thresholds,
    bounds: &ResizeBounds,
) -> Result<CpuQuantity, EngineError> {
    let target = thresholds.midpoint();
    if target <= 0.0 {
        return Err(EngineError::InvalidThresholds {
            min: thresholds.min,
            max: thresholds.max,
        });
    }

    let scaled = observed_percent / target * current.millis() as f64 * SAFETY_BUFFER;
    // `as` saturates and maps NaN to zero, which the floor below lifts to 1m.
    let truncated = CpuQuantity::from_millis((scaled + ROUNDING_EPSILON).floor() as i64);

    let clamped = bounds.apply(truncated);
    Ok(clamped.max(CpuQuantity::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ZONE: Thresholds = Thresholds { min: 30, max: 70 };

    fn millis(m: i64) -> CpuQuantity {
        CpuQuantity::from_millis(m)
    }

    #[test]
    fn test_scale_up_with_buffer() {
        // (90 / 50) * 500m * 1.25
        let q = compute_resize(90.0, millis(500), &ZONE, &ResizeBounds::default()).unwrap();
        assert_eq!(q, millis(1125));
        assert_eq!(q.to_string(), "1125m");
    }

    #[test]
    fn test_scale_down_with_buffer() {
        // (10 / 50) * 1000m * 1.25
        let q = compute_resize(10.0, millis(1000), &ZONE, &ResizeBounds::default()).unwrap();
        assert_eq!(q, millis(250));
    }

    #[test]
    fn test_clamp_to_max() {
        let bounds = ResizeBounds::new(None, Some(millis(1000)));
        let q = compute_resize(90.0, millis(500), &ZONE, &bounds).unwrap();
        assert_eq!(q, millis(1000));
        assert_eq!(q.to_string(), "1");
    }

    #[test]
    fn test_clamp_to_min() {
        let bounds = ResizeBounds::new(Some(millis(400)), None);
        let q = compute_resize(10.0, millis(1000), &ZONE, &bounds).unwrap();
        assert_eq!(q, millis(400));
    }

    #[test]
    fn test_fraction_truncated_to_whole_millis() {
        // (31 / 50) * 333m * 1.25 = 258.075m
        let q = compute_resize(31.0, millis(333), &ZONE, &ResizeBounds::default()).unwrap();
        assert_eq!(q, millis(258));
    }

    #[test]
    fn test_never_below_one_milli() {
        let q = compute_resize(0.0, millis(500), &ZONE, &ResizeBounds::default()).unwrap();
        assert_eq!(q, CpuQuantity::MIN);

        let q = compute_resize(0.01, millis(1), &ZONE, &ResizeBounds::default()).unwrap();
        assert_eq!(q, CpuQuantity::MIN);
    }

    #[test]
    fn test_degenerate_target_is_error() {
        let zero = Thresholds::new(0, 0);
        let err = compute_resize(50.0, millis(500), &zero, &ResizeBounds::default()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidThresholds { min: 0, max: 0 }));

        let negative = Thresholds::new(-40, 10);
        assert!(compute_resize(50.0, millis(500), &negative, &ResizeBounds::default()).is_err());
    }
}
