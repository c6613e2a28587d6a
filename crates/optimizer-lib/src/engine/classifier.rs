//! Maps a utilization value onto a candidate action

use crate::models::{ActionKind, PolicyKind, Thresholds};

/// Classifier verdict for one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Value is inside the goldilocks zone (bounds inclusive)
    NoAction,
    /// A real action for Scale or Resize policies
    Actuate(ActionKind),
    /// Advisory candidate for the Recommend policy; never actuated
    Advise(ActionKind),
}

impl Classification {
    /// The action kind this verdict names, `DoNothing` for `NoAction`
    pub fn action(&self) -> ActionKind {
        match self {
            Classification::NoAction => ActionKind::DoNothing,
            Classification::Actuate(kind) | Classification::Advise(kind) => *kind,
        }
    }

    pub fn is_no_action(&self) -> bool {
        matches!(self, Classification::NoAction)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Low,
    InRange,
    High,
}

fn band(value: f64, thresholds: &Thresholds) -> Band {
    if thresholds.is_inverted() {
        return Band::InRange;
    }
    if value < f64::from(thresholds.min) {
        Band::Low
    } else if value > f64::from(thresholds.max) {
        Band::High
    } else {
        Band::InRange
    }
}

/// Classify `value` against `thresholds` for the given policy.
///
/// Comparisons are strict: values equal to `min` or `max` are in range.
/// Inverted thresholds (`min > max`) never produce an action.
pub fn classify(value: f64, thresholds: &Thresholds, policy: PolicyKind) -> Classification {
    match (band(value, thresholds), policy) {
        (Band::InRange, _) => Classification::NoAction,
        (Band::Low, PolicyKind::Scale) => Classification::Actuate(ActionKind::ScaleDown),
        (Band::High, PolicyKind::Scale) => Classification::Actuate(ActionKind::ScaleUp),
        (Band::Low, PolicyKind::Resize) => Classification::Actuate(ActionKind::ResizeDown),
        (Band::High, PolicyKind::Resize) => Classification::Actuate(ActionKind::ResizeUp),
        (Band::Low, PolicyKind::Recommend) => Classification::Advise(ActionKind::ScaleDown),
        (Band::High, PolicyKind::Recommend) => Classification::Advise(ActionKind::ScaleUp),
    }
}
