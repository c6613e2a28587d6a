//! Anti-oscillation gate between consecutive real actions

use crate::models::{ActionKind, ActionRecord};
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Default minimum spacing between two real actions
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Gate verdict for a candidate action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Admit,
    /// Re-evaluate no later than `requeue_after`
    Block { requeue_after: Duration },
}

impl GateDecision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, GateDecision::Admit)
    }

    pub fn requeue_after(&self) -> Option<Duration> {
        match self {
            GateDecision::Admit => None,
            GateDecision::Block { requeue_after } => Some(*requeue_after),
        }
    }
}

/// Cooldown gate for one profile.
///
/// Any prior real action starts the same clock regardless of direction:
/// a ScaleDown right after a ScaleUp is blocked just like a second ScaleUp.
#[derive(Debug, Clone, Copy)]
pub struct CooldownGate {
    cooldown: Duration,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    pub fn check(
        &self,
        candidate: ActionKind,
        last: Option<&ActionRecord>,
        now: DateTime<Utc>,
    ) -> GateDecision {
        if candidate.is_noop() {
            return GateDecision::Admit;
        }
        let last = match last {
            Some(record) if !record.kind.is_noop() => record,
            _ => return GateDecision::Admit,
        };

        // A record stamped in the future (clock skew) counts as just taken.
        let elapsed = (now - last.timestamp).to_std().unwrap_or(Duration::ZERO);
        if elapsed >= self.cooldown {
            GateDecision::Admit
        } else {
            GateDecision::Block {
                requeue_after: self.cooldown - elapsed,
            }
        }
    }
}

impl Default for CooldownGate {
    fn default() -> Self {
        Self::new(DEFAULT_COOLDOWN)
    }
}
