//! Check outcomes and the per-target health accumulator.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of a single check probe.
///
/// `Positive` means "the condition this check looks for is true" (restart
/// observed, update available, port open). It is not a synonym for
/// "healthy"; health is folded separately through the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckResult {
    /// The observed condition holds.
    Positive,
    /// The observed condition does not hold.
    Negative,
    /// The check produced data rather than a yes/no answer.
    NonBinary,
    /// No result yet.
    Missing,
    /// The probe itself failed (transport, API, timeout).
    ExecFailure,
    /// The check is not applicable for this target's configuration.
    NotSupported,
}

impl CheckResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::NonBinary => "non_binary",
            Self::Missing => "missing",
            Self::ExecFailure => "exec_failure",
            Self::NotSupported => "not_supported",
        }
    }
}

/// Aggregate health of a target over one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "NOK")]
    Nok,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Nok => "NOK",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "OK" => Some(Self::Ok),
            "NOK" => Some(Self::Nok),
            _ => None,
        }
    }
}

/// Per-target latch folding child-check results into one `OK`/`NOK`.
///
/// Monotonic within a cycle: once any participating check calls [`fail`],
/// the cycle ends `NOK`. Reset at the start of each cycle. Atomic so that
/// sibling checks can share one accumulator by reference.
///
/// [`fail`]: StatusAccumulator::fail
#[derive(Debug, Default)]
pub struct StatusAccumulator {
    failed: AtomicBool,
}

impl StatusAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self) {
        self.failed.store(true, Ordering::SeqCst);
    }

    pub fn is_ok(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.failed.store(false, Ordering::SeqCst);
    }

    pub fn health(&self) -> HealthState {
        if self.is_ok() {
            HealthState::Ok
        } else {
            HealthState::Nok
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accumulator_latches_until_reset() {
        let acc = StatusAccumulator::new();
        assert!(acc.is_ok());

        acc.fail();
        assert!(!acc.is_ok());
        assert_eq!(acc.health(), HealthState::Nok);

        // stays failed for the rest of the cycle
        acc.fail();
        assert!(!acc.is_ok());

        acc.reset();
        assert!(acc.is_ok());
        assert_eq!(acc.health(), HealthState::Ok);
    }

    #[test]
    fn test_health_state_round_trip() {
        assert_eq!(HealthState::from_str("OK"), Some(HealthState::Ok));
        assert_eq!(HealthState::from_str("NOK"), Some(HealthState::Nok));
        assert_eq!(HealthState::from_str("broken"), None);
    }
}
