//! Simulation time in integer steps and the global delay extrema

use crate::error::{KernelError, Result};
use serde::{Deserialize, Serialize};

/// Simulation time or duration in steps
pub type Step = u64;

/// Convert milliseconds to the nearest whole number of steps
pub fn ms_to_steps(ms: f64, resolution_ms: f64) -> Step {
    (ms / resolution_ms).round().max(0.0) as Step
}

/// Convert steps to milliseconds
pub fn steps_to_ms(steps: Step, resolution_ms: f64) -> f64 {
    steps as f64 * resolution_ms
}

/// Minimum and maximum connection delay in steps.
///
/// Observed delays widen the range until the first preparation freezes it.
/// Once frozen, only [`DelayExtrema::widen`] may change it, between run
/// segments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayExtrema {
    min: Step,
    max: Step,
    observed: bool,
    frozen: bool,
}

impl Default for DelayExtrema {
    fn default() -> Self {
        Self {
            min: 1,
            max: 1,
            observed: false,
            frozen: false,
        }
    }
}

impl DelayExtrema {
    /// Minimum delay (one min-delay cycle)
    pub fn min(&self) -> Step {
        self.min
    }

    /// Maximum delay
    pub fn max(&self) -> Step {
        self.max
    }

    /// Ring buffer length, `dmin + dmax`
    pub fn ring_len(&self) -> Step {
        self.min + self.max
    }

    /// Whether any delay was observed or set
    pub fn is_observed(&self) -> bool {
        self.observed
    }

    /// Whether preparation has frozen the range
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Reject a delay that would violate the frozen range
    pub fn check(&self, delay: Step) -> Result<()> {
        if delay == 0 {
            return Err(KernelError::invalid_parameter("delay", "0 steps", ">= 1 step"));
        }
        if delay > u16::MAX as Step {
            return Err(KernelError::invalid_parameter(
                "delay",
                format!("{} steps", delay),
                format!("<= {} steps", u16::MAX),
            ));
        }
        if self.frozen && (delay < self.min || delay > self.max) {
            return Err(KernelError::InconsistentDelayExtrema {
                delay,
                min: self.min,
                max: self.max,
            });
        }
        Ok(())
    }

    /// Record a delay used by a new connection
    pub fn observe(&mut self, delay: Step) -> Result<()> {
        self.check(delay)?;
        if self.frozen {
            return Ok(());
        }
        if self.observed {
            self.min = self.min.min(delay);
            self.max = self.max.max(delay);
        } else {
            self.min = delay;
            self.max = delay;
            self.observed = true;
        }
        Ok(())
    }

    /// Set the range explicitly before the first preparation. Observed
    /// delays may widen it further until it freezes.
    pub fn set(&mut self, min: Step, max: Step) -> Result<()> {
        if self.frozen {
            return Err(KernelError::invalid_state(
                "delay extrema are frozen; use widen_delay_extrema between run segments",
            ));
        }
        Self::validate_range(min, max)?;
        if self.observed {
            self.min = self.min.min(min);
            self.max = self.max.max(max);
        } else {
            self.min = min;
            self.max = max;
            self.observed = true;
        }
        Ok(())
    }

    /// Widen a frozen range. The new range must contain the old one.
    pub fn widen(&mut self, min: Step, max: Step) -> Result<()> {
        Self::validate_range(min, max)?;
        if min > self.min || max < self.max {
            return Err(KernelError::invalid_parameter(
                "delay extrema",
                format!("[{}, {}]", min, max),
                format!("a range containing [{}, {}]", self.min, self.max),
            ));
        }
        self.min = min;
        self.max = max;
        self.observed = true;
        Ok(())
    }

    /// Freeze the range at the globally agreed values
    pub fn freeze(&mut self, min: Step, max: Step) {
        self.min = min;
        self.max = max;
        self.observed = true;
        self.frozen = true;
    }

    fn validate_range(min: Step, max: Step) -> Result<()> {
        if min == 0 || min > max || max > u16::MAX as Step {
            return Err(KernelError::invalid_parameter(
                "delay extrema",
                format!("[{}, {}]", min, max),
                "1 <= min <= max <= 65535 steps",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ms_to_steps_rounds() {
        assert_eq!(ms_to_steps(1.0, 0.1), 10);
        assert_eq!(ms_to_steps(0.149, 0.1), 1);
        assert_eq!(ms_to_steps(0.15, 0.1), 2);
        assert_eq!(steps_to_ms(25, 0.1), 2.5);
    }

    #[test]
    fn test_observe_widens_until_frozen() {
        let mut extrema = DelayExtrema::default();
        extrema.observe(15).unwrap();
        assert_eq!((extrema.min(), extrema.max()), (15, 15));
        extrema.observe(10).unwrap();
        extrema.observe(20).unwrap();
        assert_eq!((extrema.min(), extrema.max()), (10, 20));

        extrema.freeze(10, 20);
        assert!(extrema.observe(12).is_ok());
        let err = extrema.observe(21).unwrap_err();
        assert!(matches!(err, KernelError::InconsistentDelayExtrema { delay: 21, .. }));
        assert_eq!((extrema.min(), extrema.max()), (10, 20));
    }

    #[test]
    fn test_widen_requires_superset() {
        let mut extrema = DelayExtrema::default();
        extrema.freeze(10, 20);
        assert!(extrema.widen(12, 30).is_err());
        extrema.widen(5, 30).unwrap();
        assert_eq!((extrema.min(), extrema.max()), (5, 30));
        assert!(extrema.is_frozen());
        assert!(extrema.check(30).is_ok());
    }

    #[test]
    fn test_set_rejected_once_frozen() {
        let mut extrema = DelayExtrema::default();
        extrema.set(2, 8).unwrap();
        extrema.observe(9).unwrap();
        assert_eq!((extrema.min(), extrema.max()), (2, 9));
        extrema.freeze(2, 9);
        assert!(extrema.set(1, 10).is_err());
    }

    #[test]
    fn test_zero_delay_rejected() {
        assert!(DelayExtrema::default().check(0).is_err());
    }
}
