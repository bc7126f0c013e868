//! Pluggable flash-onset detection.
//!
//! The physical criterion for onset is a lab decision; every rule here looks
//! only at one reading set at a time plus whatever history it keeps itself.
//! Invalid current readings never trigger a detection.
use std::time::Duration;

use crate::config::FlashCfg;
use crate::types::ReadingSet;

pub trait FlashDetector: Send {
    fn name(&self) -> &'static str;

    /// Returns true on the tick at which onset is recognized.
    fn observe(&mut self, set: &ReadingSet) -> bool;

    /// Drop any history; called when a ramp (re)starts.
    fn reset(&mut self) {}

    /// The programmed current changed.
    fn set_current_setpoint(&mut self, _setpoint_a: f64) {}
}

/// Current at or above a fixed threshold. The default rule.
#[derive(Debug, Clone)]
pub struct AbsoluteCurrent {
    pub threshold_a: f64,
}

impl FlashDetector for AbsoluteCurrent {
    fn name(&self) -> &'static str {
        "absolute_current"
    }

    fn observe(&mut self, set: &ReadingSet) -> bool {
        set.current.value().is_some_and(|i| i >= self.threshold_a)
    }
}

/// dI/dt between consecutive valid current readings at or above a rate.
#[derive(Debug, Clone)]
pub struct CurrentRiseRate {
    pub rate_a_per_s: f64,
    prev: Option<(Duration, f64)>,
}

impl CurrentRiseRate {
    pub fn new(rate_a_per_s: f64) -> Self {
        Self {
            rate_a_per_s,
            prev: None,
        }
    }
}

impl FlashDetector for CurrentRiseRate {
    fn name(&self) -> &'static str {
        "current_rise_rate"
    }

    fn observe(&mut self, set: &ReadingSet) -> bool {
        let Some(i) = set.current.value() else {
            return false;
        };
        let now = set.current.timestamp;
        let Some((t0, i0)) = self.prev.replace((now, i)) else {
            return false;
        };
        match now.checked_sub(t0) {
            Some(dt) if !dt.is_zero() => (i - i0) / dt.as_secs_f64() >= self.rate_a_per_s,
            _ => false,
        }
    }

    fn reset(&mut self) {
        self.prev = None;
    }
}

/// V·I at or above a power threshold.
#[derive(Debug, Clone)]
pub struct InstantaneousPower {
    pub watts: f64,
}

impl FlashDetector for InstantaneousPower {
    fn name(&self) -> &'static str {
        "power"
    }

    fn observe(&mut self, set: &ReadingSet) -> bool {
        set.power_w().is_some_and(|p| p >= self.watts)
    }
}

/// Current reaching a fraction of the programmed current: the supply has
/// left constant-voltage operation.
#[derive(Debug, Clone)]
pub struct LimitFraction {
    pub fraction: f64,
    pub current_setpoint_a: f64,
}

impl FlashDetector for LimitFraction {
    fn name(&self) -> &'static str {
        "limit_fraction"
    }

    fn observe(&mut self, set: &ReadingSet) -> bool {
        let threshold = self.fraction * self.current_setpoint_a;
        set.current.value().is_some_and(|i| i >= threshold)
    }

    fn set_current_setpoint(&mut self, setpoint_a: f64) {
        self.current_setpoint_a = setpoint_a;
    }
}

/// Build the configured detector.
pub fn detector_for(cfg: &FlashCfg, current_setpoint_a: f64) -> Box<dyn FlashDetector> {
    match *cfg {
        FlashCfg::AbsoluteCurrent { threshold_a } => Box::new(AbsoluteCurrent { threshold_a }),
        FlashCfg::CurrentRiseRate { rate_a_per_s } => Box::new(CurrentRiseRate::new(rate_a_per_s)),
        FlashCfg::Power { watts } => Box::new(InstantaneousPower { watts }),
        FlashCfg::LimitFraction { fraction } => Box::new(LimitFraction {
            fraction,
            current_setpoint_a,
        }),
    }
}
