//! Hard-bound checks run on every reading set before actuation.
use std::time::Duration;

use crate::config::SafetyCfg;
use crate::error::Violation;
use crate::types::ReadingSet;

/// Compares each reading set with the configured maxima.
///
/// Invalid readings are skipped here; persistent invalidity is the sampler's
/// fault condition. The ramp-rate check compares the measured voltage with
/// the previous valid voltage and only bounds rises.
#[derive(Debug, Clone)]
pub struct SafetyMonitor {
    cfg: SafetyCfg,
    prev_voltage: Option<(Duration, f64)>,
}

impl SafetyMonitor {
    pub fn new(cfg: SafetyCfg) -> Self {
        Self {
            cfg,
            prev_voltage: None,
        }
    }

    pub fn cfg(&self) -> &SafetyCfg {
        &self.cfg
    }

    pub fn check(&mut self, set: &ReadingSet) -> Result<(), Violation> {
        let rate = self.voltage_rate(set);

        if let Some(v) = set.voltage.value()
            && v.abs() > self.cfg.max_voltage_v
        {
            return Err(Violation::OverVoltage {
                observed: v,
                limit: self.cfg.max_voltage_v,
            });
        }
        if let Some(i) = set.current.value()
            && i.abs() > self.cfg.max_current_a
        {
            return Err(Violation::OverCurrent {
                observed: i,
                limit: self.cfg.max_current_a,
            });
        }
        if let Some(t) = set.temperature.value()
            && t > self.cfg.max_temperature_c
        {
            return Err(Violation::OverTemperature {
                observed: t,
                limit: self.cfg.max_temperature_c,
            });
        }
        if let Some(r) = rate
            && r > self.cfg.max_ramp_rate_v_per_s
        {
            return Err(Violation::RampRate {
                observed: r,
                limit: self.cfg.max_ramp_rate_v_per_s,
            });
        }
        Ok(())
    }

    /// Forget the previous voltage so a new experiment starts without a rate.
    pub fn reset(&mut self) {
        self.prev_voltage = None;
    }

    fn voltage_rate(&mut self, set: &ReadingSet) -> Option<f64> {
        let v = set.voltage.value()?;
        let now = set.voltage.timestamp;
        let prev = self.prev_voltage.replace((now, v));
        let (t0, v0) = prev?;
        let dt = now.checked_sub(t0)?.as_secs_f64();
        (dt > 0.0).then(|| (v - v0) / dt)
    }
}
