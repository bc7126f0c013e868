//! `From` implementations bridging `flash_config` types to `flash_core` types.

use std::time::Duration;

use crate::config::{
    CurrentCfg, ExperimentCfg, FlashCfg, PidCfg, RampCfg, RecorderCfg, SafetyCfg, Timing,
};

impl From<&flash_config::Timing> for Timing {
    fn from(c: &flash_config::Timing) -> Self {
        Self {
            tick: Duration::from_millis(c.tick_ms),
            sensor_timeout: Duration::from_millis(c.sensor_timeout_ms),
            max_consecutive_invalid: c.max_consecutive_invalid,
            isolated_sampling: c.isolated_sampling,
        }
    }
}

impl From<&flash_config::Pid> for PidCfg {
    fn from(c: &flash_config::Pid) -> Self {
        Self {
            kp: c.kp,
            ki: c.ki,
            kd: c.kd,
            integral_limit: c.integral_limit,
            output_min: c.output_min,
            output_max: c.output_max,
            derivative_filter: c.derivative_filter,
        }
    }
}

impl From<&flash_config::Safety> for SafetyCfg {
    fn from(c: &flash_config::Safety) -> Self {
        Self {
            max_voltage_v: c.max_voltage_v,
            max_current_a: c.max_current_a,
            max_temperature_c: c.max_temperature_c,
            max_ramp_rate_v_per_s: c.max_ramp_rate_v_per_s,
        }
    }
}

impl From<&flash_config::Flash> for FlashCfg {
    fn from(c: &flash_config::Flash) -> Self {
        use flash_config::FlashStrategy;
        match c.strategy {
            FlashStrategy::AbsoluteCurrent => FlashCfg::AbsoluteCurrent {
                threshold_a: c.threshold_a,
            },
            FlashStrategy::CurrentRiseRate => FlashCfg::CurrentRiseRate {
                rate_a_per_s: c.rise_rate_a_per_s,
            },
            FlashStrategy::Power => FlashCfg::Power { watts: c.power_w },
            FlashStrategy::LimitFraction => FlashCfg::LimitFraction {
                fraction: c.limit_fraction,
            },
        }
    }
}

impl From<&flash_config::Recorder> for RecorderCfg {
    fn from(c: &flash_config::Recorder) -> Self {
        Self {
            capacity: c.capacity,
        }
    }
}

/// Whole-file conversion; sample geometry, when given, decides the ramp
/// target and the current setpoint.
impl From<&flash_config::Config> for ExperimentCfg {
    fn from(c: &flash_config::Config) -> Self {
        Self {
            timing: (&c.timing).into(),
            pid: (&c.pid).into(),
            ramp: RampCfg {
                target_voltage_v: c.target_voltage_v(),
                rate_v_per_s: c.ramp.rate_v_per_s,
                ramp_down_rate_v_per_s: c.ramp.ramp_down_rate_v_per_s,
                start_temperature_c: c.ramp.start_temperature_c,
                zero_tolerance_v: c.ramp.zero_tolerance_v,
            },
            current: CurrentCfg {
                setpoint_a: c.current_setpoint_a(),
                hard_limit_a: c.current.hard_limit_a,
            },
            flash: (&c.flash).into(),
            dwell: Duration::from_millis(c.dwell.duration_ms),
            safety: (&c.safety).into(),
            recorder: (&c.recorder).into(),
        }
    }
}
