//! Runtime configuration for the control core.
//!
//! Separate from the TOML schema in `flash_config`; `conversions` bridges the
//! two and the builder re-validates whatever it is handed.
use std::time::Duration;

/// Tick pacing and sensor failure tolerance.
#[derive(Debug, Clone, PartialEq)]
pub struct Timing {
    pub tick: Duration,
    /// Hard per-read timeout; strictly shorter than `tick`.
    pub sensor_timeout: Duration,
    /// Consecutive invalid reads tolerated per channel; one more faults the run.
    pub max_consecutive_invalid: u32,
    /// Read each sensor on its own worker thread.
    pub isolated_sampling: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(50),
            sensor_timeout: Duration::from_millis(20),
            max_consecutive_invalid: 3,
            isolated_sampling: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PidCfg {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Integral accumulator bound (±).
    pub integral_limit: f64,
    pub output_min: f64,
    pub output_max: f64,
    /// EMA coefficient applied to the error before differentiation; 1.0 = unfiltered.
    pub derivative_filter: f64,
}

impl Default for PidCfg {
    fn default() -> Self {
        Self {
            kp: 5.0,
            ki: 30.0,
            kd: 0.0,
            integral_limit: 5.0,
            output_min: 0.0,
            output_max: 300.0,
            derivative_filter: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RampCfg {
    pub target_voltage_v: f64,
    pub rate_v_per_s: f64,
    pub ramp_down_rate_v_per_s: f64,
    pub start_temperature_c: Option<f64>,
    pub zero_tolerance_v: f64,
}

impl Default for RampCfg {
    fn default() -> Self {
        Self {
            target_voltage_v: 100.0,
            rate_v_per_s: 10.0,
            ramp_down_rate_v_per_s: 50.0,
            start_temperature_c: None,
            zero_tolerance_v: 0.5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CurrentCfg {
    pub setpoint_a: f64,
    pub hard_limit_a: f64,
}

impl Default for CurrentCfg {
    fn default() -> Self {
        Self {
            setpoint_a: 1.0,
            hard_limit_a: 1.5,
        }
    }
}

/// Flash-onset rule. Absolute current is the default.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FlashCfg {
    AbsoluteCurrent { threshold_a: f64 },
    CurrentRiseRate { rate_a_per_s: f64 },
    Power { watts: f64 },
    /// Fraction of the current setpoint.
    LimitFraction { fraction: f64 },
}

impl Default for FlashCfg {
    fn default() -> Self {
        FlashCfg::AbsoluteCurrent { threshold_a: 0.5 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyCfg {
    pub max_voltage_v: f64,
    pub max_current_a: f64,
    pub max_temperature_c: f64,
    pub max_ramp_rate_v_per_s: f64,
}

impl Default for SafetyCfg {
    fn default() -> Self {
        Self {
            max_voltage_v: 300.0,
            max_current_a: 2.0,
            max_temperature_c: 1400.0,
            max_ramp_rate_v_per_s: 1000.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderCfg {
    pub capacity: usize,
}

impl Default for RecorderCfg {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Everything a controller needs, fixed for the lifetime of the controller.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentCfg {
    pub timing: Timing,
    pub pid: PidCfg,
    pub ramp: RampCfg,
    pub current: CurrentCfg,
    pub flash: FlashCfg,
    /// Current-limited regulation time, measured from flash onset.
    pub dwell: Duration,
    pub safety: SafetyCfg,
    pub recorder: RecorderCfg,
}

impl Default for ExperimentCfg {
    fn default() -> Self {
        Self {
            timing: Timing::default(),
            pid: PidCfg::default(),
            ramp: RampCfg::default(),
            current: CurrentCfg::default(),
            flash: FlashCfg::default(),
            dwell: Duration::from_secs(60),
            safety: SafetyCfg::default(),
            recorder: RecorderCfg::default(),
        }
    }
}

impl ExperimentCfg {
    pub fn with_dwell(mut self, dwell: Duration) -> Self {
        self.dwell = dwell;
        self
    }
}
