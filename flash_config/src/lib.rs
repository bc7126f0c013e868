#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schema for a flash-sintering experiment.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - `[sample]` geometry, when complete, derives the ramp target voltage and
//!   the current setpoint (V = E·d, I = J·w·t).
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Timing {
    /// Control tick period (ms).
    pub tick_ms: u64,
    /// Per-channel read timeout (ms); must be shorter than the tick.
    pub sensor_timeout_ms: u64,
    /// Consecutive invalid readings on one channel before the run faults.
    pub max_consecutive_invalid: u32,
    /// Read each channel on its own worker thread instead of inline.
    pub isolated_sampling: bool,
}

impl Default for Timing {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            sensor_timeout_ms: 20,
            max_consecutive_invalid: 3,
            isolated_sampling: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Pid {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// Anti-windup bound on the integral accumulator (±).
    pub integral_limit: f64,
    /// Output clamp (volts).
    pub output_min: f64,
    pub output_max: f64,
    /// EMA coefficient for the derivative error filter, in (0, 1]. 1 disables filtering.
    pub derivative_filter: f64,
}

impl Default for Pid {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Ramp {
    /// Voltage the ramp climbs to while waiting for flash.
    pub target_voltage_v: f64,
    pub rate_v_per_s: f64,
    pub ramp_down_rate_v_per_s: f64,
    /// Hold the ramp at zero until the furnace reading reaches this temperature.
    pub start_temperature_c: Option<f64>,
    /// Measured voltage below which cool-down counts as finished.
    pub zero_tolerance_v: f64,
}

impl Default for Ramp {
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

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Current {
    /// Regulated current after flash.
    pub setpoint_a: f64,
    /// Programmed supply current limit.
    pub hard_limit_a: f64,
}

impl Default for Current {
    fn default() -> Self {
        Self {
            setpoint_a: 1.0,
            hard_limit_a: 1.5,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FlashStrategy {
    #[default]
    AbsoluteCurrent,
    CurrentRiseRate,
    Power,
    LimitFraction,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Flash {
    pub strategy: FlashStrategy,
    /// Absolute current threshold (A).
    pub threshold_a: f64,
    /// dI/dt threshold for `current_rise_rate` (A/s).
    pub rise_rate_a_per_s: f64,
    /// Power threshold for `power` (W).
    pub power_w: f64,
    /// Fraction of the current setpoint for `limit_fraction`.
    pub limit_fraction: f64,
}

impl Default for Flash {
    fn default() -> Self {
        Self {
            strategy: FlashStrategy::AbsoluteCurrent,
            threshold_a: 0.5,
            rise_rate_a_per_s: 5.0,
            power_w: 50.0,
            limit_fraction: 0.95,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Dwell {
    /// Time in current-limited regulation, measured from flash onset.
    pub duration_ms: u64,
}

impl Default for Dwell {
    fn default() -> Self {
        Self {
            duration_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Safety {
    pub max_voltage_v: f64,
    pub max_current_a: f64,
    pub max_temperature_c: f64,
    /// Largest tolerated rise of measured voltage (V/s).
    pub max_ramp_rate_v_per_s: f64,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            max_voltage_v: 300.0,
            max_current_a: 2.0,
            max_temperature_c: 1400.0,
            max_ramp_rate_v_per_s: 1000.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Recorder {
    /// Records buffered before the oldest are dropped.
    pub capacity: usize,
}

impl Default for Recorder {
    fn default() -> Self {
        Self { capacity: 4096 }
    }
}

/// Sample geometry; when present it overrides `ramp.target_voltage_v`
/// and `current.setpoint_a`.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Sample {
    pub electrode_distance_cm: Option<f64>,
    pub width_mm: Option<f64>,
    pub thickness_mm: Option<f64>,
    pub electric_field_v_per_cm: Option<f64>,
    pub current_density_ma_per_mm2: Option<f64>,
}

impl Sample {
    /// V = E·d, when both are given.
    pub fn target_voltage_v(&self) -> Option<f64> {
        Some(self.electric_field_v_per_cm? * self.electrode_distance_cm?)
    }

    /// I = J·w·t converted from mA to A, when all three are given.
    pub fn current_setpoint_a(&self) -> Option<f64> {
        let ma = self.current_density_ma_per_mm2? * self.width_mm? * self.thickness_mm?;
        Some(ma / 1000.0)
    }
}

/// Parameters of the simulated rig used when no instruments are attached.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Simulation {
    pub furnace_start_c: f64,
    pub furnace_setpoint_c: f64,
    pub furnace_ramp_c_per_s: f64,
    pub conductance_ref_s: f64,
    pub reference_c: f64,
    pub doubling_c: f64,
    pub heating_c_per_j: f64,
    pub cooling_per_s: f64,
    pub supply_max_voltage_v: f64,
    pub supply_max_current_a: f64,
    pub read_latency_ms: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self {
            furnace_start_c: 25.0,
            furnace_setpoint_c: 800.0,
            furnace_ramp_c_per_s: 25.0,
            conductance_ref_s: 1.0e-4,
            reference_c: 600.0,
            doubling_c: 20.0,
            heating_c_per_j: 2.0,
            cooling_per_s: 1.0,
            supply_max_voltage_v: 300.0,
            supply_max_current_a: 2.0,
            read_latency_ms: 0,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub timing: Timing,
    pub pid: Pid,
    pub ramp: Ramp,
    pub current: Current,
    pub flash: Flash,
    pub dwell: Dwell,
    pub safety: Safety,
    pub recorder: Recorder,
    pub sample: Sample,
    pub simulation: Simulation,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

fn finite_nonneg(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

fn finite_pos(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

impl Config {
    /// Ramp target after applying sample geometry.
    pub fn target_voltage_v(&self) -> f64 {
        self.sample
            .target_voltage_v()
            .unwrap_or(self.ramp.target_voltage_v)
    }

    /// Current setpoint after applying sample geometry.
    pub fn current_setpoint_a(&self) -> f64 {
        self.sample
            .current_setpoint_a()
            .unwrap_or(self.current.setpoint_a)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Timing
        if self.timing.tick_ms == 0 {
            eyre::bail!("timing.tick_ms must be > 0");
        }
        if self.timing.sensor_timeout_ms == 0 {
            eyre::bail!("timing.sensor_timeout_ms must be > 0");
        }
        if self.timing.sensor_timeout_ms >= self.timing.tick_ms {
            eyre::bail!("timing.sensor_timeout_ms must be < timing.tick_ms");
        }
        if self.timing.max_consecutive_invalid == 0 {
            eyre::bail!("timing.max_consecutive_invalid must be >= 1");
        }

        // PID
        let p = &self.pid;
        for (name, g) in [("pid.kp", p.kp), ("pid.ki", p.ki), ("pid.kd", p.kd)] {
            if !finite_nonneg(g) {
                eyre::bail!("{name} must be finite and >= 0");
            }
        }
        if p.kp == 0.0 && p.ki == 0.0 && p.kd == 0.0 {
            eyre::bail!("pid gains must not all be zero");
        }
        if !(p.output_min.is_finite() && p.output_max.is_finite()) || p.output_min >= p.output_max {
            eyre::bail!("pid.output_min must be < pid.output_max");
        }
        if p.output_min > 0.0 || p.output_max < 0.0 {
            eyre::bail!("pid output range must contain 0 (output would saturate at zero error)");
        }
        if !finite_nonneg(p.integral_limit) {
            eyre::bail!("pid.integral_limit must be finite and >= 0");
        }
        if p.ki * p.integral_limit > p.output_max - p.output_min {
            eyre::bail!("pid.ki * pid.integral_limit must not exceed the output span");
        }
        if !(p.derivative_filter > 0.0 && p.derivative_filter <= 1.0) {
            eyre::bail!("pid.derivative_filter must be in (0.0, 1.0]");
        }

        // Safety
        let s = &self.safety;
        for (name, v) in [
            ("safety.max_voltage_v", s.max_voltage_v),
            ("safety.max_current_a", s.max_current_a),
            ("safety.max_temperature_c", s.max_temperature_c),
            ("safety.max_ramp_rate_v_per_s", s.max_ramp_rate_v_per_s),
        ] {
            if !finite_pos(v) {
                eyre::bail!("{name} must be > 0");
            }
        }

        // Ramp
        let target = self.target_voltage_v();
        if !finite_pos(target) {
            eyre::bail!("ramp.target_voltage_v must be > 0");
        }
        if target > s.max_voltage_v {
            eyre::bail!("ramp.target_voltage_v must be <= safety.max_voltage_v");
        }
        if !finite_pos(self.ramp.rate_v_per_s) {
            eyre::bail!("ramp.rate_v_per_s must be > 0");
        }
        if self.ramp.rate_v_per_s > s.max_ramp_rate_v_per_s {
            eyre::bail!("ramp.rate_v_per_s must be <= safety.max_ramp_rate_v_per_s");
        }
        if !finite_pos(self.ramp.ramp_down_rate_v_per_s) {
            eyre::bail!("ramp.ramp_down_rate_v_per_s must be > 0");
        }
        if !finite_nonneg(self.ramp.zero_tolerance_v) {
            eyre::bail!("ramp.zero_tolerance_v must be >= 0");
        }
        if let Some(t) = self.ramp.start_temperature_c
            && !t.is_finite()
        {
            eyre::bail!("ramp.start_temperature_c must be finite");
        }

        // Current
        let setpoint = self.current_setpoint_a();
        if !finite_pos(setpoint) {
            eyre::bail!("current.setpoint_a must be > 0");
        }
        if setpoint > self.current.hard_limit_a {
            eyre::bail!("current.setpoint_a must be <= current.hard_limit_a");
        }
        if !finite_pos(self.current.hard_limit_a) || self.current.hard_limit_a > s.max_current_a {
            eyre::bail!("current.hard_limit_a must be in (0, safety.max_current_a]");
        }

        // Flash
        let f = &self.flash;
        match f.strategy {
            FlashStrategy::AbsoluteCurrent if !finite_pos(f.threshold_a) => {
                eyre::bail!("flash.threshold_a must be > 0");
            }
            FlashStrategy::AbsoluteCurrent if f.threshold_a > self.current.hard_limit_a => {
                eyre::bail!("flash.threshold_a must be <= current.hard_limit_a");
            }
            FlashStrategy::CurrentRiseRate if !finite_pos(f.rise_rate_a_per_s) => {
                eyre::bail!("flash.rise_rate_a_per_s must be > 0");
            }
            FlashStrategy::Power if !finite_pos(f.power_w) => {
                eyre::bail!("flash.power_w must be > 0");
            }
            FlashStrategy::LimitFraction if !(f.limit_fraction > 0.0 && f.limit_fraction <= 1.0) => {
                eyre::bail!("flash.limit_fraction must be in (0.0, 1.0]");
            }
            _ => {}
        }

        // Recorder
        if self.recorder.capacity == 0 {
            eyre::bail!("recorder.capacity must be >= 1");
        }

        // Sample: partial geometry is a mistake, not a silent fallback
        let g = &self.sample;
        let voltage_parts = [g.electric_field_v_per_cm, g.electrode_distance_cm];
        if voltage_parts.iter().any(Option::is_some) && voltage_parts.iter().any(Option::is_none) {
            eyre::bail!("sample.electric_field_v_per_cm and sample.electrode_distance_cm must be set together");
        }
        let current_parts = [g.current_density_ma_per_mm2, g.width_mm, g.thickness_mm];
        if current_parts.iter().any(Option::is_some) && current_parts.iter().any(Option::is_none) {
            eyre::bail!(
                "sample.current_density_ma_per_mm2, sample.width_mm and sample.thickness_mm must be set together"
            );
        }

        // Simulation
        let sim = &self.simulation;
        if !finite_pos(sim.supply_max_voltage_v) || !finite_pos(sim.supply_max_current_a) {
            eyre::bail!("simulation supply ratings must be > 0");
        }
        if !finite_pos(sim.doubling_c) {
            eyre::bail!("simulation.doubling_c must be > 0");
        }
        if !finite_nonneg(sim.furnace_ramp_c_per_s) || !finite_nonneg(sim.cooling_per_s) {
            eyre::bail!("simulation rates must be >= 0");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}
