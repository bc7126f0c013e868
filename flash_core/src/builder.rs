//! Type-state builder for `FlashController`.
//!
//! `build()` is only available once a voltage output has been provided;
//! `try_build()` is always available and reports what is missing. Both go
//! through `validate_and_build`, so a programmatically assembled controller
//! is held to the same rules as one loaded from a config file.

use std::marker::PhantomData;
use std::sync::Arc;

use flash_traits::{ActuatorChannel, ChannelId, Clock, MonotonicClock, SensorChannel};

use crate::config::{ExperimentCfg, FlashCfg};
use crate::controller::{BoxedActuator, FlashController};
use crate::error::{BuildError, Result};
use crate::flash::{FlashDetector, detector_for};
use crate::recorder::{DataRecorder, RecorderHandle};
use crate::sampler::{BoxedSensor, Sampler, SensorSet};

pub struct Missing;
pub struct Set;

pub struct FlashControllerBuilder<V> {
    voltage: Option<BoxedSensor>,
    current: Option<BoxedSensor>,
    temperature: Option<BoxedSensor>,
    voltage_out: Option<BoxedActuator>,
    current_limit_out: Option<BoxedActuator>,
    cfg: Option<ExperimentCfg>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    detector: Option<Box<dyn FlashDetector>>,
    _v: PhantomData<V>,
}

impl Default for FlashControllerBuilder<Missing> {
    fn default() -> Self {
        Self {
            voltage: None,
            current: None,
            temperature: None,
            voltage_out: None,
            current_limit_out: None,
            cfg: None,
            clock: None,
            detector: None,
            _v: PhantomData,
        }
    }
}

impl FlashController {
    pub fn builder() -> FlashControllerBuilder<Missing> {
        FlashControllerBuilder::default()
    }
}

fn invalid(msg: &'static str) -> eyre::Report {
    eyre::Report::new(BuildError::InvalidConfig(msg))
}

fn finite_pos(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

fn finite_nonneg(v: f64) -> bool {
    v.is_finite() && v >= 0.0
}

/// Reject configurations under which no tick may run.
pub fn validate(cfg: &ExperimentCfg) -> Result<()> {
    let t = &cfg.timing;
    if t.tick.is_zero() {
        return Err(invalid("tick period must be > 0"));
    }
    if t.sensor_timeout.is_zero() || t.sensor_timeout >= t.tick {
        return Err(invalid("sensor timeout must be > 0 and < tick period"));
    }
    if t.max_consecutive_invalid == 0 {
        return Err(invalid("max_consecutive_invalid must be >= 1"));
    }

    let p = &cfg.pid;
    if !(finite_nonneg(p.kp) && finite_nonneg(p.ki) && finite_nonneg(p.kd)) {
        return Err(invalid("PID gains must be finite and >= 0"));
    }
    if p.kp == 0.0 && p.ki == 0.0 && p.kd == 0.0 {
        return Err(invalid("PID gains must not all be zero"));
    }
    if !(p.output_min.is_finite() && p.output_max.is_finite()) || p.output_min >= p.output_max {
        return Err(invalid("PID output_min must be < output_max"));
    }
    if p.output_min > 0.0 || p.output_max < 0.0 {
        return Err(invalid("PID output range must contain 0"));
    }
    if !finite_nonneg(p.integral_limit) {
        return Err(invalid("PID integral_limit must be finite and >= 0"));
    }
    if p.ki * p.integral_limit > p.output_max - p.output_min {
        return Err(invalid("PID integral term alone would saturate the output"));
    }
    if !(p.derivative_filter > 0.0 && p.derivative_filter <= 1.0) {
        return Err(invalid("PID derivative_filter must be in (0, 1]"));
    }

    let s = &cfg.safety;
    if !(finite_pos(s.max_voltage_v)
        && finite_pos(s.max_current_a)
        && finite_pos(s.max_temperature_c)
        && finite_pos(s.max_ramp_rate_v_per_s))
    {
        return Err(invalid("safety maxima must be > 0"));
    }

    let r = &cfg.ramp;
    if !finite_pos(r.target_voltage_v) || r.target_voltage_v > s.max_voltage_v {
        return Err(invalid("ramp target voltage must be in (0, max voltage]"));
    }
    if !finite_pos(r.rate_v_per_s) || r.rate_v_per_s > s.max_ramp_rate_v_per_s {
        return Err(invalid("ramp rate must be in (0, max ramp rate]"));
    }
    if !finite_pos(r.ramp_down_rate_v_per_s) {
        return Err(invalid("ramp-down rate must be > 0"));
    }
    if !finite_nonneg(r.zero_tolerance_v) {
        return Err(invalid("zero tolerance must be >= 0"));
    }
    if r.start_temperature_c.is_some_and(|t| !t.is_finite()) {
        return Err(invalid("start temperature must be finite"));
    }

    let c = &cfg.current;
    if !finite_pos(c.setpoint_a) || c.setpoint_a > c.hard_limit_a {
        return Err(invalid("current setpoint must be in (0, hard limit]"));
    }
    if !finite_pos(c.hard_limit_a) || c.hard_limit_a > s.max_current_a {
        return Err(invalid("current hard limit must be in (0, max current]"));
    }

    let flash_ok = match cfg.flash {
        FlashCfg::AbsoluteCurrent { threshold_a } => finite_pos(threshold_a),
        FlashCfg::CurrentRiseRate { rate_a_per_s } => finite_pos(rate_a_per_s),
        FlashCfg::Power { watts } => finite_pos(watts),
        FlashCfg::LimitFraction { fraction } => fraction > 0.0 && fraction <= 1.0,
    };
    if !flash_ok {
        return Err(invalid("flash threshold must be > 0"));
    }
    if let FlashCfg::AbsoluteCurrent { threshold_a } = cfg.flash
        && threshold_a > c.hard_limit_a
    {
        return Err(invalid("flash threshold must not exceed the current hard limit"));
    }

    if cfg.recorder.capacity == 0 {
        return Err(invalid("recorder capacity must be >= 1"));
    }
    Ok(())
}

/// Single source of truth for validation and construction.
fn validate_and_build(
    sensors: SensorSet,
    voltage_out: BoxedActuator,
    current_limit_out: Option<BoxedActuator>,
    cfg: ExperimentCfg,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
    detector: Option<Box<dyn FlashDetector>>,
) -> Result<(FlashController, RecorderHandle)> {
    validate(&cfg)?;

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(c) => c,
        None => Arc::new(MonotonicClock::new()),
    };
    let detector = detector.unwrap_or_else(|| detector_for(&cfg.flash, cfg.current.setpoint_a));
    let sampler = Sampler::new(sensors, &cfg.timing, clock)
        .map_err(|e| eyre::eyre!("failed to start sensor workers: {e}"))?;
    let (recorder, handle) = DataRecorder::new(cfg.recorder.capacity);

    tracing::debug!(
        tick_ms = crate::util::millis(cfg.timing.tick),
        sensor_timeout_ms = crate::util::millis(cfg.timing.sensor_timeout),
        detector = detector.name(),
        isolated = cfg.timing.isolated_sampling,
        "controller assembled"
    );

    let controller = FlashController::from_parts(
        cfg,
        sampler,
        voltage_out,
        current_limit_out,
        detector,
        recorder,
    );
    Ok((controller, handle))
}

impl<V> FlashControllerBuilder<V> {
    /// Fallible build available in any type-state.
    pub fn try_build(self) -> Result<(FlashController, RecorderHandle)> {
        let voltage = self
            .voltage
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor(ChannelId::Voltage)))?;
        let current = self
            .current
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor(ChannelId::Current)))?;
        let temperature = self
            .temperature
            .ok_or_else(|| eyre::Report::new(BuildError::MissingSensor(ChannelId::Temperature)))?;
        let voltage_out = self
            .voltage_out
            .ok_or_else(|| eyre::Report::new(BuildError::MissingActuator))?;

        validate_and_build(
            SensorSet {
                voltage,
                current,
                temperature,
            },
            voltage_out,
            self.current_limit_out,
            self.cfg.unwrap_or_default(),
            self.clock,
            self.detector,
        )
    }

    /// Register a sensor under the channel it reports.
    pub fn with_sensor(mut self, sensor: impl SensorChannel + Send + 'static) -> Self {
        let slot = match sensor.channel() {
            ChannelId::Voltage => &mut self.voltage,
            ChannelId::Current => &mut self.current,
            ChannelId::Temperature => &mut self.temperature,
        };
        *slot = Some(Box::new(sensor));
        self
    }

    pub fn with_current_limit_output(mut self, out: impl ActuatorChannel + Send + 'static) -> Self {
        self.current_limit_out = Some(Box::new(out));
        self
    }

    pub fn with_config(mut self, cfg: ExperimentCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    /// Defaults to `MonotonicClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Replace the detector derived from the flash config.
    pub fn with_detector(mut self, detector: Box<dyn FlashDetector>) -> Self {
        self.detector = Some(detector);
        self
    }
}

impl FlashControllerBuilder<Missing> {
    pub fn with_voltage_output(
        self,
        out: impl ActuatorChannel + Send + 'static,
    ) -> FlashControllerBuilder<Set> {
        FlashControllerBuilder {
            voltage: self.voltage,
            current: self.current,
            temperature: self.temperature,
            voltage_out: Some(Box::new(out)),
            current_limit_out: self.current_limit_out,
            cfg: self.cfg,
            clock: self.clock,
            detector: self.detector,
            _v: PhantomData,
        }
    }
}

impl FlashControllerBuilder<Set> {
    pub fn build(self) -> Result<(FlashController, RecorderHandle)> {
        self.try_build()
    }
}
