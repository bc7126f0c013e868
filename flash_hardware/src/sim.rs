//! Simulated furnace, sample and power supply.
//!
//! The model is deliberately small: a furnace ramping toward its set
//! temperature, a sample whose conductance grows exponentially with
//! temperature, Joule heating, and a supply that switches from constant
//! voltage to constant current once the sample would draw more than the
//! current limit. Joule heating feeding back into conductance is what makes
//! the simulated sample "flash".
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use flash_traits::{
    ActuatorChannel, BoxError, ChannelId, Clock, OutputRange, SensorChannel,
};

use crate::error::HwError;
use crate::util::wait_for_conversion;

/// Largest integration step; longer gaps are split.
const MAX_STEP: Duration = Duration::from_millis(5);
/// Cap on the conductance exponent so runaway heating cannot overflow.
const MAX_DOUBLINGS: f64 = 60.0;

#[derive(Debug, Clone)]
pub struct SimParams {
    pub furnace_start_c: f64,
    pub furnace_setpoint_c: f64,
    pub furnace_ramp_c_per_s: f64,
    /// Sample conductance at `reference_c`, in siemens.
    pub conductance_ref_s: f64,
    pub reference_c: f64,
    /// Temperature rise that doubles the conductance.
    pub doubling_c: f64,
    /// Sample heating per joule dissipated.
    pub heating_c_per_j: f64,
    /// Relaxation rate of the sample toward the furnace temperature (1/s).
    pub cooling_per_s: f64,
    pub max_voltage_v: f64,
    pub max_current_a: f64,
    /// Time one sensor conversion takes.
    pub read_latency: Duration,
}

impl Default for SimParams {
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
            max_voltage_v: 300.0,
            max_current_a: 2.0,
            read_latency: Duration::ZERO,
        }
    }
}

/// Electrical and thermal state at one instant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleState {
    pub furnace_c: f64,
    pub sample_c: f64,
    pub commanded_v: f64,
    pub current_limit_a: f64,
    /// Voltage across the sample (below `commanded_v` in constant-current mode).
    pub sample_v: f64,
    pub current_a: f64,
    pub constant_current: bool,
}

#[derive(Debug)]
struct SampleModel {
    params: SimParams,
    last: Instant,
    furnace_c: f64,
    sample_c: f64,
    commanded_v: f64,
    current_limit_a: f64,
}

impl SampleModel {
    fn conductance(&self, sample_c: f64) -> f64 {
        let doublings = ((sample_c - self.params.reference_c) / self.params.doubling_c.max(1e-6))
            .min(MAX_DOUBLINGS);
        self.params.conductance_ref_s * doublings.exp2()
    }

    /// Supply output for the present temperature: (sample volts, amps, cc mode).
    fn electrical(&self) -> (f64, f64, bool) {
        let g = self.conductance(self.sample_c);
        let v = self.commanded_v.max(0.0);
        let limit = self.current_limit_a.max(0.0);
        let i_cv = g * v;
        if i_cv > limit {
            let v_cc = if g > 0.0 { limit / g } else { 0.0 };
            (v_cc.min(v), limit, true)
        } else {
            (v, i_cv, false)
        }
    }

    fn advance_to(&mut self, now: Instant) {
        let mut remaining = now.saturating_duration_since(self.last);
        self.last = now;
        while !remaining.is_zero() {
            let step = remaining.min(MAX_STEP);
            remaining -= step;
            self.integrate(step.as_secs_f64());
        }
    }

    fn integrate(&mut self, dt: f64) {
        let p = &self.params;
        if self.furnace_c < p.furnace_setpoint_c {
            self.furnace_c = (self.furnace_c + p.furnace_ramp_c_per_s * dt).min(p.furnace_setpoint_c);
        } else {
            self.furnace_c = (self.furnace_c - p.furnace_ramp_c_per_s * dt).max(p.furnace_setpoint_c);
        }
        let (v, i, _) = self.electrical();
        let power = v * i;
        let dtemp = p.heating_c_per_j * power - p.cooling_per_s * (self.sample_c - self.furnace_c);
        self.sample_c += dtemp * dt;
    }

    fn state(&self) -> SampleState {
        let (sample_v, current_a, constant_current) = self.electrical();
        SampleState {
            furnace_c: self.furnace_c,
            sample_c: self.sample_c,
            commanded_v: self.commanded_v,
            current_limit_a: self.current_limit_a,
            sample_v,
            current_a,
            constant_current,
        }
    }
}

/// Handle to a simulated experiment rig. Clones share one model.
#[derive(Clone)]
pub struct SimulatedRig {
    model: Arc<Mutex<SampleModel>>,
    clock: Arc<dyn Clock + Send + Sync>,
    read_latency: Duration,
    supply_range: (OutputRange, OutputRange),
}

impl std::fmt::Debug for SimulatedRig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedRig")
            .field("read_latency", &self.read_latency)
            .finish_non_exhaustive()
    }
}

impl SimulatedRig {
    pub fn new(params: SimParams, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        let read_latency = params.read_latency;
        let supply_range = (
            OutputRange::new(0.0, params.max_voltage_v),
            OutputRange::new(0.0, params.max_current_a),
        );
        let model = SampleModel {
            last: clock.now(),
            furnace_c: params.furnace_start_c,
            sample_c: params.furnace_start_c,
            commanded_v: 0.0,
            current_limit_a: 0.0,
            params,
        };
        Self {
            model: Arc::new(Mutex::new(model)),
            clock,
            read_latency,
            supply_range,
        }
    }

    /// Bring the model up to the present and return its state.
    pub fn state(&self) -> Result<SampleState, HwError> {
        self.with_model(|m| m.state())
    }

    pub fn sensor(&self, channel: ChannelId) -> SimulatedSensor {
        SimulatedSensor {
            rig: self.clone(),
            channel,
        }
    }

    /// Voltage programming output of the supply.
    pub fn voltage_output(&self) -> SimulatedOutput {
        SimulatedOutput {
            rig: self.clone(),
            kind: OutputKind::Voltage,
        }
    }

    /// Current-limit programming output of the supply.
    pub fn current_limit_output(&self) -> SimulatedOutput {
        SimulatedOutput {
            rig: self.clone(),
            kind: OutputKind::CurrentLimit,
        }
    }

    fn with_model<T>(&self, f: impl FnOnce(&mut SampleModel) -> T) -> Result<T, HwError> {
        let now = self.clock.now();
        let mut model = self
            .model
            .lock()
            .map_err(|_| HwError::Fault("simulator state poisoned".into()))?;
        model.advance_to(now);
        Ok(f(&mut model))
    }
}

/// One measurement channel of the simulated rig.
#[derive(Debug, Clone)]
pub struct SimulatedSensor {
    rig: SimulatedRig,
    channel: ChannelId,
}

impl SensorChannel for SimulatedSensor {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn read(&mut self, timeout: Duration) -> Result<f64, BoxError> {
        wait_for_conversion(self.rig.clock.as_ref(), self.rig.read_latency, timeout)?;
        let state = self.rig.state()?;
        let value = match self.channel {
            ChannelId::Voltage => state.sample_v,
            ChannelId::Current => state.current_a,
            ChannelId::Temperature => state.sample_c,
        };
        tracing::trace!(channel = %self.channel, value, "sim read");
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy)]
enum OutputKind {
    Voltage,
    CurrentLimit,
}

/// One programming output of the simulated supply. Clamps to the supply's
/// rated range before applying.
#[derive(Debug, Clone)]
pub struct SimulatedOutput {
    rig: SimulatedRig,
    kind: OutputKind,
}

impl ActuatorChannel for SimulatedOutput {
    fn range(&self) -> OutputRange {
        match self.kind {
            OutputKind::Voltage => self.rig.supply_range.0,
            OutputKind::CurrentLimit => self.rig.supply_range.1,
        }
    }

    fn set_output(&mut self, value: f64) -> Result<(), BoxError> {
        let clamped = self.range().clamp(value);
        let kind = self.kind;
        self.rig.with_model(|m| match kind {
            OutputKind::Voltage => m.commanded_v = clamped,
            OutputKind::CurrentLimit => m.current_limit_a = clamped,
        })?;
        tracing::trace!(?kind, value = clamped, "sim output");
        Ok(())
    }
}
