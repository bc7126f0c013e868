//! The experiment state machine.
//!
//! `FlashController::tick` is the only place process state changes. Each tick:
//!
//! 1. apply queued commands (start, abort, reset, finish, setpoint updates)
//! 2. acquire a `ReadingSet`
//! 3. safety check, then sensor-failure check, then abort; any of them forces
//!    `Faulted` with both outputs commanded to zero
//! 4. evaluate the current state's guard and run entry actions
//! 5. compute the actuation (ramp, PID or ramp-down) and command the supply
//! 6. append an `ExperimentRecord` and return a `Snapshot`
//!
//! `Complete` and `Faulted` are terminal; only `reset` leaves them.
use std::time::Duration;

use flash_traits::ActuatorChannel;

use crate::config::ExperimentCfg;
use crate::error::FaultKind;
use crate::flash::FlashDetector;
use crate::hw_error::map_hw_error;
use crate::pid::{Pid, PidState};
use crate::recorder::DataRecorder;
use crate::safety::SafetyMonitor;
use crate::sampler::Sampler;
use crate::types::{ExperimentRecord, ProcessState, ReadingSet, Setpoint, SetpointKind};
use crate::util::approach;

pub type BoxedActuator = Box<dyn ActuatorChannel + Send>;

/// Operator requests, applied at the start of the next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Start,
    Abort,
    /// Accepted only from `Complete` or `Faulted`.
    Reset,
    /// End current-limited regulation before the dwell elapses.
    Finish,
    UpdateSetpoint {
        kind: SetpointKind,
        target: f64,
        ramp_rate: f64,
    },
    /// Stop the control task; the controller itself ignores it.
    Shutdown,
}

/// Immutable copy of the controller's state after one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub tick: u64,
    pub experiment: u64,
    pub state: ProcessState,
    pub readings: ReadingSet,
    pub last_valid: Option<ReadingSet>,
    pub commanded_voltage: f64,
    pub voltage_setpoint: Setpoint,
    pub current_setpoint: Setpoint,
    pub pid: PidState,
    pub fault: Option<FaultKind>,
    pub dropped_records: u64,
}

/// How an experiment ended (or where it stands when asked).
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub experiment: u64,
    pub state: ProcessState,
    pub fault: Option<FaultKind>,
    pub last_valid: Option<ReadingSet>,
}

pub struct FlashController {
    cfg: ExperimentCfg,
    sampler: Sampler,
    voltage_out: BoxedActuator,
    current_limit_out: Option<BoxedActuator>,
    pid: Pid,
    safety: SafetyMonitor,
    detector: Box<dyn FlashDetector>,
    recorder: DataRecorder,

    state: ProcessState,
    experiment: u64,
    voltage_setpoint: Setpoint,
    current_setpoint: Setpoint,
    commanded_v: f64,
    current_reference: f64,
    preheat_done: bool,
    flash_at: Option<Duration>,
    finish_requested: bool,
    fault: Option<FaultKind>,
    prev_timestamp: Option<Duration>,
    last_valid: Option<ReadingSet>,
    dropped_records: u64,
}

impl std::fmt::Debug for FlashController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlashController")
            .field("state", &self.state)
            .field("experiment", &self.experiment)
            .field("commanded_v", &self.commanded_v)
            .field("detector", &self.detector.name())
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

impl FlashController {
    pub(crate) fn from_parts(
        cfg: ExperimentCfg,
        sampler: Sampler,
        voltage_out: BoxedActuator,
        current_limit_out: Option<BoxedActuator>,
        detector: Box<dyn FlashDetector>,
        recorder: DataRecorder,
    ) -> Self {
        let pid = Pid::new(cfg.pid.clone());
        let safety = SafetyMonitor::new(cfg.safety.clone());
        let (voltage_setpoint, current_setpoint) = configured_setpoints(&cfg);
        Self {
            cfg,
            sampler,
            voltage_out,
            current_limit_out,
            pid,
            safety,
            detector,
            recorder,
            state: ProcessState::Idle,
            experiment: 0,
            voltage_setpoint,
            current_setpoint,
            commanded_v: 0.0,
            current_reference: 0.0,
            preheat_done: false,
            flash_at: None,
            finish_requested: false,
            fault: None,
            prev_timestamp: None,
            last_valid: None,
            dropped_records: 0,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn fault(&self) -> Option<&FaultKind> {
        self.fault.as_ref()
    }

    pub fn cfg(&self) -> &ExperimentCfg {
        &self.cfg
    }

    pub fn tick_period(&self) -> Duration {
        self.cfg.timing.tick
    }

    pub fn clock(&self) -> &std::sync::Arc<dyn flash_traits::Clock + Send + Sync> {
        self.sampler.clock()
    }

    pub fn pid_state(&self) -> PidState {
        self.pid.state()
    }

    pub fn commanded_voltage(&self) -> f64 {
        self.commanded_v
    }

    pub fn outcome(&self) -> RunOutcome {
        RunOutcome {
            experiment: self.experiment,
            state: self.state,
            fault: self.fault.clone(),
            last_valid: self.last_valid,
        }
    }

    /// Run one control tick.
    pub fn tick<I>(&mut self, commands: I) -> Snapshot
    where
        I: IntoIterator<Item = Command>,
    {
        let mut start = false;
        let mut abort = false;
        for cmd in commands {
            match cmd {
                Command::Start if self.state == ProcessState::Idle => start = true,
                Command::Start => {
                    tracing::warn!(state = %self.state, "start rejected: controller not idle");
                }
                Command::Abort if self.state.is_terminal() => {
                    tracing::debug!(state = %self.state, "abort ignored in terminal state");
                }
                Command::Abort => abort = true,
                Command::Reset => self.reset(),
                Command::Finish if self.state == ProcessState::CurrentLimited => {
                    tracing::info!("finish requested; leaving current-limited regulation");
                    self.finish_requested = true;
                }
                Command::Finish => {
                    tracing::warn!(state = %self.state, "finish rejected: not in current-limited regulation");
                }
                Command::UpdateSetpoint {
                    kind,
                    target,
                    ramp_rate,
                } => self.update_setpoint(kind, target, ramp_rate),
                Command::Shutdown => {}
            }
        }

        let set = self.sampler.sample();
        let dt = match self.prev_timestamp {
            Some(prev) => set.timestamp.saturating_sub(prev).as_secs_f64(),
            None => self.cfg.timing.tick.as_secs_f64(),
        };
        self.prev_timestamp = Some(set.timestamp);
        if set.all_valid() {
            self.last_valid = Some(set);
        }

        if self.state.is_terminal() {
            return self.snapshot(set);
        }

        let violation = self.safety.check(&set).err();
        let fault = violation
            .map(FaultKind::Safety)
            .or_else(|| {
                self.sampler
                    .sensor_fault()
                    .map(|(channel, consecutive)| FaultKind::SensorFailure {
                        channel,
                        consecutive,
                    })
            })
            .or_else(|| abort.then_some(FaultKind::Aborted));

        match fault {
            Some(kind) => self.enter_fault(kind),
            None => self.advance(&set, start, dt),
        }

        self.record(&set);
        self.snapshot(set)
    }

    /// Zero both outputs and close the record stream. For task shutdown.
    pub fn shutdown(&mut self) {
        self.zero_outputs();
        self.commanded_v = 0.0;
        self.recorder.finish();
    }

    fn advance(&mut self, set: &ReadingSet, start: bool, dt: f64) {
        use ProcessState::*;
        let next = match self.state {
            Idle => start.then_some(Ramping),
            Ramping => self.detector.observe(set).then_some(FlashDetected),
            FlashDetected => Some(CurrentLimited),
            CurrentLimited => {
                let dwell_done = self
                    .flash_at
                    .is_some_and(|t0| set.timestamp.saturating_sub(t0) >= self.cfg.dwell);
                (dwell_done || self.finish_requested).then_some(CoolDown)
            }
            CoolDown => {
                let tol = self.cfg.ramp.zero_tolerance_v;
                let at_zero = self.commanded_v <= 0.0
                    && set.voltage.value().is_some_and(|v| v.abs() <= tol);
                at_zero.then_some(Complete)
            }
            Complete | Faulted => None,
        };

        if let Some(next) = next
            && let Err(kind) = self.transition(next, set)
        {
            self.enter_fault(kind);
            return;
        }

        if let Err(kind) = self.actuate(set, dt) {
            self.enter_fault(kind);
        }
    }

    fn transition(&mut self, next: ProcessState, set: &ReadingSet) -> Result<(), FaultKind> {
        debug_assert!(self.state.can_transition_to(next));
        let from = self.state;
        self.pid.reset();

        match next {
            ProcessState::Ramping => {
                self.experiment += 1;
                self.recorder.begin(self.experiment);
                self.commanded_v = 0.0;
                self.flash_at = None;
                self.finish_requested = false;
                self.preheat_done = self.cfg.ramp.start_temperature_c.is_none();
                self.detector.reset();
                let limit = self.current_setpoint.hard_limit;
                if let Some(out) = self.current_limit_out.as_mut() {
                    out.set_output(limit).map_err(|e| {
                        FaultKind::ActuatorFailure(map_hw_error(e.as_ref()).to_string())
                    })?;
                }
                tracing::info!(
                    experiment = self.experiment,
                    target_v = self.voltage_setpoint.target,
                    rate_v_per_s = self.voltage_setpoint.ramp_rate,
                    current_limit_a = limit,
                    detector = self.detector.name(),
                    "experiment started"
                );
            }
            ProcessState::FlashDetected => {
                self.flash_at = Some(set.timestamp);
                tracing::info!(
                    current_a = set.current.value,
                    voltage_v = set.voltage.value,
                    held_v = self.commanded_v,
                    "flash onset detected; voltage ramp frozen"
                );
            }
            ProcessState::CurrentLimited => {
                self.pid.set_bias(self.commanded_v);
                self.current_reference = set
                    .current
                    .value()
                    .unwrap_or(self.current_setpoint.target)
                    .min(self.current_setpoint.hard_limit);
            }
            ProcessState::CoolDown => {
                self.finish_requested = false;
                self.pid.set_bias(0.0);
            }
            ProcessState::Complete => {
                self.commanded_v = 0.0;
                self.zero_outputs_strict()?;
            }
            ProcessState::Idle | ProcessState::Faulted => {}
        }

        self.state = next;
        tracing::info!(tick = set.tick, from = %from, to = %next, "state transition");
        Ok(())
    }

    fn actuate(&mut self, set: &ReadingSet, dt: f64) -> Result<(), FaultKind> {
        match self.state {
            ProcessState::Ramping => {
                if !self.preheat_done {
                    let gate = self.cfg.ramp.start_temperature_c.unwrap_or(f64::NEG_INFINITY);
                    if set.temperature.value().is_some_and(|t| t >= gate) {
                        tracing::info!(temperature_c = set.temperature.value, "pre-heat reached; ramping voltage");
                        self.preheat_done = true;
                    }
                }
                if self.preheat_done {
                    let sp = self.voltage_setpoint;
                    self.commanded_v = approach(self.commanded_v, sp.target, sp.ramp_rate * dt);
                }
            }
            ProcessState::FlashDetected => {}
            ProcessState::CurrentLimited => {
                let sp = self.current_setpoint;
                self.current_reference = approach(self.current_reference, sp.target, sp.ramp_rate * dt);
                if let Some(i) = set.current.value() {
                    self.commanded_v = self.pid.update(self.current_reference - i, dt);
                }
            }
            ProcessState::CoolDown => {
                let rate = self.cfg.ramp.ramp_down_rate_v_per_s;
                self.commanded_v = approach(self.commanded_v, 0.0, rate * dt).max(0.0);
            }
            ProcessState::Idle | ProcessState::Complete | ProcessState::Faulted => return Ok(()),
        }

        let ceiling = self.voltage_setpoint.hard_limit;
        self.commanded_v = self.commanded_v.clamp(0.0, ceiling);
        self.voltage_out
            .set_output(self.commanded_v)
            .map_err(|e| FaultKind::ActuatorFailure(map_hw_error(e.as_ref()).to_string()))
    }

    fn enter_fault(&mut self, kind: FaultKind) {
        tracing::error!(fault = %kind, state = %self.state, experiment = self.experiment, "experiment faulted");
        self.zero_outputs();
        self.commanded_v = 0.0;
        self.pid.reset();
        self.state = ProcessState::Faulted;
        self.fault = Some(kind);
    }

    /// Best effort: both outputs are attempted even if one fails.
    fn zero_outputs(&mut self) {
        if let Err(e) = self.voltage_out.set_output(0.0) {
            tracing::warn!(error = %map_hw_error(e.as_ref()), "failed to zero voltage output");
        }
        if let Some(out) = self.current_limit_out.as_mut()
            && let Err(e) = out.set_output(0.0)
        {
            tracing::warn!(error = %map_hw_error(e.as_ref()), "failed to zero current limit");
        }
    }

    fn zero_outputs_strict(&mut self) -> Result<(), FaultKind> {
        let v = self.voltage_out.set_output(0.0);
        let i = match self.current_limit_out.as_mut() {
            Some(out) => out.set_output(0.0),
            None => Ok(()),
        };
        v.and(i)
            .map_err(|e| FaultKind::ActuatorFailure(map_hw_error(e.as_ref()).to_string()))
    }

    fn reset(&mut self) {
        if !self.state.is_terminal() {
            tracing::warn!(state = %self.state, "reset rejected: only valid from complete or faulted");
            return;
        }
        let from = self.state;
        self.recorder.finish();
        self.pid.reset();
        self.pid.set_bias(0.0);
        self.safety.reset();
        self.detector.reset();
        self.sampler.reset_counters();
        let (v, i) = configured_setpoints(&self.cfg);
        self.voltage_setpoint = v;
        self.current_setpoint = i;
        self.detector.set_current_setpoint(i.target);
        self.commanded_v = 0.0;
        self.current_reference = 0.0;
        self.flash_at = None;
        self.finish_requested = false;
        self.fault = None;
        self.last_valid = None;
        self.dropped_records = 0;
        self.state = ProcessState::Idle;
        tracing::info!(from = %from, to = %self.state, "controller reset");
    }

    fn update_setpoint(&mut self, kind: SetpointKind, target: f64, ramp_rate: f64) {
        if self.state.is_terminal() {
            tracing::warn!(?kind, state = %self.state, "setpoint update rejected in terminal state");
            return;
        }
        let (sp, max_rate) = match kind {
            SetpointKind::Voltage => (&mut self.voltage_setpoint, self.cfg.safety.max_ramp_rate_v_per_s),
            SetpointKind::Current => (&mut self.current_setpoint, f64::INFINITY),
        };
        let reason = if !target.is_finite() || target < 0.0 {
            Some("target must be finite and >= 0")
        } else if target > sp.hard_limit {
            Some("target exceeds hard limit")
        } else if !ramp_rate.is_finite() || ramp_rate <= 0.0 {
            Some("ramp rate must be finite and > 0")
        } else if ramp_rate > max_rate {
            Some("ramp rate exceeds safety maximum")
        } else {
            None
        };
        match reason {
            Some(reason) => {
                tracing::warn!(?kind, target, ramp_rate, hard_limit = sp.hard_limit, reason, "setpoint update rejected");
            }
            None => {
                tracing::info!(?kind, from = sp.target, to = target, ramp_rate, "setpoint updated");
                sp.target = target;
                sp.ramp_rate = ramp_rate;
                if kind == SetpointKind::Current {
                    self.detector.set_current_setpoint(target);
                }
            }
        }
    }

    fn record(&mut self, set: &ReadingSet) {
        if !self.recorder.is_recording() {
            return;
        }
        self.recorder.push(ExperimentRecord::from_set(
            self.experiment,
            set,
            self.commanded_v,
            self.state,
        ));
        self.dropped_records = self.recorder.dropped();
        if self.state.is_terminal() {
            self.recorder.finish();
        }
    }

    fn snapshot(&self, readings: ReadingSet) -> Snapshot {
        Snapshot {
            tick: readings.tick,
            experiment: self.experiment,
            state: self.state,
            readings,
            last_valid: self.last_valid,
            commanded_voltage: self.commanded_v,
            voltage_setpoint: self.voltage_setpoint,
            current_setpoint: self.current_setpoint,
            pid: self.pid.state(),
            fault: self.fault.clone(),
            dropped_records: self.dropped_records,
        }
    }
}

fn configured_setpoints(cfg: &ExperimentCfg) -> (Setpoint, Setpoint) {
    (
        Setpoint {
            target: cfg.ramp.target_voltage_v,
            ramp_rate: cfg.ramp.rate_v_per_s,
            hard_limit: cfg.safety.max_voltage_v,
        },
        Setpoint {
            target: cfg.current.setpoint_a,
            ramp_rate: f64::INFINITY,
            hard_limit: cfg.current.hard_limit_a,
        },
    )
}
