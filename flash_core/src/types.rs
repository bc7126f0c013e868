//! Readings, states and records exchanged between the control core and its
//! collaborators.
use std::fmt;
use std::time::Duration;

use flash_traits::{ChannelId, Unit};

/// One channel measurement. Invalid readings are kept, not dropped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Time since the sampler's epoch.
    pub timestamp: Duration,
    pub channel: ChannelId,
    pub value: f64,
    pub unit: Unit,
    pub valid: bool,
}

impl Reading {
    pub fn valid(timestamp: Duration, channel: ChannelId, value: f64) -> Self {
        Self {
            timestamp,
            channel,
            value,
            unit: channel.unit(),
            valid: true,
        }
    }

    pub fn invalid(timestamp: Duration, channel: ChannelId) -> Self {
        Self {
            timestamp,
            channel,
            value: f64::NAN,
            unit: channel.unit(),
            valid: false,
        }
    }

    /// The value, when the reading is trustworthy.
    #[inline]
    pub fn value(&self) -> Option<f64> {
        self.valid.then_some(self.value)
    }
}

/// All channels sampled on one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingSet {
    pub tick: u64,
    pub timestamp: Duration,
    pub voltage: Reading,
    pub current: Reading,
    pub temperature: Reading,
}

impl ReadingSet {
    pub fn get(&self, channel: ChannelId) -> &Reading {
        match channel {
            ChannelId::Voltage => &self.voltage,
            ChannelId::Current => &self.current,
            ChannelId::Temperature => &self.temperature,
        }
    }

    pub fn all_valid(&self) -> bool {
        self.voltage.valid && self.current.valid && self.temperature.valid
    }

    /// Electrical power dissipated in the sample, when both V and I are valid.
    pub fn power_w(&self) -> Option<f64> {
        Some(self.voltage.value()? * self.current.value()?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessState {
    Idle,
    Ramping,
    FlashDetected,
    CurrentLimited,
    CoolDown,
    Complete,
    Faulted,
}

impl ProcessState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ProcessState::Complete | ProcessState::Faulted)
    }

    /// Defined edges of the experiment sequence. `Faulted` is reachable from
    /// every non-terminal state; reset leads from a terminal state to `Idle`.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        match (self, next) {
            (Idle, Ramping)
            | (Ramping, FlashDetected)
            | (FlashDetected, CurrentLimited)
            | (CurrentLimited, CoolDown)
            | (CoolDown, Complete)
            | (Complete, Idle)
            | (Faulted, Idle) => true,
            (from, Faulted) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Idle => "idle",
            ProcessState::Ramping => "ramping",
            ProcessState::FlashDetected => "flash_detected",
            ProcessState::CurrentLimited => "current_limited",
            ProcessState::CoolDown => "cool_down",
            ProcessState::Complete => "complete",
            ProcessState::Faulted => "faulted",
        }
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which regulated quantity a setpoint applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetpointKind {
    /// Ramp target voltage.
    Voltage,
    /// Regulated current after flash.
    Current,
}

/// Target with its approach rate and an absolute ceiling. Changed only by
/// explicit, logged updates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoint {
    pub target: f64,
    /// Units of target per second.
    pub ramp_rate: f64,
    pub hard_limit: f64,
}

/// One row of the experiment log.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExperimentRecord {
    pub experiment: u64,
    pub tick: u64,
    pub timestamp: Duration,
    /// `None` where the reading was invalid.
    pub voltage: Option<f64>,
    pub current: Option<f64>,
    pub temperature: Option<f64>,
    pub commanded_voltage: f64,
    pub state: ProcessState,
}

impl ExperimentRecord {
    pub fn from_set(experiment: u64, set: &ReadingSet, commanded_voltage: f64, state: ProcessState) -> Self {
        Self {
            experiment,
            tick: set.tick,
            timestamp: set.timestamp,
            voltage: set.voltage.value(),
            current: set.current.value(),
            temperature: set.temperature.value(),
            commanded_voltage,
            state,
        }
    }
}
