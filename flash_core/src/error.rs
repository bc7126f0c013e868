use flash_traits::ChannelId;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FlashError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for instrument")]
    Timeout,
    #[error("invalid state: {0}")]
    State(String),
    #[error("experiment faulted: {0}")]
    Fault(FaultKind),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("missing {0} sensor")]
    MissingSensor(ChannelId),
    #[error("missing voltage output")]
    MissingActuator,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

/// Hard bound crossed by one reading set.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum Violation {
    #[error("over-voltage: {observed:.3} V > {limit:.3} V")]
    OverVoltage { observed: f64, limit: f64 },
    #[error("over-current: {observed:.3} A > {limit:.3} A")]
    OverCurrent { observed: f64, limit: f64 },
    #[error("over-temperature: {observed:.1} degC > {limit:.1} degC")]
    OverTemperature { observed: f64, limit: f64 },
    #[error("voltage ramp rate: {observed:.1} V/s > {limit:.1} V/s")]
    RampRate { observed: f64, limit: f64 },
}

/// Why an experiment ended in `Faulted`.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FaultKind {
    #[error("safety violation: {0}")]
    Safety(Violation),
    #[error("{channel} sensor failed {consecutive} consecutive reads")]
    SensorFailure { channel: ChannelId, consecutive: u32 },
    #[error("actuator command failed: {0}")]
    ActuatorFailure(String),
    #[error("aborted by operator")]
    Aborted,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
