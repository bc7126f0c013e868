#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Flash-sintering process control (hardware-agnostic).
//!
//! All instrument access goes through `flash_traits::SensorChannel` and
//! `flash_traits::ActuatorChannel`.
//!
//! ## Architecture
//!
//! - **Sampler**: one synchronized `ReadingSet` per tick, per-read timeouts
//! - **SafetyMonitor**: hard bounds, checked before any actuation
//! - **FlashDetector**: pluggable onset rules (`flash` module)
//! - **Pid**: current regulation after flash
//! - **FlashController**: the experiment state machine (`controller`)
//! - **DataRecorder**: non-blocking, drop-oldest record streams
//! - **ControlTask**: dedicated tick thread with command/snapshot channels

pub mod builder;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod flash;
pub mod hw_error;
pub mod mocks;
pub mod pid;
pub mod recorder;
pub mod runner;
pub mod safety;
pub mod sampler;
pub mod types;
pub mod util;

pub use builder::FlashControllerBuilder;
pub use config::{
    CurrentCfg, ExperimentCfg, FlashCfg, PidCfg, RampCfg, RecorderCfg, SafetyCfg, Timing,
};
pub use controller::{Command, FlashController, RunOutcome, Snapshot};
pub use error::{BuildError, FaultKind, FlashError, Result, Violation};
pub use flash::FlashDetector;
pub use pid::{Pid, PidState};
pub use recorder::{DataRecorder, RecordSink, RecordStream, RecorderHandle};
pub use runner::{ControlHandle, ControlTask, LoopStats, TaskReport, run_to_completion};
pub use safety::SafetyMonitor;
pub use sampler::Sampler;
pub use types::{
    ExperimentRecord, ProcessState, Reading, ReadingSet, Setpoint, SetpointKind,
};
