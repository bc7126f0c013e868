//! Instrument backends for the flash-sintering controller.
//!
//! Only the simulation backend ships here; vendor drivers implement the same
//! `SensorChannel`/`ActuatorChannel` traits from `flash_traits`.
pub mod error;
pub mod sim;
pub mod util;

pub use error::HwError;
pub use sim::{SampleState, SimParams, SimulatedOutput, SimulatedRig, SimulatedSensor};
