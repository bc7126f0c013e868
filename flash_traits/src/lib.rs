//! Hardware capability traits shared by the control core and every backend.
//!
//! A vendor driver and the simulator implement the same two traits; the
//! backend is chosen once when the controller is assembled.
pub mod clock;

pub use clock::{Clock, MonotonicClock};

/// Boxed error returned across the trait boundary.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Physical quantity measured by a sensor channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    Voltage,
    Current,
    Temperature,
}

impl ChannelId {
    pub const ALL: [ChannelId; 3] = [ChannelId::Voltage, ChannelId::Current, ChannelId::Temperature];

    /// Engineering unit every reading of this channel is expressed in.
    pub fn unit(self) -> Unit {
        match self {
            ChannelId::Voltage => Unit::Volt,
            ChannelId::Current => Unit::Ampere,
            ChannelId::Temperature => Unit::Celsius,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ChannelId::Voltage => "voltage",
            ChannelId::Current => "current",
            ChannelId::Temperature => "temperature",
        }
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Volt,
    Ampere,
    Celsius,
}

impl Unit {
    pub fn symbol(self) -> &'static str {
        match self {
            Unit::Volt => "V",
            Unit::Ampere => "A",
            Unit::Celsius => "degC",
        }
    }
}

/// Read one physical quantity.
///
/// `read` must return within `timeout`; an implementation that cannot produce
/// a value in time returns an error instead of blocking.
pub trait SensorChannel {
    fn channel(&self) -> ChannelId;

    fn read(&mut self, timeout: std::time::Duration) -> Result<f64, BoxError>;
}

/// Inclusive output range an actuator accepts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputRange {
    pub min: f64,
    pub max: f64,
}

impl OutputRange {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// Clamp `value` into the range; NaN maps to `min`.
    pub fn clamp(&self, value: f64) -> f64 {
        if value.is_nan() {
            return self.min;
        }
        value.clamp(self.min, self.max)
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Command one output (applied voltage or current limit).
///
/// Implementations enforce their own `range()` clamp regardless of what the
/// controller asks for.
pub trait ActuatorChannel {
    fn range(&self) -> OutputRange;

    fn set_output(&mut self, value: f64) -> Result<(), BoxError>;
}

impl<T: SensorChannel + ?Sized> SensorChannel for Box<T> {
    fn channel(&self) -> ChannelId {
        (**self).channel()
    }

    fn read(&mut self, timeout: std::time::Duration) -> Result<f64, BoxError> {
        (**self).read(timeout)
    }
}

impl<T: ActuatorChannel + ?Sized> ActuatorChannel for Box<T> {
    fn range(&self) -> OutputRange {
        (**self).range()
    }

    fn set_output(&mut self, value: f64) -> Result<(), BoxError> {
        (**self).set_output(value)
    }
}
