//! Scripted sensors and recording actuators for tests and dry runs.
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flash_traits::{ActuatorChannel, BoxError, ChannelId, OutputRange, SensorChannel};

/// Sensor returning a fixed value.
#[derive(Debug, Clone, Copy)]
pub struct ConstSensor {
    pub channel: ChannelId,
    pub value: f64,
}

impl SensorChannel for ConstSensor {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn read(&mut self, _timeout: Duration) -> Result<f64, BoxError> {
        Ok(self.value)
    }
}

/// Sensor backed by a closure; the closure sees the read timeout.
pub struct FnSensor<F> {
    channel: ChannelId,
    f: F,
}

impl<F> FnSensor<F>
where
    F: FnMut(Duration) -> Result<f64, BoxError> + Send,
{
    pub fn new(channel: ChannelId, f: F) -> Self {
        Self { channel, f }
    }
}

impl<F> SensorChannel for FnSensor<F>
where
    F: FnMut(Duration) -> Result<f64, BoxError> + Send,
{
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn read(&mut self, timeout: Duration) -> Result<f64, BoxError> {
        (self.f)(timeout)
    }
}

/// Sensor replaying queued values; `None` entries fail the read. Once the
/// queue is empty the last value is repeated. Clones share the queue, so a
/// test can keep one to feed values while the controller owns the other.
#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    channel: ChannelId,
    queue: Arc<Mutex<VecDeque<Option<f64>>>>,
    last: Option<f64>,
}

impl ScriptedSensor {
    pub fn new(channel: ChannelId, script: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self {
            channel,
            queue: Arc::new(Mutex::new(script.into_iter().collect())),
            last: None,
        }
    }

    pub fn push(&self, value: Option<f64>) {
        if let Ok(mut q) = self.queue.lock() {
            q.push_back(value);
        }
    }
}

impl SensorChannel for ScriptedSensor {
    fn channel(&self) -> ChannelId {
        self.channel
    }

    fn read(&mut self, _timeout: Duration) -> Result<f64, BoxError> {
        let next = self.queue.lock().ok().and_then(|mut q| q.pop_front());
        if let Some(v) = next {
            self.last = v;
        }
        self.last
            .ok_or_else(|| format!("scripted {} read failure", self.channel).into())
    }
}

/// Actuator that logs every commanded value and can be told to fail.
#[derive(Debug, Clone)]
pub struct SpyActuator {
    range: OutputRange,
    log: Arc<Mutex<Vec<f64>>>,
    fail: Arc<AtomicBool>,
}

impl SpyActuator {
    pub fn new(range: OutputRange) -> Self {
        Self {
            range,
            log: Arc::new(Mutex::new(Vec::new())),
            fail: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn values(&self) -> Vec<f64> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    pub fn last(&self) -> Option<f64> {
        self.log.lock().ok().and_then(|l| l.last().copied())
    }

    /// Make subsequent `set_output` calls fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::Relaxed);
    }
}

impl ActuatorChannel for SpyActuator {
    fn range(&self) -> OutputRange {
        self.range
    }

    fn set_output(&mut self, value: f64) -> Result<(), BoxError> {
        if self.fail.load(Ordering::Relaxed) {
            return Err("spy actuator failure".into());
        }
        let v = self.range.clamp(value);
        if let Ok(mut l) = self.log.lock() {
            l.push(v);
        }
        Ok(())
    }
}
