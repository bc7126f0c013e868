//! Per-tick acquisition of voltage, current and temperature.
//!
//! `Sampler::sample` reads every channel once, each against its own timeout,
//! and returns a `ReadingSet` stamped with a strictly increasing timestamp.
//! A failed, late or non-finite read becomes an invalid `Reading`; it never
//! aborts the tick. Consecutive failures are counted per channel and
//! surfaced through `sensor_fault` once they exceed the configured tolerance.
//!
//! In isolated mode each sensor lives on its own worker thread, so a sensor
//! that ignores its timeout stalls only its own channel. Isolated waits use
//! the wall clock.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel as xch;
use flash_traits::{ChannelId, Clock, SensorChannel};

use crate::config::Timing;
use crate::hw_error::map_hw_error;
use crate::types::{Reading, ReadingSet};

pub type BoxedSensor = Box<dyn SensorChannel + Send>;

/// One sensor per measured quantity.
pub struct SensorSet {
    pub voltage: BoxedSensor,
    pub current: BoxedSensor,
    pub temperature: BoxedSensor,
}

impl SensorSet {
    fn into_array(self) -> [BoxedSensor; 3] {
        [self.voltage, self.current, self.temperature]
    }
}

#[inline]
fn slot(channel: ChannelId) -> usize {
    match channel {
        ChannelId::Voltage => 0,
        ChannelId::Current => 1,
        ChannelId::Temperature => 2,
    }
}

enum Backend {
    Inline([BoxedSensor; 3]),
    Isolated([ChannelWorker; 3]),
}

pub struct Sampler {
    backend: Backend,
    clock: Arc<dyn Clock + Send + Sync>,
    epoch: Instant,
    timeout: Duration,
    max_consecutive_invalid: u32,
    consecutive: [u32; 3],
    last_timestamp: Option<Duration>,
    tick: u64,
}

impl std::fmt::Debug for Sampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sampler")
            .field("isolated", &matches!(self.backend, Backend::Isolated(_)))
            .field("timeout", &self.timeout)
            .field("consecutive", &self.consecutive)
            .field("tick", &self.tick)
            .finish()
    }
}

impl Sampler {
    pub fn new(
        sensors: SensorSet,
        timing: &Timing,
        clock: Arc<dyn Clock + Send + Sync>,
    ) -> std::io::Result<Self> {
        let sensors = sensors.into_array();
        let backend = if timing.isolated_sampling {
            let [v, i, t] = sensors;
            Backend::Isolated([
                ChannelWorker::spawn(ChannelId::Voltage, v, timing.sensor_timeout)?,
                ChannelWorker::spawn(ChannelId::Current, i, timing.sensor_timeout)?,
                ChannelWorker::spawn(ChannelId::Temperature, t, timing.sensor_timeout)?,
            ])
        } else {
            Backend::Inline(sensors)
        };
        let epoch = clock.now();
        Ok(Self {
            backend,
            clock,
            epoch,
            timeout: timing.sensor_timeout,
            max_consecutive_invalid: timing.max_consecutive_invalid,
            consecutive: [0; 3],
            last_timestamp: None,
            tick: 0,
        })
    }

    pub fn clock(&self) -> &Arc<dyn Clock + Send + Sync> {
        &self.clock
    }

    /// Acquire one reading per channel.
    pub fn sample(&mut self) -> ReadingSet {
        let mut ts = self.clock.since(self.epoch);
        if let Some(last) = self.last_timestamp
            && ts <= last
        {
            ts = last + Duration::from_nanos(1);
        }
        self.last_timestamp = Some(ts);
        let tick = self.tick;
        self.tick += 1;

        let values = match &mut self.backend {
            Backend::Inline(sensors) => {
                let clock = self.clock.as_ref();
                let timeout = self.timeout;
                let mut out = [None; 3];
                for (slot, sensor) in sensors.iter_mut().enumerate() {
                    out[slot] = read_inline(clock, sensor.as_mut(), timeout);
                }
                out
            }
            Backend::Isolated(workers) => read_isolated(workers, tick, self.timeout),
        };

        let mut readings = [Reading::invalid(ts, ChannelId::Voltage); 3];
        for channel in ChannelId::ALL {
            let s = slot(channel);
            readings[s] = match values[s] {
                Some(v) => {
                    self.consecutive[s] = 0;
                    Reading::valid(ts, channel, v)
                }
                None => {
                    self.consecutive[s] = self.consecutive[s].saturating_add(1);
                    Reading::invalid(ts, channel)
                }
            };
        }
        let [voltage, current, temperature] = readings;
        ReadingSet {
            tick,
            timestamp: ts,
            voltage,
            current,
            temperature,
        }
    }

    /// First channel whose consecutive invalid count exceeds the tolerance.
    pub fn sensor_fault(&self) -> Option<(ChannelId, u32)> {
        ChannelId::ALL
            .into_iter()
            .map(|c| (c, self.consecutive[slot(c)]))
            .find(|&(_, n)| n > self.max_consecutive_invalid)
    }

    pub fn consecutive_invalid(&self, channel: ChannelId) -> u32 {
        self.consecutive[slot(channel)]
    }

    pub fn reset_counters(&mut self) {
        self.consecutive = [0; 3];
    }
}

fn read_inline(clock: &dyn Clock, sensor: &mut dyn SensorChannel, timeout: Duration) -> Option<f64> {
    let channel = sensor.channel();
    let start = clock.now();
    match sensor.read(timeout) {
        Ok(v) if !v.is_finite() => {
            tracing::warn!(%channel, value = v, "non-finite reading");
            None
        }
        Ok(v) => {
            let elapsed = clock.since(start);
            if elapsed > timeout {
                tracing::warn!(
                    %channel,
                    elapsed_ms = elapsed.as_secs_f64() * 1e3,
                    "read exceeded timeout"
                );
                None
            } else {
                Some(v)
            }
        }
        Err(e) => {
            let mapped = map_hw_error(e.as_ref());
            tracing::warn!(%channel, error = %mapped, "sensor read failed");
            None
        }
    }
}

fn read_isolated(workers: &mut [ChannelWorker; 3], seq: u64, timeout: Duration) -> [Option<f64>; 3] {
    let mut requested = [false; 3];
    for (slot, w) in workers.iter_mut().enumerate() {
        // Late answers from an earlier tick are useless now.
        while w.responses.try_recv().is_ok() {}
        requested[slot] = w.request(seq);
    }
    let deadline = Instant::now() + timeout;
    let mut out = [None; 3];
    for (slot, w) in workers.iter().enumerate() {
        if !requested[slot] {
            tracing::warn!(channel = %w.channel, "sensor worker busy; reading skipped");
            continue;
        }
        out[slot] = loop {
            match w.responses.recv_deadline(deadline) {
                Ok((s, v)) if s == seq => break v,
                Ok(_) => continue,
                Err(_) => {
                    tracing::warn!(channel = %w.channel, "read exceeded timeout");
                    break None;
                }
            }
        };
    }
    out
}

/// Thread owning one sensor, answering numbered read requests.
struct ChannelWorker {
    channel: ChannelId,
    requests: Option<xch::Sender<u64>>,
    responses: xch::Receiver<(u64, Option<f64>)>,
    shutdown: Arc<AtomicBool>,
    join_handle: Option<JoinHandle<()>>,
}

impl ChannelWorker {
    fn spawn(channel: ChannelId, mut sensor: BoxedSensor, timeout: Duration) -> std::io::Result<Self> {
        let (req_tx, req_rx) = xch::bounded::<u64>(1);
        let (resp_tx, resp_rx) = xch::bounded(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_worker = shutdown.clone();

        let join_handle = std::thread::Builder::new()
            .name(format!("flash-sensor-{channel}"))
            .spawn(move || {
                for seq in req_rx.iter() {
                    if shutdown_worker.load(Ordering::Relaxed) {
                        break;
                    }
                    let value = match sensor.read(timeout) {
                        Ok(v) if v.is_finite() => Some(v),
                        Ok(_) => None,
                        Err(e) => {
                            tracing::debug!(%channel, error = %map_hw_error(e.as_ref()), "worker read failed");
                            None
                        }
                    };
                    if resp_tx.send((seq, value)).is_err() {
                        break;
                    }
                }
                tracing::trace!(%channel, "sensor worker exiting");
            })?;

        Ok(Self {
            channel,
            requests: Some(req_tx),
            responses: resp_rx,
            shutdown,
            join_handle: Some(join_handle),
        })
    }

    /// Queue a read; false when the worker is still busy with an older one.
    fn request(&self, seq: u64) -> bool {
        self.requests
            .as_ref()
            .is_some_and(|tx| tx.try_send(seq).is_ok())
    }
}

impl Drop for ChannelWorker {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        // Closing the request queue ends the worker's receive loop.
        self.requests.take();
        // Unblock a worker parked on a full response queue.
        while self.responses.try_recv().is_ok() {}
        if let Some(handle) = self.join_handle.take()
            && handle.join().is_err()
        {
            tracing::warn!(channel = %self.channel, "sensor worker panicked");
        }
    }
}
