#![allow(dead_code)]
//! Deterministic bench: manual clock, scriptable signals, spy outputs.
use std::sync::{Arc, Mutex};
use std::time::Duration;

use flash_core::builder::{FlashControllerBuilder, Set};
use flash_core::mocks::{FnSensor, SpyActuator};
use flash_core::{Command, ExperimentCfg, FlashController, FlashDetector, RecorderHandle, Snapshot};
use flash_traits::clock::ManualClock;
use flash_traits::{BoxError, ChannelId, OutputRange};

/// What a bench sensor reports.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Signal {
    /// Echo the last commanded voltage (ideal supply).
    FollowOutput,
    Value(f64),
    /// Current through a fixed resistance at the commanded voltage.
    Resistive { ohms: f64 },
    Fail,
}

fn bench_sensor(
    channel: ChannelId,
    signal: Arc<Mutex<Signal>>,
    spy: SpyActuator,
) -> FnSensor<impl FnMut(Duration) -> Result<f64, BoxError> + Send> {
    FnSensor::new(channel, move |_timeout| {
        let commanded = spy.last().unwrap_or(0.0);
        match *signal.lock().unwrap() {
            Signal::FollowOutput => Ok(commanded),
            Signal::Value(v) => Ok(v),
            Signal::Resistive { ohms } => Ok(commanded / ohms),
            Signal::Fail => Err("bench sensor offline".into()),
        }
    })
}

pub struct Bench {
    pub clock: ManualClock,
    pub voltage: Arc<Mutex<Signal>>,
    pub current: Arc<Mutex<Signal>>,
    pub temperature: Arc<Mutex<Signal>>,
    pub v_out: SpyActuator,
    pub i_out: SpyActuator,
    pub tick: Duration,
}

impl Bench {
    pub fn new() -> Self {
        Self {
            clock: ManualClock::new(),
            voltage: Arc::new(Mutex::new(Signal::FollowOutput)),
            current: Arc::new(Mutex::new(Signal::Value(0.0))),
            temperature: Arc::new(Mutex::new(Signal::Value(800.0))),
            v_out: SpyActuator::new(OutputRange::new(0.0, 300.0)),
            i_out: SpyActuator::new(OutputRange::new(0.0, 2.0)),
            tick: Duration::from_millis(50),
        }
    }

    pub fn set(&self, channel: ChannelId, signal: Signal) {
        let slot = match channel {
            ChannelId::Voltage => &self.voltage,
            ChannelId::Current => &self.current,
            ChannelId::Temperature => &self.temperature,
        };
        *slot.lock().unwrap() = signal;
    }

    fn builder(&mut self, cfg: ExperimentCfg) -> FlashControllerBuilder<Set> {
        self.tick = cfg.timing.tick;
        FlashController::builder()
            .with_sensor(bench_sensor(ChannelId::Voltage, self.voltage.clone(), self.v_out.clone()))
            .with_sensor(bench_sensor(ChannelId::Current, self.current.clone(), self.v_out.clone()))
            .with_sensor(bench_sensor(
                ChannelId::Temperature,
                self.temperature.clone(),
                self.v_out.clone(),
            ))
            .with_current_limit_output(self.i_out.clone())
            .with_config(cfg)
            .with_clock(Arc::new(self.clock.clone()))
            .with_voltage_output(self.v_out.clone())
    }

    pub fn build(&mut self, cfg: ExperimentCfg) -> (FlashController, RecorderHandle) {
        self.builder(cfg).build().expect("bench controller builds")
    }

    pub fn build_with_detector(
        &mut self,
        cfg: ExperimentCfg,
        detector: Box<dyn FlashDetector>,
    ) -> (FlashController, RecorderHandle) {
        self.builder(cfg)
            .with_detector(detector)
            .build()
            .expect("bench controller builds")
    }

    /// Tick once, then let one period pass.
    pub fn step(&self, c: &mut FlashController, commands: &[Command]) -> Snapshot {
        let s = c.tick(commands.iter().copied());
        self.clock.advance(self.tick);
        s
    }

    /// Step until `pred` holds or `max` ticks have run.
    pub fn step_until(
        &self,
        c: &mut FlashController,
        max: usize,
        mut pred: impl FnMut(&Snapshot) -> bool,
    ) -> Option<Snapshot> {
        (0..max).map(|_| self.step(c, &[])).find(|s| pred(s))
    }
}

/// Small, fast experiment: 100 V/s ramp to 100 V, 200 ms dwell, gains
/// tuned for a 50 ohm load.
pub fn fast_cfg() -> ExperimentCfg {
    let mut cfg = ExperimentCfg::default().with_dwell(Duration::from_millis(200));
    cfg.pid.kp = 20.0;
    cfg.pid.ki = 40.0;
    cfg.pid.integral_limit = 5.0;
    cfg.ramp.rate_v_per_s = 100.0;
    cfg.ramp.ramp_down_rate_v_per_s = 1000.0;
    cfg
}
