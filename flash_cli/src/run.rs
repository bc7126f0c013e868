//! The `run` command: one experiment on the simulated rig, driven by the
//! control task, with records persisted on a separate thread.
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use eyre::WrapErr;
use flash_core::error::FlashError;
use flash_core::{
    Command, ControlTask, ExperimentCfg, FlashController, LoopStats, ProcessState, RecorderHandle,
    RunOutcome, Snapshot,
};
use flash_hardware::{SimParams, SimulatedRig};
use flash_traits::{ChannelId, Clock, MonotonicClock};
use serde_json::json;

use crate::cli::{RunArgs, json_mode};
use crate::error_fmt::fault_name;
use crate::sink::open_sink;

/// How often the foreground loop wakes to check the watchdog and Ctrl-C.
const POLL: Duration = Duration::from_millis(100);

pub fn load_config(path: &Path) -> eyre::Result<flash_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("failed to read config {}", path.display()))?;
    let cfg: flash_config::Config = toml::from_str(&text)
        .wrap_err_with(|| format!("failed to parse config {}", path.display()))?;
    cfg.validate().wrap_err("invalid config")?;
    Ok(cfg)
}

/// File config plus command-line overrides, checked by the same rules the
/// controller builder applies.
pub fn experiment_cfg(cfg: &flash_config::Config, args: Option<&RunArgs>) -> eyre::Result<ExperimentCfg> {
    let mut exp = ExperimentCfg::from(cfg);
    if let Some(a) = args {
        if let Some(v) = a.target_voltage {
            exp.ramp.target_voltage_v = v;
        }
        if let Some(i) = a.current {
            exp.current.setpoint_a = i;
        }
        if let Some(ms) = a.dwell_ms {
            exp.dwell = Duration::from_millis(ms);
        }
    }
    flash_core::builder::validate(&exp)?;
    Ok(exp)
}

pub fn sim_params(sim: &flash_config::Simulation) -> SimParams {
    SimParams {
        furnace_start_c: sim.furnace_start_c,
        furnace_setpoint_c: sim.furnace_setpoint_c,
        furnace_ramp_c_per_s: sim.furnace_ramp_c_per_s,
        conductance_ref_s: sim.conductance_ref_s,
        reference_c: sim.reference_c,
        doubling_c: sim.doubling_c,
        heating_c_per_j: sim.heating_c_per_j,
        cooling_per_s: sim.cooling_per_s,
        max_voltage_v: sim.supply_max_voltage_v,
        max_current_a: sim.supply_max_current_a,
        read_latency: Duration::from_millis(sim.read_latency_ms),
    }
}

/// Wire every channel of `rig` into a controller.
pub fn build_on_rig(
    rig: &SimulatedRig,
    exp: ExperimentCfg,
    clock: Arc<dyn Clock + Send + Sync>,
) -> eyre::Result<(FlashController, RecorderHandle)> {
    FlashController::builder()
        .with_sensor(rig.sensor(ChannelId::Voltage))
        .with_sensor(rig.sensor(ChannelId::Current))
        .with_sensor(rig.sensor(ChannelId::Temperature))
        .with_current_limit_output(rig.current_limit_output())
        .with_config(exp)
        .with_clock(clock)
        .with_voltage_output(rig.voltage_output())
        .build()
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    pub stats: LoopStats,
    pub records_written: u64,
    pub elapsed: Duration,
    pub watchdog_fired: bool,
}

impl RunSummary {
    /// `Err` carrying the fault when the experiment did not complete.
    pub fn into_result(self) -> eyre::Result<()> {
        match self.outcome.fault {
            Some(kind) => Err(eyre::Report::new(FlashError::Fault(kind))),
            None if self.outcome.state == ProcessState::Complete => Ok(()),
            None => Err(eyre::Report::new(FlashError::State(format!(
                "experiment stopped in {}",
                self.outcome.state
            )))),
        }
    }
}

type Persistence = JoinHandle<eyre::Result<u64>>;

fn spawn_persistence(records: RecorderHandle, args: &RunArgs) -> eyre::Result<Option<Persistence>> {
    let Some(path) = &args.record else {
        return Ok(None);
    };
    let mut sink = open_sink(path, args.format)?;
    let handle = std::thread::Builder::new()
        .name("flash-recorder".into())
        .spawn(move || -> eyre::Result<u64> {
            let Some(stream) = records.next_stream() else {
                return Ok(0);
            };
            let experiment = stream.experiment();
            let (written, dropped) = stream.drain_into(sink.as_mut())?;
            if dropped > 0 {
                tracing::warn!(experiment, dropped, "records evicted before they were written");
            }
            Ok(written)
        })
        .wrap_err("failed to spawn recorder thread")?;
    Ok(Some(handle))
}

fn install_interrupt(commander: crossbeam_channel::Sender<Command>) -> Arc<AtomicBool> {
    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    let installed = ctrlc::set_handler(move || {
        flag.store(true, Ordering::SeqCst);
        let _ = commander.send(Command::Abort);
    });
    if let Err(e) = installed {
        tracing::warn!(error = %e, "Ctrl-C handler unavailable; use --timeout-s as a backstop");
    }
    interrupted
}

fn report_transition(s: &Snapshot) {
    let t = s.readings.timestamp.as_secs_f64();
    let last = s.last_valid.as_ref();
    let current = last.and_then(|r| r.current.value());
    let temperature = last.and_then(|r| r.temperature.value());
    if json_mode() {
        println!(
            "{}",
            json!({
                "event": "state",
                "experiment": s.experiment,
                "state": s.state.as_str(),
                "t_s": t,
                "commanded_v": s.commanded_voltage,
                "current_a": current,
                "temperature_c": temperature,
            })
        );
    } else {
        println!(
            "[{t:>8.3} s] {:<16} V_cmd={:>7.2} V  I={}  T={}",
            s.state.as_str(),
            s.commanded_voltage,
            current.map_or_else(|| "--".into(), |i| format!("{i:.3} A")),
            temperature.map_or_else(|| "--".into(), |c| format!("{c:.1} C")),
        );
    }
}

/// Run one experiment and wait for it to end.
pub fn run(cfg: &flash_config::Config, args: &RunArgs) -> eyre::Result<RunSummary> {
    let exp = experiment_cfg(cfg, Some(args))?;
    crate::rt::setup_rt_once(&args.rt);

    let clock: Arc<dyn Clock + Send + Sync> = Arc::new(MonotonicClock::new());
    let rig = SimulatedRig::new(sim_params(&cfg.simulation), clock.clone());
    let (controller, records) = build_on_rig(&rig, exp, clock)?;
    let persistence = spawn_persistence(records, args)?;

    let mut handle = ControlTask::spawn(controller)?;
    let interrupted = install_interrupt(handle.commander());
    let started = Instant::now();
    let watchdog = args.timeout_s.map(|s| started + Duration::from_secs(s));
    let mut watchdog_fired = false;
    handle.start()?;
    tracing::info!(timeout_s = ?args.timeout_s, "experiment started");

    let mut last_state = ProcessState::Idle;
    loop {
        let seen = last_state;
        if let Some(s) = handle.wait_for(POLL, |s| s.state != seen || s.state.is_terminal()) {
            if s.state != last_state {
                report_transition(&s);
                last_state = s.state;
            }
            if s.state.is_terminal() {
                break;
            }
        }
        if !handle.is_running() {
            tracing::error!("control task exited before the experiment ended");
            break;
        }
        if !watchdog_fired && watchdog.is_some_and(|d| Instant::now() >= d) {
            tracing::warn!(timeout_s = ?args.timeout_s, "watchdog expired; aborting");
            watchdog_fired = true;
            handle.abort()?;
        }
    }

    let report = handle.join()?;
    let elapsed = started.elapsed();
    if interrupted.load(Ordering::SeqCst) {
        tracing::warn!("experiment interrupted by operator");
    }
    let records_written = match persistence {
        Some(h) => h
            .join()
            .map_err(|_| eyre::eyre!("recorder thread panicked"))?
            .wrap_err("failed to persist records")?,
        None => 0,
    };

    let state = rig.state()?;
    tracing::info!(
        commanded_v = state.commanded_v,
        current_limit_a = state.current_limit_a,
        "supply state after run"
    );

    Ok(RunSummary {
        outcome: report.outcome,
        stats: report.stats,
        records_written,
        elapsed,
        watchdog_fired,
    })
}

pub fn print_summary(summary: &RunSummary) {
    let o = &summary.outcome;
    let last = o.last_valid.as_ref();
    if json_mode() {
        let last_json = last.map(|r| {
            json!({
                "voltage_v": r.voltage.value(),
                "current_a": r.current.value(),
                "temperature_c": r.temperature.value(),
            })
        });
        let duration_ms = u64::try_from(summary.elapsed.as_millis()).unwrap_or(u64::MAX);
        println!(
            "{}",
            json!({
                "event": "summary",
                "experiment": o.experiment,
                "state": o.state.as_str(),
                "fault": o.fault.as_ref().map(fault_name),
                "watchdog_fired": summary.watchdog_fired,
                "ticks": summary.stats.ticks,
                "missed_deadlines": summary.stats.missed_deadlines,
                "dropped_records": summary.stats.dropped_records,
                "records_written": summary.records_written,
                "duration_ms": duration_ms,
                "last": last_json,
            })
        );
        return;
    }

    println!(
        "experiment {}: {} after {} ticks ({:.2} s)",
        o.experiment,
        o.state,
        summary.stats.ticks,
        summary.elapsed.as_secs_f64()
    );
    if let Some(r) = last {
        let fmt = |v: Option<f64>, unit: &str| v.map_or_else(|| "--".into(), |x| format!("{x:.3} {unit}"));
        println!(
            "  last valid: {}, {}, {}",
            fmt(r.voltage.value(), "V"),
            fmt(r.current.value(), "A"),
            fmt(r.temperature.value(), "C")
        );
    }
    println!(
        "  records: {} written, {} dropped",
        summary.records_written, summary.stats.dropped_records
    );
}

pub fn print_stats(stats: &LoopStats) {
    eprintln!("--- Control Loop Stats ---");
    eprintln!("ticks: {}", stats.ticks);
    eprintln!("missed deadlines: {}", stats.missed_deadlines);
    eprintln!("max tick latency: {} us", stats.max_tick_latency.as_micros());
    eprintln!("dropped records: {}", stats.dropped_records);
}
