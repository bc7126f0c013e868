//! Control task on its own thread, driving the simulated rig.
use std::sync::Arc;
use std::time::Duration;

use flash_core::{
    Command, ControlTask, ExperimentCfg, FaultKind, FlashController, ProcessState, RecorderHandle,
};
use flash_hardware::{SimParams, SimulatedRig};
use flash_traits::ChannelId;
use flash_traits::clock::ManualClock;

const WAIT: Duration = Duration::from_secs(10);

fn rig_and_controller(cfg: ExperimentCfg) -> (SimulatedRig, FlashController, RecorderHandle) {
    let clock = ManualClock::new();
    let params = SimParams {
        furnace_start_c: 780.0,
        furnace_setpoint_c: 800.0,
        ..SimParams::default()
    };
    let rig = SimulatedRig::new(params, Arc::new(clock.clone()));
    let (controller, records) = FlashController::builder()
        .with_sensor(rig.sensor(ChannelId::Voltage))
        .with_sensor(rig.sensor(ChannelId::Current))
        .with_sensor(rig.sensor(ChannelId::Temperature))
        .with_current_limit_output(rig.current_limit_output())
        .with_config(cfg)
        .with_clock(Arc::new(clock))
        .with_voltage_output(rig.voltage_output())
        .build()
        .expect("controller");
    (rig, controller, records)
}

fn sim_cfg(dwell: Duration) -> ExperimentCfg {
    let mut cfg = ExperimentCfg::default().with_dwell(dwell);
    cfg.ramp.rate_v_per_s = 50.0;
    cfg
}

#[test]
fn experiment_runs_to_completion_on_the_control_thread() {
    let (rig, controller, records) = rig_and_controller(sim_cfg(Duration::from_secs(5)));
    let consumer = std::thread::spawn(move || {
        let stream = records.next_stream().expect("experiment stream");
        stream.collect::<Vec<_>>()
    });

    let mut handle = ControlTask::spawn(controller).expect("spawn");
    handle.start().expect("start");
    let done = handle
        .wait_for(WAIT, |s| s.state.is_terminal())
        .expect("experiment ends");
    assert_eq!(done.state, ProcessState::Complete, "fault: {:?}", done.fault);
    assert!(done.last_valid.is_some());

    let report = handle.join().expect("join");
    assert_eq!(report.outcome.state, ProcessState::Complete);
    assert_eq!(report.stats.missed_deadlines, 0);
    assert_eq!(report.stats.dropped_records, 0);
    assert!(report.stats.ticks > 40);

    let records = consumer.join().expect("consumer");
    assert_eq!(records.first().map(|r| r.state), Some(ProcessState::Ramping));
    assert_eq!(records.last().map(|r| r.state), Some(ProcessState::Complete));
    let regulated: Vec<f64> = records
        .iter()
        .filter(|r| r.state == ProcessState::CurrentLimited)
        .filter_map(|r| r.current)
        .collect();
    assert!(regulated.len() >= 30);
    let last = regulated.last().copied().unwrap_or_default();
    assert!((last - 1.0).abs() < 0.05, "regulated current {last}");

    let state = rig.state().expect("rig state");
    assert_eq!(state.commanded_v, 0.0);
    assert_eq!(state.current_limit_a, 0.0);
}

#[test]
fn abort_is_acted_on_within_a_tick() {
    let (rig, controller, _records) = rig_and_controller(sim_cfg(Duration::from_secs(3600)));
    let mut handle = ControlTask::spawn(controller).expect("spawn");
    handle.start().expect("start");
    handle
        .wait_for(WAIT, |s| s.state == ProcessState::CurrentLimited)
        .expect("regulating");

    handle.abort().expect("abort");
    let faulted = handle
        .wait_for(WAIT, |s| s.state == ProcessState::Faulted)
        .expect("faulted");
    assert_eq!(faulted.fault, Some(FaultKind::Aborted));
    assert_eq!(faulted.commanded_voltage, 0.0);
    let state = rig.state().expect("rig state");
    assert_eq!(state.commanded_v, 0.0);
    assert_eq!(state.current_limit_a, 0.0);

    handle.reset().expect("reset");
    let idle = handle
        .wait_for(WAIT, |s| s.state == ProcessState::Idle)
        .expect("idle again");
    assert!(idle.fault.is_none());
}

#[test]
fn dropping_the_handle_stops_an_active_experiment() {
    let (rig, controller, _records) = rig_and_controller(sim_cfg(Duration::from_secs(3600)));
    let mut handle = ControlTask::spawn(controller).expect("spawn");
    handle.send(Command::Start).expect("start");
    handle
        .wait_for(WAIT, |s| s.state == ProcessState::CurrentLimited)
        .expect("regulating");
    drop(handle);
    let state = rig.state().expect("rig state");
    assert_eq!(state.commanded_v, 0.0);
}

#[test]
fn join_from_idle_reports_no_experiment() {
    let (_rig, controller, _records) = rig_and_controller(sim_cfg(Duration::from_secs(1)));
    let mut handle = ControlTask::spawn(controller).expect("spawn");
    handle
        .wait_for(WAIT, |s| s.tick >= 3)
        .expect("ticking");
    assert!(handle.is_running());
    let report = handle.join().expect("join");
    assert_eq!(report.outcome.state, ProcessState::Idle);
    assert_eq!(report.outcome.experiment, 0);
    assert!(report.stats.ticks >= 4);
}

#[test]
fn dropped_records_survive_a_reset() {
    let mut cfg = sim_cfg(Duration::from_secs(3600));
    cfg.recorder.capacity = 1;
    // Never drained, so every record after the first evicts one.
    let (_rig, controller, _records) = rig_and_controller(cfg);
    let mut handle = ControlTask::spawn(controller).expect("spawn");
    handle.start().expect("start");
    handle
        .wait_for(WAIT, |s| s.dropped_records > 0)
        .expect("records dropped");

    handle.abort().expect("abort");
    let faulted = handle
        .wait_for(WAIT, |s| s.state == ProcessState::Faulted)
        .expect("faulted");
    assert!(faulted.dropped_records > 0);

    handle.reset().expect("reset");
    let idle = handle
        .wait_for(WAIT, |s| s.state == ProcessState::Idle)
        .expect("idle again");
    assert_eq!(idle.dropped_records, 0);

    let report = handle.join().expect("join");
    assert_eq!(report.stats.dropped_records, faulted.dropped_records);
}
