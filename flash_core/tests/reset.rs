mod common;

use std::time::Duration;

use common::{Bench, Signal, fast_cfg};
use flash_core::{Command, ProcessState, SetpointKind};
use flash_traits::ChannelId;

#[test]
fn reset_while_ramping_is_a_noop() {
    let mut bench = Bench::new();
    let (mut c, _handle) = bench.build(fast_cfg());
    bench.step(&mut c, &[Command::Start]);
    let before = bench.step(&mut c, &[]);
    let after = bench.step(&mut c, &[Command::Reset]);
    assert_eq!(after.state, ProcessState::Ramping);
    assert_eq!(after.experiment, before.experiment);
    assert!(after.commanded_voltage > before.commanded_voltage);
}

#[test]
fn reset_from_idle_is_a_noop() {
    let mut bench = Bench::new();
    let (mut c, _handle) = bench.build(fast_cfg());
    let s = bench.step(&mut c, &[Command::Reset]);
    assert_eq!(s.state, ProcessState::Idle);
}

#[test]
fn reset_after_fault_allows_a_new_experiment() {
    let mut bench = Bench::new();
    let (mut c, handle) = bench.build(fast_cfg());
    bench.step(&mut c, &[Command::Start]);
    bench.step(&mut c, &[Command::Abort]);
    assert_eq!(c.state(), ProcessState::Faulted);

    let s = bench.step(&mut c, &[Command::Reset]);
    assert_eq!(s.state, ProcessState::Idle);
    assert!(s.fault.is_none());
    assert!(s.last_valid.is_some(), "latest valid set is kept after the reset tick");
    assert_eq!(s.pid.integral, 0.0);

    let s = bench.step(&mut c, &[Command::Start]);
    assert_eq!(s.state, ProcessState::Ramping);
    assert_eq!(s.experiment, 2);
    assert_eq!(s.commanded_voltage, 5.0);

    let first = handle.next_stream_timeout(Duration::from_secs(1)).expect("first");
    let second = handle.next_stream_timeout(Duration::from_secs(1)).expect("second");
    assert_eq!(first.experiment(), 1);
    assert_eq!(second.experiment(), 2);
    let first: Vec<_> = first.collect();
    assert_eq!(first.len(), 2);
    assert_eq!(first.last().map(|r| r.state), Some(ProcessState::Faulted));
    assert_eq!(second.try_next().map(|r| r.experiment), Some(2));
}

#[test]
fn reset_after_completion_restores_configured_setpoints() {
    let mut bench = Bench::new();
    let (mut c, _handle) = bench.build(fast_cfg());
    bench.step(&mut c, &[Command::Start]);
    let s = bench.step(
        &mut c,
        &[Command::UpdateSetpoint {
            kind: SetpointKind::Voltage,
            target: 40.0,
            ramp_rate: 200.0,
        }],
    );
    assert_eq!(s.voltage_setpoint.target, 40.0);
    assert_eq!(s.voltage_setpoint.ramp_rate, 200.0);

    bench.set(ChannelId::Current, Signal::Value(0.6));
    let done = bench
        .step_until(&mut c, 50, |s| s.state.is_terminal())
        .expect("terminal");
    assert_eq!(done.state, ProcessState::Complete);

    let s = bench.step(&mut c, &[Command::Reset]);
    assert_eq!(s.state, ProcessState::Idle);
    assert_eq!(s.voltage_setpoint.target, 100.0);
    assert_eq!(s.voltage_setpoint.ramp_rate, 100.0);
}

#[test]
fn invalid_setpoint_updates_are_rejected() {
    let mut bench = Bench::new();
    let (mut c, _handle) = bench.build(fast_cfg());
    bench.step(&mut c, &[Command::Start]);
    let rejected = [
        (SetpointKind::Voltage, 400.0, 10.0),
        (SetpointKind::Voltage, 50.0, 5_000.0),
        (SetpointKind::Voltage, f64::NAN, 10.0),
        (SetpointKind::Current, 1.6, 1.0),
        (SetpointKind::Current, -0.1, 1.0),
        (SetpointKind::Current, 1.0, 0.0),
    ];
    for (kind, target, ramp_rate) in rejected {
        let s = bench.step(
            &mut c,
            &[Command::UpdateSetpoint {
                kind,
                target,
                ramp_rate,
            }],
        );
        assert_eq!(s.voltage_setpoint.target, 100.0, "{kind:?} {target} {ramp_rate}");
        assert_eq!(s.current_setpoint.target, 1.0, "{kind:?} {target} {ramp_rate}");
    }
}
