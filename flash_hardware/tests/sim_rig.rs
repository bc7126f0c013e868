use std::sync::Arc;
use std::time::Duration;

use flash_hardware::{SimParams, SimulatedRig};
use flash_traits::clock::ManualClock;
use flash_traits::{ActuatorChannel, ChannelId, SensorChannel};
use rstest::rstest;

fn rig_with(params: SimParams) -> (SimulatedRig, ManualClock) {
    let clock = ManualClock::new();
    let rig = SimulatedRig::new(params, Arc::new(clock.clone()));
    (rig, clock)
}

#[rstest]
#[case(ChannelId::Voltage)]
#[case(ChannelId::Current)]
#[case(ChannelId::Temperature)]
fn sensors_report_their_channel(#[case] channel: ChannelId) {
    let (rig, _clock) = rig_with(SimParams::default());
    let sensor = rig.sensor(channel);
    assert_eq!(sensor.channel(), channel);
}

#[test]
fn idle_rig_reads_ambient_and_no_power() {
    let (rig, _clock) = rig_with(SimParams::default());
    let t = rig.sensor(ChannelId::Temperature).read(Duration::from_millis(10)).unwrap();
    let v = rig.sensor(ChannelId::Voltage).read(Duration::from_millis(10)).unwrap();
    let i = rig.sensor(ChannelId::Current).read(Duration::from_millis(10)).unwrap();
    assert_eq!(t, 25.0);
    assert_eq!(v, 0.0);
    assert_eq!(i, 0.0);
}

#[test]
fn slow_conversion_times_out() {
    let params = SimParams {
        read_latency: Duration::from_millis(30),
        ..SimParams::default()
    };
    let (rig, clock) = rig_with(params);
    let mut sensor = rig.sensor(ChannelId::Current);
    assert!(sensor.read(Duration::from_millis(10)).is_err());
    assert_eq!(clock.elapsed(), Duration::from_millis(10));
    assert!(sensor.read(Duration::from_millis(50)).is_ok());
}

#[test]
fn hot_sample_runs_away_into_current_limit() {
    let params = SimParams {
        furnace_start_c: 780.0,
        furnace_setpoint_c: 800.0,
        ..SimParams::default()
    };
    let (rig, clock) = rig_with(params);
    rig.current_limit_output().set_output(1.0).unwrap();
    rig.voltage_output().set_output(100.0).unwrap();

    let mut limited = false;
    for _ in 0..200 {
        clock.advance(Duration::from_millis(50));
        if rig.state().unwrap().constant_current {
            limited = true;
            break;
        }
    }
    assert!(limited, "sample never reached the current limit");
    let i = rig.sensor(ChannelId::Current).read(Duration::from_millis(10)).unwrap();
    assert!((i - 1.0).abs() < 1e-9);
}

#[test]
fn outputs_expose_supply_ratings() {
    let (rig, _clock) = rig_with(SimParams::default());
    assert_eq!(rig.voltage_output().range().max, 300.0);
    assert_eq!(rig.current_limit_output().range().max, 2.0);
}
