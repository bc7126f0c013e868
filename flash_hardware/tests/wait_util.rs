use std::time::Duration;

use flash_hardware::error::HwError;
use flash_hardware::util::wait_for_conversion;
use flash_traits::clock::ManualClock;

#[test]
fn conversion_within_timeout_sleeps_for_latency() {
    let clock = ManualClock::new();
    let res = wait_for_conversion(&clock, Duration::from_millis(3), Duration::from_millis(50));
    assert!(res.is_ok(), "expected success, got {res:?}");
    assert_eq!(clock.elapsed(), Duration::from_millis(3));
}

#[test]
fn conversion_longer_than_timeout_gives_up_at_timeout() {
    let clock = ManualClock::new();
    let err = wait_for_conversion(&clock, Duration::from_millis(80), Duration::from_millis(20))
        .expect_err("expected timeout error");

    match err {
        HwError::ConversionTimeout {
            latency_ms: 80,
            timeout_ms: 20,
        } => {}
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(clock.elapsed(), Duration::from_millis(20));
}
