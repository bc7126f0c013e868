//! Small numeric and time helpers shared by the control modules.
use std::time::Duration;

/// Move `current` toward `target` by at most `max_step`. A non-finite step
/// jumps straight to the target.
#[inline]
pub fn approach(current: f64, target: f64, max_step: f64) -> f64 {
    if !max_step.is_finite() {
        return target;
    }
    let step = max_step.abs();
    if current < target {
        (current + step).min(target)
    } else {
        (current - step).max(target)
    }
}

/// Whole milliseconds, saturating; for logs and summaries.
#[inline]
pub fn millis(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approach_moves_both_ways_without_overshoot() {
        assert_eq!(approach(0.0, 10.0, 4.0), 4.0);
        assert_eq!(approach(8.0, 10.0, 4.0), 10.0);
        assert_eq!(approach(10.0, 3.0, 4.0), 6.0);
        assert_eq!(approach(0.0, 1.5, f64::INFINITY), 1.5);
        assert_eq!(approach(0.0, 1.5, f64::NAN), 1.5);
    }

    #[test]
    fn millis_saturates() {
        assert_eq!(millis(Duration::from_micros(2500)), 2);
        assert_eq!(millis(Duration::MAX), u64::MAX);
    }
}
