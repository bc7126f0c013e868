use std::time::Duration;

use flash_traits::Clock;

use crate::error::{HwError, Result};

/// Model an instrument conversion that takes `latency` against a caller
/// `timeout`. Sleeps for the shorter of the two; fails with
/// `ConversionTimeout` when the conversion cannot finish in time.
pub fn wait_for_conversion(clock: &dyn Clock, latency: Duration, timeout: Duration) -> Result<()> {
    if latency > timeout {
        clock.sleep(timeout);
        return Err(HwError::ConversionTimeout {
            latency_ms: latency.as_millis().min(u128::from(u64::MAX)) as u64,
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    clock.sleep(latency);
    Ok(())
}
