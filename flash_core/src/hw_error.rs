//! Maps `Box<dyn Error>` from trait boundaries to typed `FlashError`.
//!
//! `flash_traits` uses `Box<dyn Error + Send + Sync>`; this module converts
//! those to our typed error enum, with an optional feature-gated path for
//! `flash_hardware::HwError` downcasting.

use crate::error::FlashError;

/// Map a trait-boundary error to a typed `FlashError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> FlashError {
    #[cfg(feature = "hardware-errors")]
    {
        use flash_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout | HwError::ConversionTimeout { .. } => FlashError::Timeout,
                other => FlashError::HardwareFault(other.to_string()),
            };
        }
    }

    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        FlashError::Timeout
    } else {
        FlashError::Hardware(s)
    }
}
