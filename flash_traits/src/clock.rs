use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source for the control loop and every backend.
///
/// - now(): monotonic Instant
/// - sleep(): block for `d` (test clocks advance instead of sleeping)
/// - since(): elapsed time from an epoch, saturating at zero
pub trait Clock {
    fn now(&self) -> Instant;
    fn sleep(&self, d: Duration);

    fn since(&self, epoch: Instant) -> Duration {
        self.now().saturating_duration_since(epoch)
    }

    /// Sleep until `deadline`; returns immediately when it already passed.
    fn sleep_until(&self, deadline: Instant) {
        let now = self.now();
        if deadline > now {
            self.sleep(deadline - now);
        }
    }
}

/// Wall-clock monotonic time backed by `std::time::Instant`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl MonotonicClock {
    #[inline]
    pub fn new() -> Self {
        Self
    }
}

impl Clock for MonotonicClock {
    #[inline]
    fn now(&self) -> Instant {
        Instant::now()
    }

    #[inline]
    fn sleep(&self, d: Duration) {
        if d.is_zero() {
            return;
        }
        thread::sleep(d);
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now(&self) -> Instant {
        (**self).now()
    }

    fn sleep(&self, d: Duration) {
        (**self).sleep(d)
    }
}

#[cfg(any(test, feature = "test-util"))]
pub use test_clock::ManualClock;

#[cfg(any(test, feature = "test-util"))]
pub mod test_clock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Deterministic clock whose time only moves when told to.
    ///
    /// now() = origin + offset; sleep(d) advances the offset by d.
    /// Clones share the same offset.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        origin: Instant,
        offset: Arc<Mutex<Duration>>,
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                origin: Instant::now(),
                offset: Arc::new(Mutex::new(Duration::ZERO)),
            }
        }

        pub fn advance(&self, d: Duration) {
            if let Ok(mut off) = self.offset.lock() {
                *off = off.saturating_add(d);
            }
        }

        pub fn elapsed(&self) -> Duration {
            self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO)
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.origin + self.elapsed()
        }

        fn sleep(&self, d: Duration) {
            self.advance(d);
        }
    }

}
