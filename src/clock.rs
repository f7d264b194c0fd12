// knhk-guard: monotone millisecond clock
//
// Every statistic operation takes an explicit `now`/`t` parameter; this trait
// only exists to supply that value at the pipeline boundary in a way tests
// can replace.

use std::time::{SystemTime, UNIX_EPOCH};

pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

// Not behind `cfg(test)`: integration tests under `tests/` compile against
// this crate as an ordinary dependency, where `cfg(test)` does not hold, so
// a test-only clock needs to be an always-available module instead.
pub mod test_support {
    use super::Clock;
    use std::sync::atomic::{AtomicU64, Ordering};

    /// Deterministic clock for scenario tests.
    #[derive(Debug, Default)]
    pub struct ManualClock(AtomicU64);

    impl ManualClock {
        pub fn new(start_ms: u64) -> Self {
            Self(AtomicU64::new(start_ms))
        }

        pub fn set(&self, now_ms: u64) {
            self.0.store(now_ms, Ordering::SeqCst);
        }

        pub fn advance(&self, delta_ms: u64) -> u64 {
            self.0.fetch_add(delta_ms, Ordering::SeqCst) + delta_ms
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }
}
