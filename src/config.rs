// knhk-guard: process-wide configuration

use serde::{Deserialize, Serialize};

/// Process-wide tunables. Read once at node construction; the engine never
/// re-reads these mid-decision, so `OCCUPY_TIMEOUT` is effectively read
/// exactly once per `try_occupy_next` call.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Buckets per sliding window ring (default 2).
    pub sample_count: usize,
    /// Width in milliseconds of the sub-second ring (default 1000).
    pub interval_ms: u64,
    /// Budget, in milliseconds, for priority-wait admission (default 500).
    pub occupy_timeout_ms: u64,
    /// Ceiling applied to recorded response times (default 5000).
    pub statistic_max_rt_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            sample_count: 2,
            interval_ms: 1000,
            occupy_timeout_ms: 500,
            statistic_max_rt_ms: 5000,
        }
    }
}

impl GuardConfig {
    pub fn window_length_ms(&self) -> u64 {
        self.interval_ms / self.sample_count as u64
    }

    /// Clamp a raw response time to `statistic_max_rt_ms`.
    pub fn clamp_rt(&self, rt_ms: u64) -> u64 {
        rt_ms.min(self.statistic_max_rt_ms)
    }
}
