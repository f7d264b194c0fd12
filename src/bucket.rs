// knhk-guard: metric bucket (component B)
//
// Counters keyed by event kind. All additions are independently atomic;
// there is no multi-counter transaction across a bucket (§5 ordering
// guarantees). Reset is the only way to decrement, and is the only path
// that isn't a plain fetch_add.

use std::sync::atomic::{AtomicU64, Ordering};

/// One of the seven counter kinds a bucket aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricEvent {
    Pass,
    Block,
    Success,
    Exception,
    OccupiedPass,
}

#[derive(Debug)]
pub struct MetricBucket {
    pass: AtomicU64,
    block: AtomicU64,
    success: AtomicU64,
    exception: AtomicU64,
    rt: AtomicU64,
    min_rt: AtomicU64,
    occupied_pass: AtomicU64,
}

impl Default for MetricBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricBucket {
    pub fn new() -> Self {
        Self {
            pass: AtomicU64::new(0),
            block: AtomicU64::new(0),
            success: AtomicU64::new(0),
            exception: AtomicU64::new(0),
            rt: AtomicU64::new(0),
            min_rt: AtomicU64::new(u64::MAX),
            occupied_pass: AtomicU64::new(0),
        }
    }

    pub fn add(&self, event: MetricEvent, count: u64) {
        let target = match event {
            MetricEvent::Pass => &self.pass,
            MetricEvent::Block => &self.block,
            MetricEvent::Success => &self.success,
            MetricEvent::Exception => &self.exception,
            MetricEvent::OccupiedPass => &self.occupied_pass,
        };
        target.fetch_add(count, Ordering::Relaxed);
    }

    /// Records a response time: adds to the running sum and folds into the
    /// running minimum.
    pub fn add_rt(&self, rt_ms: u64) {
        self.rt.fetch_add(rt_ms, Ordering::Relaxed);
        let mut cur = self.min_rt.load(Ordering::Relaxed);
        while rt_ms < cur {
            match self
                .min_rt
                .compare_exchange_weak(cur, rt_ms, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    pub fn pass(&self) -> u64 {
        self.pass.load(Ordering::Relaxed)
    }
    pub fn block(&self) -> u64 {
        self.block.load(Ordering::Relaxed)
    }
    pub fn success(&self) -> u64 {
        self.success.load(Ordering::Relaxed)
    }
    pub fn exception(&self) -> u64 {
        self.exception.load(Ordering::Relaxed)
    }
    pub fn rt(&self) -> u64 {
        self.rt.load(Ordering::Relaxed)
    }
    pub fn min_rt(&self) -> u64 {
        let v = self.min_rt.load(Ordering::Relaxed);
        if v == u64::MAX {
            0
        } else {
            v
        }
    }
    pub fn occupied_pass(&self) -> u64 {
        self.occupied_pass.load(Ordering::Relaxed)
    }

    /// Reads the counter named by `event`. Used by ring accessors that are
    /// generic over which counter they're summing.
    pub fn value(&self, event: MetricEvent) -> u64 {
        match event {
            MetricEvent::Pass => self.pass(),
            MetricEvent::Block => self.block(),
            MetricEvent::Success => self.success(),
            MetricEvent::Exception => self.exception(),
            MetricEvent::OccupiedPass => self.occupied_pass(),
        }
    }

    pub fn has_any(&self) -> bool {
        self.pass() > 0
            || self.block() > 0
            || self.success() > 0
            || self.exception() > 0
            || self.occupied_pass() > 0
    }

    /// Zeroes every counter. The only way counters decrement (§3).
    pub fn reset(&self) {
        self.pass.store(0, Ordering::Relaxed);
        self.block.store(0, Ordering::Relaxed);
        self.success.store(0, Ordering::Relaxed);
        self.exception.store(0, Ordering::Relaxed);
        self.rt.store(0, Ordering::Relaxed);
        self.min_rt.store(u64::MAX, Ordering::Relaxed);
        self.occupied_pass.store(0, Ordering::Relaxed);
    }
}

/// A point-in-time snapshot of a bucket's counters, used by
/// [`crate::node::StatisticNode::metrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BucketDetail {
    pub pass: u64,
    pub block: u64,
    pub success: u64,
    pub exception: u64,
    pub rt: u64,
    pub occupied_pass: u64,
}

impl BucketDetail {
    pub fn from_bucket(bucket: &MetricBucket) -> Self {
        Self {
            pass: bucket.pass(),
            block: bucket.block(),
            success: bucket.success(),
            exception: bucket.exception(),
            rt: bucket.rt(),
            occupied_pass: bucket.occupied_pass(),
        }
    }

    pub fn has_any(&self) -> bool {
        self.pass > 0 || self.block > 0 || self.success > 0 || self.exception > 0 || self.occupied_pass > 0
    }
}
