// knhk-guard: statistic node (component E)
//
// Every (context, resource) pair, every cluster resource, and every calling
// origin owns one of these. It pairs a sub-second ring (with its borrow
// ring, for priority-wait) and a one-minute ring, and answers the QPS/RT
// queries the controllers in `flow.rs`/`breaker.rs` consult.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::bucket::{BucketDetail, MetricEvent};
use crate::config::GuardConfig;
use crate::ring::{BorrowHooks, OccupiableHooks, Ring, StandardHooks};

const MINUTE_RING_BUCKETS: usize = 60;
const MINUTE_RING_BUCKET_MS: u64 = 1000;

pub struct StatisticNode {
    sub_ring: Ring<OccupiableHooks>,
    minute_ring: Ring<StandardHooks>,
    cur_thread_num: AtomicI64,
    last_fetch_ms: AtomicU64,
    occupy_timeout_ms: u64,
}

impl StatisticNode {
    pub fn new(config: &GuardConfig) -> Self {
        let borrow = Arc::new(Ring::new(
            config.sample_count,
            config.window_length_ms(),
            BorrowHooks,
        ));
        let sub_ring = Ring::new(
            config.sample_count,
            config.window_length_ms(),
            OccupiableHooks::new(borrow),
        );
        let minute_ring = Ring::new(MINUTE_RING_BUCKETS, MINUTE_RING_BUCKET_MS, StandardHooks);
        Self {
            sub_ring,
            minute_ring,
            cur_thread_num: AtomicI64::new(0),
            last_fetch_ms: AtomicU64::new(0),
            occupy_timeout_ms: config.occupy_timeout_ms,
        }
    }

    fn interval_seconds(&self) -> f64 {
        self.sub_ring.interval_ms() as f64 / 1000.0
    }

    pub fn occupy_timeout_ms(&self) -> u64 {
        self.occupy_timeout_ms
    }

    pub fn cur_thread_num(&self) -> i64 {
        self.cur_thread_num.load(Ordering::Relaxed)
    }

    pub fn inc_thread(&self, n: i64) {
        self.cur_thread_num.fetch_add(n, Ordering::Relaxed);
    }

    pub fn dec_thread(&self, n: i64) {
        self.cur_thread_num.fetch_sub(n, Ordering::Relaxed);
    }

    pub fn pass_qps(&self, now: u64) -> f64 {
        self.sub_ring.sum(MetricEvent::Pass, now) as f64 / self.interval_seconds()
    }

    pub fn block_qps(&self, now: u64) -> f64 {
        self.sub_ring.sum(MetricEvent::Block, now) as f64 / self.interval_seconds()
    }

    pub fn exception_qps(&self, now: u64) -> f64 {
        self.sub_ring.sum(MetricEvent::Exception, now) as f64 / self.interval_seconds()
    }

    pub fn success_qps(&self, now: u64) -> f64 {
        self.sub_ring.sum(MetricEvent::Success, now) as f64 / self.interval_seconds()
    }

    pub fn avg_rt(&self, now: u64) -> f64 {
        let success = self.sub_ring.sum(MetricEvent::Success, now).max(1);
        self.sub_ring.sum_rt(now) as f64 / success as f64
    }

    pub fn max_success_qps(&self, now: u64) -> f64 {
        self.sub_ring.max_over_buckets(MetricEvent::Success, now) as f64
            * self.sub_ring.sample_count() as f64
            / self.interval_seconds()
    }

    /// Per-second detail from the minute ring, watermarked by the last call
    /// (§4.D). Callers must serialise their own access per node; the node
    /// does not defend against concurrent callers racing the watermark.
    pub fn metrics(&self, now: u64) -> BTreeMap<u64, BucketDetail> {
        let now_floor = now - (now % MINUTE_RING_BUCKET_MS);
        let last_fetch = self.last_fetch_ms.load(Ordering::Relaxed);
        let mut out = BTreeMap::new();
        let mut max_start = last_fetch;
        for wrapper in self.minute_ring.values(now) {
            let start = wrapper.start_ms();
            if start > last_fetch && start < now_floor {
                let detail = BucketDetail::from_bucket(wrapper.bucket());
                if detail.has_any() {
                    if start > max_start {
                        max_start = start;
                    }
                    out.insert(start, detail);
                }
            }
        }
        if max_start > last_fetch {
            self.last_fetch_ms.store(max_start, Ordering::Relaxed);
        }
        out
    }

    pub fn add_pass(&self, now: u64, n: u64) {
        self.sub_ring.current_window(now).bucket().add(MetricEvent::Pass, n);
        self.minute_ring.current_window(now).bucket().add(MetricEvent::Pass, n);
    }

    pub fn add_block(&self, now: u64, n: u64) {
        self.sub_ring.current_window(now).bucket().add(MetricEvent::Block, n);
        self.minute_ring.current_window(now).bucket().add(MetricEvent::Block, n);
    }

    pub fn add_exception(&self, now: u64, n: u64) {
        self.sub_ring
            .current_window(now)
            .bucket()
            .add(MetricEvent::Exception, n);
        self.minute_ring
            .current_window(now)
            .bucket()
            .add(MetricEvent::Exception, n);
    }

    pub fn add_rt_and_success(&self, now: u64, rt_ms: u64, n: u64) {
        let sub = self.sub_ring.current_window(now);
        sub.bucket().add(MetricEvent::Success, n);
        sub.bucket().add_rt(rt_ms);
        let minute = self.minute_ring.current_window(now);
        minute.bucket().add(MetricEvent::Success, n);
        minute.bucket().add_rt(rt_ms);
    }

    /// Credits the minute ring immediately so it never undercounts relative
    /// to the sub-second ring (invariant 4); the sub-second ring picks up
    /// the same pass later, exactly once, when the borrowed slot it came
    /// from materialises (invariant 5, via `OccupiableHooks`).
    pub fn add_occupied_pass(&self, now: u64, n: u64) {
        let minute = self.minute_ring.current_window(now);
        minute.bucket().add(MetricEvent::Pass, n);
        minute.bucket().add(MetricEvent::OccupiedPass, n);
    }

    pub fn add_waiting_request(&self, future_ms: u64, n: u64) {
        self.sub_ring
            .borrow_ring()
            .current_window(future_ms)
            .bucket()
            .add(MetricEvent::Pass, n);
    }

    /// Priority-wait admission search (§4.D). Returns milliseconds to wait,
    /// or the configured occupy timeout if no future bucket admits the
    /// request within that budget.
    pub fn try_occupy_next(&self, now: u64, acquire_count: u64, threshold: f64) -> u64 {
        let occupy_timeout = self.occupy_timeout_ms;
        let interval_ms = self.sub_ring.interval_ms();
        let w = self.sub_ring.window_length_ms();
        let max_count = (threshold * interval_ms as f64 / 1000.0) as u64;

        let current_borrow = self.sub_ring.borrow_ring().current_waiting(now);
        if current_borrow >= max_count {
            return occupy_timeout;
        }

        let mut earliest: i64 =
            now as i64 - (now % w) as i64 + w as i64 - interval_ms as i64;
        let mut current_pass = self.sub_ring.sum(MetricEvent::Pass, now);
        let mut idx: u64 = 0;

        while earliest < now as i64 {
            let wait = idx * w + (w - now % w);
            if wait >= occupy_timeout {
                break;
            }
            let window_pass = if earliest >= 0 {
                self.sub_ring.peek_value(MetricEvent::Pass, earliest as u64)
            } else {
                0
            };
            if current_pass + current_borrow + acquire_count <= max_count + window_pass {
                return wait;
            }
            earliest += w as i64;
            current_pass = current_pass.saturating_sub(window_pass);
            idx += 1;
        }
        occupy_timeout
    }
}
