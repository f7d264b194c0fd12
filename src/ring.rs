// knhk-guard: ring bucket array (components A, B, C)
//
// `Ring<H>` is generic over a `RingHooks` implementation rather than being
// specialised by inheritance (design note 1). `StandardHooks` is the plain
// sliding window; `BorrowHooks` gives a ring whose slots hold scheduled
// *future* passes; `OccupiableHooks` composes the two, seeding a freshly
// materialised real slot from the matching borrow slot.
//
// The hot path — a slot whose start already matches the requested window —
// is one atomic load and a pointer-free integer compare. Only the stale and
// empty branches touch the per-ring mutex, and only to swap the wrapper's
// start/bucket in place; the mutex is never held across a slot lookup.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::bucket::{MetricBucket, MetricEvent};

/// A bucket paired with the window it currently represents.
///
/// `start_ms` is mutated in place when the ring recycles a stale slot; this
/// is the only field that changes after construction.
#[derive(Debug)]
pub struct WindowWrapper {
    start_ms: AtomicU64,
    window_length_ms: u64,
    bucket: MetricBucket,
}

impl WindowWrapper {
    fn new(start_ms: u64, window_length_ms: u64, bucket: MetricBucket) -> Self {
        Self {
            start_ms: AtomicU64::new(start_ms),
            window_length_ms,
            bucket,
        }
    }

    pub fn start_ms(&self) -> u64 {
        self.start_ms.load(Ordering::Acquire)
    }

    pub fn window_length_ms(&self) -> u64 {
        self.window_length_ms
    }

    pub fn bucket(&self) -> &MetricBucket {
        &self.bucket
    }

    pub fn contains(&self, t: u64) -> bool {
        let s = self.start_ms();
        t >= s && t < s + self.window_length_ms
    }

    fn set_start_ms(&self, start_ms: u64) {
        self.start_ms.store(start_ms, Ordering::Release);
    }
}

/// The two seams a ring needs to become a borrow ring or an occupiable ring
/// without inheriting from the standard one.
pub trait RingHooks: Send + Sync + 'static {
    fn new_empty_bucket(&self, _start_ms: u64) -> MetricBucket {
        MetricBucket::new()
    }

    fn reset_window_to(&self, bucket: &MetricBucket, _start_ms: u64) {
        bucket.reset();
    }

    /// Whether the slot starting at `slot_start` should be considered
    /// outside the window as of `now`.
    fn is_stale(&self, now: u64, slot_start: u64, interval_ms: u64) -> bool {
        now.saturating_sub(slot_start) >= interval_ms
    }

    /// Called immediately after a slot is installed or recycled, with the
    /// freshly (re)started bucket. The occupiable ring uses this to pull a
    /// matching borrow-ring pass count into the new bucket.
    fn on_materialized(&self, _start_ms: u64, _bucket: &MetricBucket) {}
}

/// The plain sliding-window ring (component A).
#[derive(Debug, Default)]
pub struct StandardHooks;
impl RingHooks for StandardHooks {}

/// A ring of scheduled-future buckets (component B). A slot is "stale" — and
/// so becomes visible to readers via `values`/`sum` — the instant its moment
/// arrives, rather than a full interval later.
#[derive(Debug, Default)]
pub struct BorrowHooks;
impl RingHooks for BorrowHooks {
    fn is_stale(&self, now: u64, slot_start: u64, _interval_ms: u64) -> bool {
        now >= slot_start
    }
}

/// Composes a standard ring with a borrow ring (component C): every newly
/// materialised slot is seeded with whatever pass count was scheduled for
/// it.
pub struct OccupiableHooks {
    borrow: Arc<Ring<BorrowHooks>>,
}

impl OccupiableHooks {
    pub fn new(borrow: Arc<Ring<BorrowHooks>>) -> Self {
        Self { borrow }
    }

    pub fn borrow_ring(&self) -> &Ring<BorrowHooks> {
        &self.borrow
    }
}

impl RingHooks for OccupiableHooks {
    fn on_materialized(&self, start_ms: u64, bucket: &MetricBucket) {
        let borrowed = self.borrow.peek_value(MetricEvent::Pass, start_ms);
        if borrowed > 0 {
            bucket.add(MetricEvent::Pass, borrowed);
        }
    }
}

/// A fixed-size ring of `sample_count` slots spanning `interval_ms`.
pub struct Ring<H: RingHooks> {
    slots: Vec<ArcSwapOption<WindowWrapper>>,
    window_length_ms: u64,
    sample_count: usize,
    interval_ms: u64,
    reset_lock: Mutex<()>,
    hooks: H,
}

impl<H: RingHooks> Ring<H> {
    pub fn new(sample_count: usize, window_length_ms: u64, hooks: H) -> Self {
        assert!(sample_count > 0, "sample_count must be positive");
        assert!(window_length_ms > 0, "window_length_ms must be positive");
        let mut slots = Vec::with_capacity(sample_count);
        slots.resize_with(sample_count, ArcSwapOption::empty);
        Self {
            slots,
            window_length_ms,
            sample_count,
            interval_ms: window_length_ms * sample_count as u64,
            reset_lock: Mutex::new(()),
            hooks,
        }
    }

    pub fn window_length_ms(&self) -> u64 {
        self.window_length_ms
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    pub fn sample_count(&self) -> usize {
        self.sample_count
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    fn slot_index(&self, t: u64) -> usize {
        ((t / self.window_length_ms) % self.sample_count as u64) as usize
    }

    fn window_start(&self, t: u64) -> u64 {
        t - (t % self.window_length_ms)
    }

    /// Returns the window wrapper whose window contains `now`, installing
    /// or recycling the backing slot as needed (§4.A).
    pub fn current_window(&self, now: u64) -> Arc<WindowWrapper> {
        let idx = self.slot_index(now);
        let start = self.window_start(now);

        loop {
            match self.slots[idx].load_full() {
                None => {
                    let bucket = self.hooks.new_empty_bucket(start);
                    let fresh = Arc::new(WindowWrapper::new(start, self.window_length_ms, bucket));
                    let previous = self.slots[idx].compare_and_swap(&None::<Arc<WindowWrapper>>, Some(fresh.clone()));
                    if previous.is_none() {
                        self.hooks.on_materialized(start, fresh.bucket());
                        return fresh;
                    }
                    // Lost the race to install; whoever won is now in the slot.
                    std::thread::yield_now();
                }
                Some(arc) => {
                    let slot_start = arc.start_ms();
                    if slot_start == start {
                        return arc;
                    } else if slot_start < start {
                        match self.reset_lock.try_lock() {
                            Some(_guard) => {
                                // Re-check: another thread may have reset this
                                // slot while we waited for the lock.
                                if arc.start_ms() < start {
                                    self.hooks.reset_window_to(arc.bucket(), start);
                                    arc.set_start_ms(start);
                                    self.hooks.on_materialized(start, arc.bucket());
                                }
                                return arc;
                            }
                            None => std::thread::yield_now(),
                        }
                    } else {
                        // Clock skew: a slot newer than our computed start.
                        // Return an unlinked wrapper rather than install it.
                        let bucket = self.hooks.new_empty_bucket(start);
                        return Arc::new(WindowWrapper::new(start, self.window_length_ms, bucket));
                    }
                }
            }
        }
    }

    /// Non-stale buckets as of `now` (order unspecified).
    pub fn values(&self, now: u64) -> Vec<Arc<WindowWrapper>> {
        self.slots
            .iter()
            .filter_map(|s| s.load_full())
            .filter(|a| !self.hooks.is_stale(now, a.start_ms(), self.interval_ms))
            .collect()
    }

    /// The bucket covering `now - window_length_ms`, if it hasn't gone stale.
    pub fn previous_window(&self, now: u64) -> Option<Arc<WindowWrapper>> {
        let target = now.checked_sub(self.window_length_ms)?;
        let idx = self.slot_index(target);
        let start = self.window_start(target);
        self.slots[idx]
            .load_full()
            .filter(|a| a.start_ms() == start && !self.hooks.is_stale(now, a.start_ms(), self.interval_ms))
    }

    /// Reads a counter from whatever slot currently claims `start`, without
    /// materialising anything and without applying the staleness predicate —
    /// a slot that no longer claims `start` has already been recycled, which
    /// is itself the staleness signal this accessor needs.
    pub fn peek_value(&self, event: MetricEvent, start: u64) -> u64 {
        let idx = self.slot_index(start);
        match self.slots[idx].load_full() {
            Some(a) if a.start_ms() == start => a.bucket().value(event),
            _ => 0,
        }
    }

    pub fn sum(&self, event: MetricEvent, now: u64) -> u64 {
        self.values(now).iter().map(|a| a.bucket().value(event)).sum()
    }

    pub fn sum_rt(&self, now: u64) -> u64 {
        self.values(now).iter().map(|a| a.bucket().rt()).sum()
    }

    pub fn max_over_buckets(&self, event: MetricEvent, now: u64) -> u64 {
        self.values(now)
            .iter()
            .map(|a| a.bucket().value(event))
            .max()
            .unwrap_or(0)
    }

    /// Sum of scheduled-future passes still live (component C). Meaningful
    /// only when `H` is `BorrowHooks`.
    pub fn current_waiting(&self, now: u64) -> u64 {
        self.sum(MetricEvent::Pass, now)
    }
}

impl Ring<OccupiableHooks> {
    pub fn borrow_ring(&self) -> &Ring<BorrowHooks> {
        self.hooks().borrow_ring()
    }
}
