// knhk-guard: circuit breaker (component H)
//
// State lives in a single `AtomicU8`; every transition is a CAS. That alone
// gives half-open's "exactly one probe in flight" for free — a racing
// caller that doesn't win the `Open -> HalfOpen` CAS just sees `HalfOpen`
// and is rejected by `try_pass`'s own match arm, no extra flag needed.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::bucket::MetricEvent;
use crate::ring::{Ring, StandardHooks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DegradeGrade {
    ExceptionCount,
    ExceptionRatio,
    SlowRatio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradeRule {
    pub resource: String,
    pub grade: DegradeGrade,
    /// Threshold: an absolute count for `ExceptionCount`, a `0.0..=1.0`
    /// ratio otherwise.
    pub count: f64,
    pub time_window_s: u64,
    pub stat_interval_ms: u64,
    pub min_request_amount: u64,
    /// Response-time floor, in ms, above which a completed call counts as
    /// "slow" under `SlowRatio` (see DESIGN.md).
    pub slow_rt_ms: u64,
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BreakerState {
    Closed = 0,
    Open = 1,
    HalfOpen = 2,
}

impl BreakerState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => BreakerState::Closed,
            1 => BreakerState::Open,
            _ => BreakerState::HalfOpen,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    Pass,
    /// Passed specifically because this call won the `Open -> HalfOpen`
    /// CAS — the caller is now the half-open probe and must route its
    /// completion through `on_probe_blocked` if it fails for an unrelated,
    /// downstream reason.
    Probe,
    Reject,
}

/// Notified synchronously on every state transition (§4.G, design note 5 —
/// an explicit registry held by the engine rather than ambient globals).
pub trait BreakerObserver: Send + Sync {
    fn on_state_change(
        &self,
        resource: &str,
        prev: BreakerState,
        new: BreakerState,
        rule: &DegradeRule,
        snapshot: Option<f64>,
    );
}

pub struct CircuitBreaker {
    rule: DegradeRule,
    state: AtomicU8,
    next_retry_ms: AtomicI64,
    ring: Ring<StandardHooks>,
    observers: ArcSwap<Vec<Arc<dyn BreakerObserver>>>,
    observer_lock: Mutex<()>,
}

impl CircuitBreaker {
    pub fn new(rule: DegradeRule) -> Self {
        let stat_interval_ms = rule.stat_interval_ms.max(1);
        Self {
            rule,
            state: AtomicU8::new(BreakerState::Closed as u8),
            next_retry_ms: AtomicI64::new(0),
            ring: Ring::new(1, stat_interval_ms, StandardHooks),
            observers: ArcSwap::from_pointee(Vec::new()),
            observer_lock: Mutex::new(()),
        }
    }

    pub fn rule(&self) -> &DegradeRule {
        &self.rule
    }

    pub fn state(&self) -> BreakerState {
        BreakerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn add_observer(&self, observer: Arc<dyn BreakerObserver>) {
        let _guard = self.observer_lock.lock();
        let mut next = (**self.observers.load()).clone();
        next.push(observer);
        self.observers.store(Arc::new(next));
    }

    fn cas_state(&self, from: BreakerState, to: BreakerState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `try_pass` (§4.G).
    pub fn try_pass(&self, now: u64) -> BreakerDecision {
        match self.state() {
            BreakerState::Closed => BreakerDecision::Pass,
            BreakerState::Open => {
                if now as i64 >= self.next_retry_ms.load(Ordering::Acquire)
                    && self.cas_state(BreakerState::Open, BreakerState::HalfOpen)
                {
                    info!(resource = %self.rule.resource, "circuit breaker probing half-open");
                    self.notify(BreakerState::Open, BreakerState::HalfOpen, None);
                    BreakerDecision::Probe
                } else {
                    BreakerDecision::Reject
                }
            }
            BreakerState::HalfOpen => BreakerDecision::Reject,
        }
    }

    /// The probe admitted by `try_pass` was rejected by an unrelated
    /// downstream rule rather than failing on its own merits. Falls straight
    /// back to `OPEN` without touching the stat ring (§4.G scenario 5).
    pub fn on_probe_blocked(&self, now: u64) {
        if self.transition(BreakerState::HalfOpen, BreakerState::Open, now, None) {
            debug!(resource = %self.rule.resource, "half-open probe blocked downstream, reopening");
        }
    }

    /// `on_request_complete` (§4.G).
    pub fn on_request_complete(&self, now: u64, rt_ms: u64, is_exception: bool) {
        let is_slow = rt_ms >= self.rule.slow_rt_ms;
        {
            let window = self.ring.current_window(now);
            window.bucket().add(MetricEvent::Pass, 1);
            match self.rule.grade {
                DegradeGrade::ExceptionCount | DegradeGrade::ExceptionRatio => {
                    if is_exception {
                        window.bucket().add(MetricEvent::Exception, 1);
                    }
                }
                DegradeGrade::SlowRatio => {
                    if is_slow {
                        window.bucket().add(MetricEvent::Block, 1);
                    }
                }
            }
        }

        match self.state() {
            BreakerState::Open => {}
            BreakerState::HalfOpen => {
                let failed = match self.rule.grade {
                    DegradeGrade::SlowRatio => is_slow,
                    DegradeGrade::ExceptionCount | DegradeGrade::ExceptionRatio => is_exception,
                };
                if failed {
                    self.transition(BreakerState::HalfOpen, BreakerState::Open, now, None);
                } else {
                    self.transition(BreakerState::HalfOpen, BreakerState::Closed, now, None);
                }
            }
            BreakerState::Closed => {
                let total = self.ring.sum(MetricEvent::Pass, now);
                if total < self.rule.min_request_amount {
                    return;
                }
                let numerator = match self.rule.grade {
                    DegradeGrade::ExceptionCount | DegradeGrade::ExceptionRatio => {
                        self.ring.sum(MetricEvent::Exception, now)
                    }
                    DegradeGrade::SlowRatio => self.ring.sum(MetricEvent::Block, now),
                };
                let metric = match self.rule.grade {
                    DegradeGrade::ExceptionCount => numerator as f64,
                    DegradeGrade::ExceptionRatio | DegradeGrade::SlowRatio => numerator as f64 / total as f64,
                };
                // An ExceptionCount breaker configured with count=1 must open
                // on exactly one failure, which only works with `>=` (see
                // DESIGN.md).
                if metric >= self.rule.count {
                    self.transition(BreakerState::Closed, BreakerState::Open, now, Some(metric));
                }
            }
        }
    }

    fn transition(&self, from: BreakerState, to: BreakerState, now: u64, snapshot: Option<f64>) -> bool {
        if !self.cas_state(from, to) {
            return false;
        }
        if to == BreakerState::Open {
            let recovery_ms = self.rule.time_window_s as i64 * 1000;
            let candidate = now as i64 + recovery_ms;
            let mut prev = self.next_retry_ms.load(Ordering::Acquire);
            loop {
                // Strictly increasing on every transition into OPEN (invariant 3),
                // even if the wall clock doesn't advance between transitions.
                let next = candidate.max(prev + 1);
                match self
                    .next_retry_ms
                    .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
                {
                    Ok(_) => break,
                    Err(observed) => prev = observed,
                }
            }
        }
        if to == BreakerState::Closed {
            self.ring.current_window(now).bucket().reset();
        }
        info!(resource = %self.rule.resource, ?from, ?to, "circuit breaker transition");
        self.notify(from, to, snapshot);
        true
    }

    fn notify(&self, prev: BreakerState, new: BreakerState, snapshot: Option<f64>) {
        for observer in self.observers.load().iter() {
            observer.on_state_change(&self.rule.resource, prev, new, &self.rule, snapshot);
        }
    }
}

impl std::fmt::Debug for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            BreakerState::Closed => "CLOSED",
            BreakerState::Open => "OPEN",
            BreakerState::HalfOpen => "HALF_OPEN",
        };
        f.write_str(s)
    }
}

/// Breakers bound to a resource, keyed by resource name (§4.H: "invoke the
/// circuit breaker's `on_request_complete` for each breaker bound to the
/// resource").
pub struct CircuitBreakerRegistry {
    breakers: dashmap::DashMap<String, Arc<Vec<Arc<CircuitBreaker>>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            breakers: dashmap::DashMap::new(),
        }
    }

    pub fn register(&self, rule: DegradeRule) -> Arc<CircuitBreaker> {
        let cb = Arc::new(CircuitBreaker::new(rule.clone()));
        self.breakers
            .entry(rule.resource.clone())
            .and_modify(|existing| {
                let mut next = (**existing).clone();
                next.push(cb.clone());
                *existing = Arc::new(next);
            })
            .or_insert_with(|| Arc::new(vec![cb.clone()]));
        cb
    }

    pub fn for_resource(&self, resource: &str) -> Arc<Vec<Arc<CircuitBreaker>>> {
        self.breakers
            .get(resource)
            .map(|v| v.clone())
            .unwrap_or_else(|| Arc::new(Vec::new()))
    }
}
