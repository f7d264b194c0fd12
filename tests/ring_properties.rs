// Property tests for the ring bucket array (§8 P1, P2, P3, P6).

use knhk_guard::bucket::MetricEvent;
use knhk_guard::ring::{Ring, StandardHooks};
use proptest::prelude::*;

fn standard_ring(sample_count: usize, window_length_ms: u64) -> Ring<StandardHooks> {
    Ring::new(sample_count, window_length_ms, StandardHooks)
}

proptest! {
    /// P1: for adds confined to one interval, `sum(pass)` equals their total.
    #[test]
    fn p1_sum_equals_total_within_interval(
        counts in prop::collection::vec(1u64..50, 1..20),
        base_t in 0u64..10_000,
    ) {
        let ring = standard_ring(2, 500);
        let interval = ring.interval_ms();
        let t0 = base_t - (base_t % interval);
        let mut expected = 0u64;
        for (i, n) in counts.iter().enumerate() {
            let t = t0 + (i as u64 % interval);
            ring.current_window(t).bucket().add(MetricEvent::Pass, *n);
            expected += n;
        }
        let observed = ring.sum(MetricEvent::Pass, t0 + interval - 1);
        prop_assert_eq!(observed, expected);
    }

    /// P3: K threads adding concurrently never lose an update.
    #[test]
    fn p3_concurrent_adds_no_lost_updates(
        per_thread in prop::collection::vec(1u64..20, 2..8),
    ) {
        let ring = standard_ring(4, 250);
        let now = 1_000u64;
        std::thread::scope(|scope| {
            for n in &per_thread {
                let ring = &ring;
                let n = *n;
                scope.spawn(move || {
                    for _ in 0..50 {
                        ring.current_window(now).bucket().add(MetricEvent::Pass, n);
                    }
                });
            }
        });
        let expected: u64 = per_thread.iter().map(|n| n * 50).sum();
        prop_assert_eq!(ring.sum(MetricEvent::Pass, now), expected);
    }
}

/// P2: a contribution recorded at `t` is invisible once `t' >= t + interval_ms`.
#[test]
fn p2_contribution_expires_after_interval() {
    let ring = standard_ring(2, 500);
    let interval = ring.interval_ms();
    ring.current_window(0).bucket().add(MetricEvent::Pass, 7);
    assert_eq!(ring.sum(MetricEvent::Pass, interval - 1), 7);
    // Advancing every slot to a time at or beyond the horizon retires the
    // contribution: both buckets must be walked forward past it.
    let far = interval * 3;
    ring.current_window(far).bucket().add(MetricEvent::Pass, 1);
    ring.current_window(far - ring.window_length_ms()).bucket().add(MetricEvent::Pass, 1);
    assert_eq!(ring.sum(MetricEvent::Pass, far), 2);
}

/// P6: `previous_window(t)` starts at `t - W - (t mod W)` when present.
#[test]
fn p6_previous_window_start() {
    let ring = standard_ring(3, 300);
    let w = ring.window_length_ms();
    let t = 1_205u64;
    ring.current_window(t).bucket().add(MetricEvent::Pass, 1);
    ring.current_window(t - w).bucket().add(MetricEvent::Pass, 2);
    let prev = ring.previous_window(t).expect("previous bucket is still live");
    assert_eq!(prev.start_ms(), t - w - (t % w));
    assert_eq!(prev.bucket().pass(), 2);
}

#[test]
fn previous_window_absent_when_never_written() {
    let ring = standard_ring(2, 500);
    assert!(ring.previous_window(100).is_none());
}
