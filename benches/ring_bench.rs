// Benchmarks for the hot paths called on every protected entry: the ring's
// fast-path slot lookup, and the priority-wait search.

use criterion::{criterion_group, criterion_main, Criterion};
use knhk_guard::bucket::MetricEvent;
use knhk_guard::config::GuardConfig;
use knhk_guard::node::StatisticNode;
use knhk_guard::ring::{Ring, StandardHooks};

fn current_window_hot_path(c: &mut Criterion) {
    let ring = Ring::new(2, 500, StandardHooks);
    ring.current_window(0).bucket().add(MetricEvent::Pass, 1);
    c.bench_function("ring_current_window_fast_path", |b| {
        b.iter(|| {
            ring.current_window(0).bucket().add(MetricEvent::Pass, 1);
        });
    });
}

fn try_occupy_next(c: &mut Criterion) {
    let config = GuardConfig::default();
    let node = StatisticNode::new(&config);
    for _ in 0..5 {
        node.add_pass(0, 1);
    }
    c.bench_function("statistic_node_try_occupy_next", |b| {
        b.iter(|| node.try_occupy_next(200, 1, 10.0));
    });
}

criterion_group!(benches, current_window_hot_path, try_occupy_next);
criterion_main!(benches);
