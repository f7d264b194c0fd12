// Entrance node aggregation (§8 scenario 6).

use std::sync::Arc;

use knhk_guard::config::GuardConfig;
use knhk_guard::topology::Topology;

/// Entrance E has children C1 (pass_qps=30, avg_rt=20) and C2 (pass_qps=10,
/// avg_rt=40): E.pass_qps=40, E.avg_rt=(30*20+10*40)/40=25.
#[test]
fn scenario_6_entrance_aggregates_children() {
    let topology = Topology::new(GuardConfig::default());
    let now = 0u64;

    let c1 = topology.default_node("ctx", "c1");
    let c2 = topology.default_node("ctx", "c2");

    // pass_qps(now) = sum(pass) / interval_seconds; interval_seconds = 1.0
    // under the default config, so booking N passes directly yields an
    // N/s rate at t=0.
    c1.stat().add_pass(now, 30);
    c2.stat().add_pass(now, 10);

    // avg_rt = sum(rt) / sum(success); one successful call per unit of rt
    // gives avg_rt == rt directly.
    c1.stat().add_rt_and_success(now, 20, 1);
    c2.stat().add_rt_and_success(now, 40, 1);

    let entrance = topology.entrance_node("ctx");
    assert_eq!(entrance.pass_qps(now), 40.0);
    assert_eq!(entrance.avg_rt(now), 25.0);
}

/// A context's first entry creates its entrance node lazily; resources
/// entered from different contexts never share a default node.
#[test]
fn default_nodes_are_scoped_per_context() {
    let topology = Topology::new(GuardConfig::default());
    let a = topology.default_node("ctx-a", "shared-resource");
    let b = topology.default_node("ctx-b", "shared-resource");
    assert_eq!(a.context_name(), "ctx-a");
    assert_eq!(b.context_name(), "ctx-b");

    let same = topology.default_node("ctx-a", "shared-resource");
    assert!(Arc::ptr_eq(&a, &same));

    assert_eq!(topology.entrance_node("ctx-a").children().len(), 1);
    assert_eq!(topology.entrance_node("ctx-b").children().len(), 1);
}
