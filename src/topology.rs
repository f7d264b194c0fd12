// knhk-guard: invocation topology (component F)
//
// Nodes are created lazily on first entry and live for the process (§3
// lifecycle). Child lists use copy-on-write under a short per-node mutex
// (design note 3): readers always see a consistent, immutable snapshot via
// `ArcSwap`, writers pay a clone-and-swap only on the rare add-child path.

use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;

use crate::config::GuardConfig;
use crate::node::StatisticNode;

/// Per-(context, resource) node. Owns its own counters; the `children` list
/// exists for completeness with §3's "set of child default nodes" but this
/// crate only ever populates it as the direct child of an entrance node —
/// deeper nested-call trees are an orchestration-layer concern out of scope
/// here (§1).
pub struct DefaultNode {
    context_name: String,
    resource_name: String,
    stat: StatisticNode,
    children: ArcSwap<Vec<Arc<DefaultNode>>>,
    child_lock: Mutex<()>,
}

impl DefaultNode {
    fn new(context_name: String, resource_name: String, config: &GuardConfig) -> Self {
        Self {
            context_name,
            resource_name,
            stat: StatisticNode::new(config),
            children: ArcSwap::from_pointee(Vec::new()),
            child_lock: Mutex::new(()),
        }
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn stat(&self) -> &StatisticNode {
        &self.stat
    }

    pub fn add_child(&self, child: Arc<DefaultNode>) {
        let _guard = self.child_lock.lock();
        let mut next = (**self.children.load()).clone();
        next.push(child);
        self.children.store(Arc::new(next));
    }

    pub fn children(&self) -> Arc<Vec<Arc<DefaultNode>>> {
        self.children.load_full()
    }
}

/// Root of a context's invocation tree. Every accessor is a derived sum (or,
/// for `avg_rt`, a `pass_qps`-weighted mean) over its children — it holds no
/// counters of its own (§4.E).
pub struct EntranceNode {
    context_name: String,
    children: ArcSwap<Vec<Arc<DefaultNode>>>,
    child_lock: Mutex<()>,
}

impl EntranceNode {
    fn new(context_name: String) -> Self {
        Self {
            context_name,
            children: ArcSwap::from_pointee(Vec::new()),
            child_lock: Mutex::new(()),
        }
    }

    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    pub fn add_child(&self, child: Arc<DefaultNode>) {
        let _guard = self.child_lock.lock();
        let mut next = (**self.children.load()).clone();
        next.push(child);
        self.children.store(Arc::new(next));
    }

    pub fn children(&self) -> Arc<Vec<Arc<DefaultNode>>> {
        self.children.load_full()
    }

    pub fn pass_qps(&self, now: u64) -> f64 {
        self.children().iter().map(|c| c.stat().pass_qps(now)).sum()
    }

    pub fn block_qps(&self, now: u64) -> f64 {
        self.children().iter().map(|c| c.stat().block_qps(now)).sum()
    }

    pub fn exception_qps(&self, now: u64) -> f64 {
        self.children().iter().map(|c| c.stat().exception_qps(now)).sum()
    }

    pub fn success_qps(&self, now: u64) -> f64 {
        self.children().iter().map(|c| c.stat().success_qps(now)).sum()
    }

    /// `pass_qps`-weighted mean of children's `avg_rt` (scenario 6).
    pub fn avg_rt(&self, now: u64) -> f64 {
        let children = self.children();
        let total_qps: f64 = children.iter().map(|c| c.stat().pass_qps(now)).sum();
        if total_qps <= 0.0 {
            return 0.0;
        }
        children
            .iter()
            .map(|c| c.stat().pass_qps(now) * c.stat().avg_rt(now))
            .sum::<f64>()
            / total_qps
    }
}

/// Per-resource aggregate across all contexts. Unlike the entrance node, it
/// carries its own counters — every entry for this resource, regardless of
/// context, feeds this node directly, which is what lets the rate-limit
/// controller's RELATE/CHAIN strategies (§4.F) observe cross-context load.
pub struct ClusterNode {
    resource_name: String,
    stat: StatisticNode,
    origins: DashMap<String, Arc<StatisticNode>>,
    config: GuardConfig,
}

impl ClusterNode {
    fn new(resource_name: String, config: GuardConfig) -> Self {
        Self {
            resource_name,
            stat: StatisticNode::new(&config),
            origins: DashMap::new(),
            config,
        }
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn stat(&self) -> &StatisticNode {
        &self.stat
    }

    /// The statistic node for one calling origin, created lazily (§3).
    pub fn origin_node(&self, origin: &str) -> Arc<StatisticNode> {
        self.origins
            .entry(origin.to_string())
            .or_insert_with(|| Arc::new(StatisticNode::new(&self.config)))
            .clone()
    }
}

/// Registry of every node in the process, plus the single global in-bound
/// statistic node (§4.H's `global_in_node`).
pub struct Topology {
    config: GuardConfig,
    default_nodes: DashMap<(String, String), Arc<DefaultNode>>,
    entrance_nodes: DashMap<String, Arc<EntranceNode>>,
    cluster_nodes: DashMap<String, Arc<ClusterNode>>,
    global_node: Arc<StatisticNode>,
}

impl Topology {
    pub fn new(config: GuardConfig) -> Self {
        let global_node = Arc::new(StatisticNode::new(&config));
        Self {
            config,
            default_nodes: DashMap::new(),
            entrance_nodes: DashMap::new(),
            cluster_nodes: DashMap::new(),
            global_node,
        }
    }

    pub fn global_node(&self) -> &StatisticNode {
        &self.global_node
    }

    pub fn entrance_node(&self, context_name: &str) -> Arc<EntranceNode> {
        self.entrance_nodes
            .entry(context_name.to_string())
            .or_insert_with(|| Arc::new(EntranceNode::new(context_name.to_string())))
            .clone()
    }

    pub fn cluster_node(&self, resource_name: &str) -> Arc<ClusterNode> {
        self.cluster_nodes
            .entry(resource_name.to_string())
            .or_insert_with(|| Arc::new(ClusterNode::new(resource_name.to_string(), self.config)))
            .clone()
    }

    /// Looks up, or lazily creates, the per-(context, resource) default
    /// node; a freshly created node is attached as a child of the context's
    /// entrance node, creating it if this is the context's first entry
    /// (§4.E).
    pub fn default_node(&self, context_name: &str, resource_name: &str) -> Arc<DefaultNode> {
        let key = (context_name.to_string(), resource_name.to_string());
        if let Some(existing) = self.default_nodes.get(&key) {
            return existing.clone();
        }
        let candidate = Arc::new(DefaultNode::new(
            context_name.to_string(),
            resource_name.to_string(),
            &self.config,
        ));
        let installed = self
            .default_nodes
            .entry(key)
            .or_insert_with(|| candidate.clone())
            .clone();
        if Arc::ptr_eq(&installed, &candidate) {
            self.entrance_node(context_name).add_child(installed.clone());
        }
        installed
    }
}
