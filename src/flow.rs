// knhk-guard: rate-limit controller (component G)

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::node::StatisticNode;
use crate::topology::{ClusterNode, DefaultNode, Topology};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    Thread,
    Qps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strategy {
    Direct,
    Relate,
    Chain,
}

/// The rule's `limit_app` field (§6), as a closed set rather than the
/// sentinel strings `"default"`/`"other"` the wire format uses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimitApp {
    Specific(String),
    Default,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowRule {
    pub resource: String,
    pub grade: Grade,
    pub count: f64,
    pub strategy: Strategy,
    pub ref_resource: Option<String>,
    pub limit_app: LimitApp,
    pub prioritized: bool,
}

pub enum SelectedNode {
    Default(Arc<DefaultNode>),
    Cluster(Arc<ClusterNode>),
    Origin(Arc<StatisticNode>),
}

impl SelectedNode {
    pub fn stat(&self) -> &StatisticNode {
        match self {
            SelectedNode::Default(n) => n.stat(),
            SelectedNode::Cluster(n) => n.stat(),
            SelectedNode::Origin(s) => s,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecision {
    Pass,
    Reject,
    PriorityWait { wait_ms: u64 },
}

/// Node-selection table (§4.F). `origin_is_other` is supplied by the caller,
/// which has visibility into the full rule set for this resource and can
/// determine whether `origin` is targeted by any other specific-limit-app
/// rule; this function only knows about the one rule it was given.
pub fn select_node(
    topology: &Topology,
    context_name: &str,
    resource_name: &str,
    origin: &str,
    rule: &FlowRule,
    origin_is_other: bool,
) -> Option<SelectedNode> {
    match &rule.limit_app {
        LimitApp::Specific(name) if name == origin => select_relative(topology, context_name, resource_name, rule)
            .or_else(|| match rule.strategy {
                Strategy::Direct => Some(SelectedNode::Origin(
                    topology.cluster_node(resource_name).origin_node(origin),
                )),
                _ => None,
            }),
        LimitApp::Specific(_) => None,
        LimitApp::Default => select_relative(topology, context_name, resource_name, rule)
            .or_else(|| match rule.strategy {
                Strategy::Direct => Some(SelectedNode::Cluster(topology.cluster_node(resource_name))),
                _ => None,
            }),
        LimitApp::Other => {
            if origin_is_other && rule.strategy == Strategy::Direct {
                Some(SelectedNode::Origin(
                    topology.cluster_node(resource_name).origin_node(origin),
                ))
            } else {
                None
            }
        }
    }
}

/// The RELATE/CHAIN half of the table, shared by the specific and default
/// limit-app rows.
fn select_relative(
    topology: &Topology,
    context_name: &str,
    resource_name: &str,
    rule: &FlowRule,
) -> Option<SelectedNode> {
    match rule.strategy {
        Strategy::Relate => {
            let target = rule.ref_resource.as_deref().unwrap_or(resource_name);
            Some(SelectedNode::Cluster(topology.cluster_node(target)))
        }
        Strategy::Chain => {
            let target = rule.ref_resource.as_deref().unwrap_or("");
            if target == context_name {
                Some(SelectedNode::Default(
                    topology.default_node(context_name, resource_name),
                ))
            } else {
                None
            }
        }
        Strategy::Direct => None,
    }
}

/// `can_pass` (§4.F). `count` is the rule's threshold; `acquire_count` is
/// how many permits this call needs.
pub fn can_pass(
    node: &StatisticNode,
    now: u64,
    grade: Grade,
    acquire_count: u64,
    count: f64,
    prioritized: bool,
) -> FlowDecision {
    let cur = match grade {
        Grade::Thread => node.cur_thread_num() as f64,
        Grade::Qps => node.pass_qps(now),
    };
    if cur + acquire_count as f64 <= count {
        return FlowDecision::Pass;
    }
    if !prioritized || grade != Grade::Qps {
        return FlowDecision::Reject;
    }
    let wait = node.try_occupy_next(now, acquire_count, count);
    if wait < node.occupy_timeout_ms() {
        node.add_waiting_request(now + wait, acquire_count);
        node.add_occupied_pass(now, acquire_count);
        FlowDecision::PriorityWait { wait_ms: wait }
    } else {
        FlowDecision::Reject
    }
}
