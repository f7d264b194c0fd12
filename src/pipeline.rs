// knhk-guard: pipeline orchestration (component I)
//
// `Engine` is the single entry point the orchestration layer (web-framework
// adapter, annotation interceptor, etc. — all out of scope, §1) drives on
// every protected call: `entry()` before, `exit()` after.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::{trace, warn};

use crate::breaker::{BreakerDecision, CircuitBreaker, CircuitBreakerRegistry, DegradeRule};
use crate::clock::{Clock, SystemClock};
use crate::config::GuardConfig;
use crate::error::{GuardError, GuardResult};
use crate::flow::{can_pass, select_node, FlowDecision, FlowRule, LimitApp};
use crate::node::StatisticNode;
use crate::topology::{ClusterNode, DefaultNode, Topology};

/// External collaborator (§6): given a resource name, returns the rules
/// currently in force for it. Loading, parsing and distribution of rules
/// are out of scope (§1) — the engine only ever reads through this trait.
pub trait RuleProvider: Send + Sync {
    fn flow_rules(&self, resource_name: &str) -> Vec<FlowRule>;
    fn degrade_rules(&self, resource_name: &str) -> Vec<DegradeRule>;
}

/// How a protected call ended, supplied by the caller to `exit()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Success,
    /// The protected logic raised its own error.
    Exception,
    /// The protected logic's failure was itself a block from a downstream
    /// resource's rule (§4.G scenario 5) rather than its own exception.
    Blocked,
}

/// A handle returned by `Engine::entry` and consumed by `Engine::exit`.
pub struct Entry {
    resource_name: String,
    acquire_count: u64,
    create_ms: u64,
    default_node: Arc<DefaultNode>,
    cluster_node: Arc<ClusterNode>,
    origin_node: Option<Arc<StatisticNode>>,
    probed_breakers: Vec<Arc<CircuitBreaker>>,
}

pub struct Engine {
    config: GuardConfig,
    clock: Arc<dyn Clock>,
    topology: Topology,
    breakers: CircuitBreakerRegistry,
    rules: Arc<dyn RuleProvider>,
    registered_degrade: dashmap::DashSet<String>,
}

impl Engine {
    pub fn new(config: GuardConfig, rules: Arc<dyn RuleProvider>) -> Self {
        Self::with_clock(config, rules, Arc::new(SystemClock))
    }

    pub fn with_clock(config: GuardConfig, rules: Arc<dyn RuleProvider>, clock: Arc<dyn Clock>) -> Self {
        Self {
            topology: Topology::new(config),
            breakers: CircuitBreakerRegistry::new(),
            registered_degrade: dashmap::DashSet::new(),
            config,
            clock,
            rules,
        }
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    fn ensure_breakers(&self, resource_name: &str) {
        if self.registered_degrade.contains(resource_name) {
            return;
        }
        for rule in self.rules.degrade_rules(resource_name) {
            self.breakers.register(rule);
        }
        self.registered_degrade.insert(resource_name.to_string());
    }

    /// `enter` (§6). Resolves the topology, evaluates flow rules then the
    /// circuit breaker (§4.H ordering), and — on admission — books the pass.
    pub fn entry(
        &self,
        context_name: &str,
        resource_name: &str,
        origin: &str,
        acquire_count: u64,
        prioritized: bool,
    ) -> GuardResult<Entry> {
        let now = self.clock.now_millis();
        let default_node = self.topology.default_node(context_name, resource_name);
        let cluster_node = self.topology.cluster_node(resource_name);
        let origin_node = if origin.is_empty() {
            None
        } else {
            Some(cluster_node.origin_node(origin))
        };

        let flow_rules = self.rules.flow_rules(resource_name);
        let specific_origins: HashSet<&str> = flow_rules
            .iter()
            .filter_map(|r| match &r.limit_app {
                LimitApp::Specific(name) => Some(name.as_str()),
                _ => None,
            })
            .collect();
        let origin_is_other = !specific_origins.contains(origin);

        let mut admitted_by_wait = false;
        for rule in &flow_rules {
            let Some(selected) = select_node(&self.topology, context_name, resource_name, origin, rule, origin_is_other)
            else {
                continue;
            };
            let effective_prioritized = prioritized && rule.prioritized;
            match can_pass(selected.stat(), now, rule.grade, acquire_count, rule.count, effective_prioritized) {
                FlowDecision::Pass => {}
                FlowDecision::PriorityWait { wait_ms } => {
                    trace!(resource = resource_name, wait_ms, "priority wait admitted");
                    std::thread::sleep(std::time::Duration::from_millis(wait_ms));
                    admitted_by_wait = true;
                }
                FlowDecision::Reject => {
                    warn!(resource = resource_name, limit_app = ?rule.limit_app, "blocked by flow rule");
                    self.book_block(&default_node, &cluster_node, origin_node.as_ref(), now, acquire_count);
                    return Err(GuardError::BlockedByFlow {
                        resource: resource_name.to_string(),
                        limit_app: format!("{:?}", rule.limit_app),
                    });
                }
            }
        }

        self.ensure_breakers(resource_name);
        let breakers = self.breakers.for_resource(resource_name);
        let mut probed_breakers = Vec::new();
        for cb in breakers.iter() {
            match cb.try_pass(now) {
                BreakerDecision::Pass => {}
                BreakerDecision::Probe => probed_breakers.push(cb.clone()),
                BreakerDecision::Reject => {
                    warn!(resource = resource_name, "blocked by degrade rule");
                    self.book_block(&default_node, &cluster_node, origin_node.as_ref(), now, acquire_count);
                    return Err(GuardError::BlockedByDegrade {
                        resource: resource_name.to_string(),
                    });
                }
            }
        }

        default_node.stat().inc_thread(acquire_count as i64);
        cluster_node.stat().inc_thread(acquire_count as i64);
        self.topology.global_node().inc_thread(acquire_count as i64);
        if let Some(o) = &origin_node {
            o.inc_thread(acquire_count as i64);
        }
        // A priority-wait admission was already booked via add_occupied_pass
        // inside `can_pass`; booking it again here would double-count.
        if !admitted_by_wait {
            default_node.stat().add_pass(now, acquire_count);
            cluster_node.stat().add_pass(now, acquire_count);
            self.topology.global_node().add_pass(now, acquire_count);
            if let Some(o) = &origin_node {
                o.add_pass(now, acquire_count);
            }
        }

        Ok(Entry {
            resource_name: resource_name.to_string(),
            acquire_count,
            create_ms: now,
            default_node,
            cluster_node,
            origin_node,
            probed_breakers,
        })
    }

    fn book_block(
        &self,
        default_node: &DefaultNode,
        cluster_node: &ClusterNode,
        origin_node: Option<&Arc<StatisticNode>>,
        now: u64,
        n: u64,
    ) {
        default_node.stat().add_block(now, n);
        cluster_node.stat().add_block(now, n);
        self.topology.global_node().add_block(now, n);
        if let Some(o) = origin_node {
            o.add_block(now, n);
        }
    }

    /// `exit` (§6/§4.H). Always balances `entry`'s thread increment; response
    /// time and exception bookkeeping are skipped for a downstream block
    /// (§7: block errors are never counted as exceptions).
    pub fn exit(&self, entry: Entry, outcome: CallOutcome) {
        let now = self.clock.now_millis();
        let rt = now.saturating_sub(entry.create_ms);
        let n = entry.acquire_count;

        if outcome == CallOutcome::Blocked {
            for cb in &entry.probed_breakers {
                cb.on_probe_blocked(now);
            }
            entry.default_node.stat().dec_thread(n as i64);
            entry.cluster_node.stat().dec_thread(n as i64);
            self.topology.global_node().dec_thread(n as i64);
            if let Some(o) = &entry.origin_node {
                o.dec_thread(n as i64);
            }
            return;
        }

        let is_exception = outcome == CallOutcome::Exception;
        let clamped_rt = self.config.clamp_rt(rt);
        let book = |stat: &StatisticNode| {
            stat.add_rt_and_success(now, clamped_rt, n);
            stat.dec_thread(n as i64);
            if is_exception {
                stat.add_exception(now, n);
            }
        };
        book(entry.default_node.stat());
        book(entry.cluster_node.stat());
        book(self.topology.global_node());
        if let Some(o) = &entry.origin_node {
            book(o);
        }

        for cb in self.breakers.for_resource(&entry.resource_name).iter() {
            cb.on_request_complete(now, rt, is_exception);
        }
    }
}
