//! Sliding-window traffic-governance core: a lock-lean ring-structured
//! sliding window, a rate limiter with priority-wait borrowing, a circuit
//! breaker state machine, and the invocation topology that routes calls to
//! the right counters.
//!
//! Rule loading, configuration parsing, web-framework adapters and the
//! dashboard/remote-rule-distribution surface are out of scope; this crate
//! is the statistics-and-decision engine they sit on top of.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod breaker;
pub mod bucket;
pub mod clock;
pub mod config;
pub mod error;
pub mod flow;
pub mod node;
pub mod pipeline;
pub mod ring;
pub mod topology;

pub use breaker::{BreakerObserver, BreakerState, CircuitBreaker, DegradeGrade, DegradeRule};
pub use clock::{Clock, SystemClock};
pub use config::GuardConfig;
pub use error::{GuardError, GuardResult};
pub use flow::{FlowRule, Grade, LimitApp, Strategy};
pub use node::StatisticNode;
pub use pipeline::{CallOutcome, Engine, Entry, RuleProvider};
pub use topology::{ClusterNode, DefaultNode, EntranceNode, Topology};
