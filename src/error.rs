// knhk-guard: error types

use thiserror::Error;

/// Result type returned by every public operation of the engine.
pub type GuardResult<T> = Result<T, GuardError>;

/// The five error kinds the engine can surface.
///
/// `BlockedByFlow` and `BlockedByDegrade` are the two block kinds; they are
/// the only variants `GuardError::is_block` reports true for, which is what
/// the circuit breaker's half-open probe handling uses to distinguish "the
/// protected call itself failed" from "a downstream rule rejected the call".
#[derive(Debug, Error, Clone)]
pub enum GuardError {
    #[error("blocked by flow rule for resource '{resource}' (limit-app: {limit_app})")]
    BlockedByFlow { resource: String, limit_app: String },

    #[error("blocked by degrade rule for resource '{resource}'")]
    BlockedByDegrade { resource: String },

    #[error("internal error in protected call: {0}")]
    Internal(String),

    #[error("invalid rule: {0}")]
    InvalidRule(String),
}

impl GuardError {
    /// True for the two block kinds (§7: blocked-by-flow, blocked-by-degrade).
    ///
    /// A block error is never counted as an exception on exit (§4.H), and is
    /// what distinguishes a circuit breaker half-open probe that failed
    /// because of its own protected logic from one rejected by an unrelated
    /// downstream rule (§4.G scenario 5).
    pub fn is_block(&self) -> bool {
        matches!(
            self,
            GuardError::BlockedByFlow { .. } | GuardError::BlockedByDegrade { .. }
        )
    }
}
