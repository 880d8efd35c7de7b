//! Error taxonomy for the coordination core.
//!
//! A single flat enum, not a `thiserror` derive — matching the rest of this
//! codebase's preference for hand-written `Display`/`Error` impls on its
//! orchestration-layer errors.

use std::error::Error as StdError;
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, CoreError>;

/// The crate's error taxonomy.
///
/// Every fallible public operation in this crate returns one of these kinds;
/// none of them retry internally, by design (see `CoreError::ModelTransport`).
#[derive(Debug)]
pub enum CoreError {
    /// Queue or session terminated while an operation was pending.
    Aborted,
    /// Operation attempted on a session that isn't RUNNING.
    NotActive,
    /// `execute` called on an agent that already has a task running.
    Busy,
    /// Unknown `agentId` or `taskId`.
    NotFound(String),
    /// `start()` attempted without credentials.
    Auth(String),
    /// Surfaced from the `ModelClient`; treated opaquely.
    ModelTransport(Box<dyn StdError + Send + Sync>),
    /// The orchestrator failed to parse a plan.
    Parse(String),
    /// A plan step exceeded its deadline.
    Timeout,
    /// An invariant was violated.
    Internal(String),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Aborted => write!(f, "operation aborted: queue or session terminated"),
            CoreError::NotActive => write!(f, "session is not active"),
            CoreError::Busy => write!(f, "agent is already executing a task"),
            CoreError::NotFound(id) => write!(f, "not found: {}", id),
            CoreError::Auth(msg) => write!(f, "authentication error: {}", msg),
            CoreError::ModelTransport(err) => write!(f, "model transport error: {}", err),
            CoreError::Parse(msg) => write!(f, "plan parse error: {}", msg),
            CoreError::Timeout => write!(f, "operation timed out"),
            CoreError::Internal(msg) => write!(f, "internal error: {}", msg),
        }
    }
}

impl StdError for CoreError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            CoreError::ModelTransport(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl CoreError {
    /// Short, stable tag used on `FAILED` / `SessionEvent::Failed` wire events.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::Aborted => "Aborted",
            CoreError::NotActive => "NotActive",
            CoreError::Busy => "Busy",
            CoreError::NotFound(_) => "NotFound",
            CoreError::Auth(_) => "Auth",
            CoreError::ModelTransport(_) => "ModelTransport",
            CoreError::Parse(_) => "Parse",
            CoreError::Timeout => "Timeout",
            CoreError::Internal(_) => "Internal",
        }
    }
}
