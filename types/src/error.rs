//! The closed error taxonomy shared by every component.
//!
//! Each variant names the policy the phase machine applies when it
//! surfaces: some are immediately fatal, some are recorded as a learning
//! and retried, some are non-fatal and leave the ticket `Done`. The enum
//! lives here rather than per-crate so the phase machine can match on it
//! without a conversion step.

use thiserror::Error;

/// The taxonomy of error kinds the engine distinguishes between.
///
/// Adding a new kind requires updating the phase machine's policy table
/// in `ratchet-phases`, so it is deliberately not left open-ended as a
/// free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    ConfigInvalid,
    PreflightFailed,
    AgentError,
    AgentTimeout,
    SpindleAbort,
    ScopeViolation,
    QaFailed,
    PrFailed,
    BudgetExhausted,
    ValidationFailed,
    Internal,
}

impl ErrorKind {
    /// Whether this kind is fatal to the whole session rather than just
    /// the current ticket.
    pub fn is_session_fatal(self) -> bool {
        matches!(
            self,
            ErrorKind::ConfigInvalid | ErrorKind::PreflightFailed | ErrorKind::BudgetExhausted
        )
    }

    /// Whether this kind leaves the ticket in a non-fatal `Done` state
    /// (pr_failed) rather than `Blocked`/`Aborted`.
    pub fn is_ticket_non_fatal(self) -> bool {
        matches!(self, ErrorKind::PrFailed)
    }
}

/// The error type returned by fallible operations across the workspace.
#[derive(Debug, Error)]
pub enum RatchetError {
    #[error("configuration invalid: {0}")]
    ConfigInvalid(String),

    #[error("preflight check failed: {0}")]
    PreflightFailed(String),

    #[error("agent error: {0}")]
    AgentError(String),

    #[error("agent timed out after {0:?}")]
    AgentTimeout(std::time::Duration),

    #[error("spindle aborted the ticket: {0}")]
    SpindleAbort(String),

    #[error("scope violation: {0}")]
    ScopeViolation(String),

    #[error("QA failed: {0}")]
    QaFailed(String),

    #[error("PR creation failed: {0}")]
    PrFailed(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RatchetError {
    /// The closed-enum kind this error belongs to, for policy dispatch.
    pub fn kind(&self) -> ErrorKind {
        match self {
            RatchetError::ConfigInvalid(_) => ErrorKind::ConfigInvalid,
            RatchetError::PreflightFailed(_) => ErrorKind::PreflightFailed,
            RatchetError::AgentError(_) => ErrorKind::AgentError,
            RatchetError::AgentTimeout(_) => ErrorKind::AgentTimeout,
            RatchetError::SpindleAbort(_) => ErrorKind::SpindleAbort,
            RatchetError::ScopeViolation(_) => ErrorKind::ScopeViolation,
            RatchetError::QaFailed(_) => ErrorKind::QaFailed,
            RatchetError::PrFailed(_) => ErrorKind::PrFailed,
            RatchetError::BudgetExhausted(_) => ErrorKind::BudgetExhausted,
            RatchetError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            RatchetError::Internal(_)
            | RatchetError::Persistence(_)
            | RatchetError::Io(_)
            | RatchetError::Json(_) => ErrorKind::Internal,
        }
    }
}
