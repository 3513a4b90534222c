//! The ticket execution engine (§4.10, §4.13 components J and the QA
//! service): turns one selected `Ticket` into a pushed branch and,
//! ideally, an open pull request, behind the worktree/agent/spindle
//! primitives owned by their own crates.

pub mod gitdiff;
pub mod pipeline;
pub mod prompt;
pub mod qa;
pub mod scope;

pub use pipeline::{run_ticket, TicketRunConfig, TicketRunResult, TicketTerminal};
pub use prompt::{build_execute_prompt, PromptContext};
pub use qa::{run_verification, QaAttempt, QaConfig, QaError, QaOutcome, QaStepResult};
pub use scope::{check_scope, ScopeViolation, ScopeViolationReason};
