//! Shared data model for the Ratchet autonomous code-improvement engine.
//!
//! Every other crate in the workspace depends on this one for the types
//! that cross component boundaries: tickets, runs, events, proposals, and
//! the error taxonomy. Keeping them in one crate means a `Ticket` read back
//! from `ratchet-persistence` is the exact same type a `ratchet-tickets`
//! pipeline step mutates — no translation layer, no duplicate enums drifting
//! out of sync.

pub mod commit_plan;
pub mod dedup;
pub mod error;
pub mod event;
pub mod learning;
pub mod project;
pub mod proposal;
pub mod run;
pub mod sector;
pub mod session_state;
pub mod spindle;
pub mod ticket;
pub mod trajectory;

pub use commit_plan::{CommitPlan, FileAction, PlannedFile};
pub use dedup::DedupEntry;
pub use error::{ErrorKind, RatchetError};
pub use event::{Event, EventType};
pub use learning::{FailureContext, Learning, LearningCategory, SourceTag, StructuredKnowledge};
pub use project::Project;
pub use proposal::{Complexity, Proposal, ProposalCategory};
pub use run::{Run, RunStatus, RunStep, RunStepStatus, RunType};
pub use sector::{CategoryAffinity, Classification, Difficulty, Sector};
pub use session_state::{
    BudgetCounters, Phase, ScopeConfig, SessionState, WorkerSubState, complexity_rank,
};
pub use spindle::{SpindleDiagnostics, SpindleReason, SpindleState, SpindleVerdict};
pub use ticket::{Ticket, TicketCategory, TicketStatus};
pub use trajectory::{Trajectory, TrajectoryStep, TrajectoryStepStatus};

/// Result alias used throughout the workspace; every fallible public
/// function returns this rather than a crate-local error type, so a
/// `RatchetError` can cross a component boundary without translation.
pub type Result<T> = std::result::Result<T, RatchetError>;
