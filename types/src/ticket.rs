use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of a ticket.
///
/// Only the owning pipeline step may write a new status; see
/// `ratchet_persistence::TicketRepository::transition` for the edge
/// validation that enforces this at the storage boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketStatus {
    Backlog,
    Ready,
    Leased,
    InProgress,
    InReview,
    Done,
    Blocked,
    Aborted,
}

impl TicketStatus {
    /// The allowed next states from this state. A terminal state such as
    /// `Done` never transitions back to `Leased`; this is the single source
    /// of truth for legal edges.
    pub fn allowed_next(self) -> &'static [TicketStatus] {
        use TicketStatus::*;
        match self {
            Backlog => &[Ready, Aborted],
            Ready => &[Leased, Aborted],
            Leased => &[InProgress, Ready, Aborted],
            InProgress => &[InReview, Done, Blocked, Aborted],
            InReview => &[Done, Blocked, Aborted],
            Done | Blocked | Aborted => &[],
        }
    }

    pub fn can_transition_to(self, next: TicketStatus) -> bool {
        self.allowed_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TicketStatus::Done | TicketStatus::Blocked | TicketStatus::Aborted
        )
    }
}

/// Category taxonomy used by the proposal filter and the phase machine's
/// plan-bypass rule (`docs` tickets skip the plan phase).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TicketCategory {
    Refactor,
    Docs,
    Test,
    Perf,
    Security,
    Fix,
    Cleanup,
    Types,
}

impl TicketCategory {
    /// `docs` tickets bypass the plan phase entirely and go straight from
    /// ticket selection to execution.
    pub fn requires_plan(self) -> bool {
        !matches!(self, TicketCategory::Docs)
    }
}

/// A single unit of work, produced by the proposal pipeline or an
/// external CI-failure handler.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: String,
    pub status: TicketStatus,
    pub priority: i32,
    pub shard: Option<String>,
    pub category: TicketCategory,
    pub allowed_paths: Vec<String>,
    pub forbidden_paths: Vec<String>,
    pub verification_commands: Vec<String>,
    pub max_retries: u32,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Ticket {
    pub fn new(
        project_id: Uuid,
        title: impl Into<String>,
        category: TicketCategory,
        allowed_paths: Vec<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            project_id,
            title: title.into(),
            description: String::new(),
            status: TicketStatus::Backlog,
            priority: 0,
            shard: None,
            category,
            allowed_paths,
            forbidden_paths: Vec::new(),
            verification_commands: Vec::new(),
            max_retries: 2,
            retry_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}
