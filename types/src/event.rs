use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Closed enum of journal event types.
///
/// An event is written before any persistent state transition it
/// describes; on crash, `events.ndjson` is the source of truth (see
/// `ratchet_persistence::eventlog`).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    SessionStarted,
    SessionEnded,
    AdvanceCalled,
    AdvanceReturned,
    PhaseTransitioned,
    ScoutStarted,
    ScoutEmptyResult,
    ProposalFound,
    ProposalFiltered,
    ProposalAccepted,
    ProposalDeferred,
    ProposalDuplicate,
    TicketCreated,
    TicketLeased,
    WorktreeCreated,
    WorktreeCleaned,
    AgentInvoked,
    AgentCompleted,
    AgentTimedOut,
    SpindleWarning,
    SpindleAborted,
    SpindleBlocked,
    ScopeChecked,
    ScopeViolation,
    CommitCreated,
    PushSucceeded,
    PushFailed,
    QaStarted,
    QaFailed,
    QaPassed,
    PrCreated,
    PrFailed,
    TicketBlocked,
    TicketDone,
    TicketAborted,
    BudgetWarning,
    BudgetExhausted,
    LearningRecorded,
    DedupRecorded,
    SectorRotated,
}

/// Append-only journal entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    pub run_id: Uuid,
    pub step: u64,
    pub ts: DateTime<Utc>,
    pub event_type: EventType,
    pub payload: serde_json::Value,
}

impl Event {
    pub fn new(run_id: Uuid, step: u64, event_type: EventType, payload: serde_json::Value) -> Self {
        Self {
            run_id,
            step,
            ts: Utc::now(),
            event_type,
            payload,
        }
    }
}
