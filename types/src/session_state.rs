use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::commit_plan::CommitPlan;
use crate::dedup::DedupEntry;
use crate::learning::Learning;
use crate::proposal::{Complexity, Proposal};
use crate::spindle::SpindleState;

/// A state of the phase machine's driving loop. Terminal variants end the
/// session; all others are revisited by `advance()`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Scout,
    Plan,
    Execute,
    Qa,
    Pr,
    NextTicket,
    ParallelExecute,
    Done,
    BlockedNeedsHuman,
    FailedBudget,
    FailedValidation,
    FailedSpindle,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Phase::Done
                | Phase::BlockedNeedsHuman
                | Phase::FailedBudget
                | Phase::FailedValidation
                | Phase::FailedSpindle
        )
    }
}

/// Scout acceptance thresholds for the running session, mutable between
/// cycles (e.g. loosened after repeated empty scout results).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScopeConfig {
    pub formula: String,
    pub categories: Vec<String>,
    pub min_confidence: u8,
    pub min_impact: u8,
    pub max_proposals: u32,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            formula: "balanced".to_string(),
            categories: Vec::new(),
            min_confidence: 60,
            min_impact: 3,
            max_proposals: 10,
        }
    }
}

/// Running totals checked against session budgets before each prompt.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BudgetCounters {
    pub tickets_completed: u32,
    pub tickets_failed: u32,
    pub tickets_blocked: u32,
    pub prs_created: u32,
    pub scout_cycles: u32,
    pub lines_changed: u64,
    /// Spindle aborts recovered from by blocking the current ticket and
    /// continuing the session. A `should_block` verdict never increments
    /// this — only `should_abort` does.
    pub spindle_recoveries_used: u32,
}

/// Per-worker state for `Phase::ParallelExecute`, one per ticket pipeline
/// running inside the fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerSubState {
    pub ticket_id: Uuid,
    pub phase: Phase,
    pub qa_retry_count: u32,
    pub spindle: SpindleState,
}

/// In-memory state of the phase machine, snapshotted to disk at each
/// transition (`<state_dir>/runs/<run_id>/state.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionState {
    pub run_id: Uuid,
    pub phase: Phase,
    pub step: u64,
    pub ticket_step: u64,
    pub budgets: BudgetCounters,
    pub current_ticket_id: Option<Uuid>,
    pub current_plan: Option<CommitPlan>,
    pub plan_approved: bool,
    pub plan_rejection_count: u32,
    pub qa_retry_count: u32,
    pub scout_retry_count: u32,
    pub scope: ScopeConfig,
    pub hints: Vec<String>,
    pub parallel_width: u32,
    pub workers: Vec<WorkerSubState>,
    pub spindle: SpindleState,
    pub deferred_proposals: Vec<Proposal>,
    pub dedup_memory: Vec<DedupEntry>,
    pub learnings: Vec<Learning>,
}

impl SessionState {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            phase: Phase::Scout,
            step: 0,
            ticket_step: 0,
            budgets: BudgetCounters::default(),
            current_ticket_id: None,
            current_plan: None,
            plan_approved: false,
            plan_rejection_count: 0,
            qa_retry_count: 0,
            scout_retry_count: 0,
            scope: ScopeConfig::default(),
            hints: Vec::new(),
            parallel_width: 1,
            workers: Vec::new(),
            spindle: SpindleState::new(5),
            deferred_proposals: Vec::new(),
            dedup_memory: Vec::new(),
            learnings: Vec::new(),
        }
    }
}

/// Loose ordering used where a proposal's complexity factors into
/// scheduling (e.g. wave partitioning prefers simpler work first).
pub fn complexity_rank(c: Complexity) -> u8 {
    match c {
        Complexity::Trivial => 0,
        Complexity::Simple => 1,
        Complexity::Moderate => 2,
        Complexity::Complex => 3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_in_scout_with_zero_budgets() {
        let s = SessionState::new(Uuid::new_v4());
        assert_eq!(s.phase, Phase::Scout);
        assert_eq!(s.budgets.prs_created, 0);
        assert!(!s.phase.is_terminal());
    }

    #[test]
    fn terminal_phases_are_flagged() {
        for p in [
            Phase::Done,
            Phase::BlockedNeedsHuman,
            Phase::FailedBudget,
            Phase::FailedValidation,
            Phase::FailedSpindle,
        ] {
            assert!(p.is_terminal());
        }
        assert!(!Phase::NextTicket.is_terminal());
    }
}
