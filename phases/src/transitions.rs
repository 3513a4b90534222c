//! Pure per-phase transition decisions, one function per row of §4.11's
//! authoritative transition table. Each takes the facts the driver
//! collected for that phase and returns the next [`Phase`] plus any
//! counter update the caller should apply; none of these perform I/O —
//! [`crate::machine::PhaseMachine`] wraps them with event emission and
//! budget checks.

use ratchet_types::{Phase, TicketCategory};

/// `Scout → NextTicket | Scout | Done`.
pub fn scout_transition(
    accepted_ticket_count: u32,
    retry_count: u32,
    retry_cap: u32,
    has_next_sector: bool,
    continuous_mode: bool,
) -> (Phase, ScoutOutcome) {
    if accepted_ticket_count > 0 {
        return (Phase::NextTicket, ScoutOutcome::Accepted);
    }
    if retry_count < retry_cap {
        return (Phase::Scout, ScoutOutcome::RetrySameSector);
    }
    if has_next_sector || continuous_mode {
        return (Phase::Scout, ScoutOutcome::AdvanceSector);
    }
    (Phase::Done, ScoutOutcome::Exhausted)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoutOutcome {
    Accepted,
    RetrySameSector,
    AdvanceSector,
    Exhausted,
}

/// What's known about the next ready ticket, if any, when deciding the
/// `NextTicket` transition.
#[derive(Debug, Clone, Copy)]
pub struct ReadyTicket {
    pub category: TicketCategory,
}

/// `NextTicket → Plan | Execute | ParallelExecute | Scout | Done`.
pub fn next_ticket_transition(
    ready: Option<ReadyTicket>,
    parallel_width: u32,
    non_conflicting_available: bool,
    pr_budget_exhausted: bool,
    max_cycles_reached: bool,
) -> Phase {
    match ready {
        Some(ticket) if parallel_width > 1 && non_conflicting_available => {
            let _ = ticket;
            Phase::ParallelExecute
        }
        Some(ticket) if ticket.category.requires_plan() => Phase::Plan,
        Some(_) => Phase::Execute,
        None if pr_budget_exhausted || max_cycles_reached => Phase::Done,
        None => Phase::Scout,
    }
}

/// `Plan → Execute | Plan`. Returns whether the rejection count exceeded
/// `max_rejections`, in which case the caller blocks the ticket instead of
/// looping back to `Plan`.
pub fn plan_transition(approved: bool, rejection_count: u32, max_rejections: u32) -> PlanOutcome {
    if approved {
        return PlanOutcome { phase: Phase::Execute, ticket_blocked: false };
    }
    if rejection_count >= max_rejections {
        PlanOutcome { phase: Phase::NextTicket, ticket_blocked: true }
    } else {
        PlanOutcome { phase: Phase::Plan, ticket_blocked: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanOutcome {
    pub phase: Phase,
    pub ticket_blocked: bool,
}

/// `Execute → Qa | Execute | NextTicket`.
pub fn execute_transition(ticket_result_done: bool, changed_within_plan: bool, lines_within_budget: bool) -> Phase {
    if !ticket_result_done {
        return Phase::NextTicket;
    }
    if changed_within_plan && lines_within_budget {
        Phase::Qa
    } else {
        Phase::Execute
    }
}

/// `Qa → Pr | Execute | NextTicket`.
pub fn qa_transition(qa_passed: bool, qa_retry_count: u32, qa_retry_cap: u32) -> QaOutcome {
    if qa_passed {
        return QaOutcome { phase: Phase::Pr, ticket_blocked: false };
    }
    if qa_retry_count < qa_retry_cap {
        QaOutcome { phase: Phase::Execute, ticket_blocked: false }
    } else {
        QaOutcome { phase: Phase::NextTicket, ticket_blocked: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QaOutcome {
    pub phase: Phase,
    pub ticket_blocked: bool,
}

/// `Pr → NextTicket`, unconditionally — a PR failure is non-fatal (§7,
/// `PrFailed`), so there's no branch here.
pub fn pr_transition() -> Phase {
    Phase::NextTicket
}

/// A spindle `should_abort` verdict in any non-terminal phase. Recovery
/// budget is the number of times a session tolerates discarding a
/// worktree and blocking the ticket before giving up entirely. A
/// `should_block` verdict is deliberately NOT routed through this
/// function — it blocks the current ticket without touching the
/// recovery budget at all (see `PhaseMachine::on_spindle_block`).
pub fn spindle_abort_transition(recoveries_used: u32, recovery_cap: u32) -> Phase {
    if recoveries_used < recovery_cap {
        Phase::NextTicket
    } else {
        Phase::FailedSpindle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scout_with_accepted_tickets_advances() {
        let (phase, outcome) = scout_transition(3, 0, 2, true, false);
        assert_eq!(phase, Phase::NextTicket);
        assert_eq!(outcome, ScoutOutcome::Accepted);
    }

    #[test]
    fn scout_empty_retries_up_to_cap_then_advances_sector() {
        let (phase, outcome) = scout_transition(0, 0, 2, true, false);
        assert_eq!(phase, Phase::Scout);
        assert_eq!(outcome, ScoutOutcome::RetrySameSector);

        let (phase, outcome) = scout_transition(0, 2, 2, true, false);
        assert_eq!(phase, Phase::Scout);
        assert_eq!(outcome, ScoutOutcome::AdvanceSector);
    }

    #[test]
    fn scout_exhausted_with_no_sector_and_not_continuous_is_done() {
        let (phase, outcome) = scout_transition(0, 2, 2, false, false);
        assert_eq!(phase, Phase::Done);
        assert_eq!(outcome, ScoutOutcome::Exhausted);
    }

    #[test]
    fn docs_ticket_bypasses_plan() {
        let ready = Some(ReadyTicket { category: TicketCategory::Docs });
        assert_eq!(next_ticket_transition(ready, 1, false, false, false), Phase::Execute);
    }

    #[test]
    fn non_docs_ticket_requires_plan() {
        let ready = Some(ReadyTicket { category: TicketCategory::Fix });
        assert_eq!(next_ticket_transition(ready, 1, false, false, false), Phase::Plan);
    }

    #[test]
    fn parallel_width_with_non_conflicting_tickets_fans_out() {
        let ready = Some(ReadyTicket { category: TicketCategory::Fix });
        assert_eq!(next_ticket_transition(ready, 3, true, false, false), Phase::ParallelExecute);
    }

    #[test]
    fn no_ready_tickets_with_budget_left_returns_to_scout() {
        assert_eq!(next_ticket_transition(None, 1, false, false, false), Phase::Scout);
    }

    #[test]
    fn no_ready_tickets_and_budget_exhausted_is_done() {
        assert_eq!(next_ticket_transition(None, 1, false, true, false), Phase::Done);
    }

    #[test]
    fn plan_rejected_under_cap_loops() {
        let outcome = plan_transition(false, 1, 3);
        assert_eq!(outcome.phase, Phase::Plan);
        assert!(!outcome.ticket_blocked);
    }

    #[test]
    fn plan_rejected_past_cap_blocks_ticket() {
        let outcome = plan_transition(false, 3, 3);
        assert_eq!(outcome.phase, Phase::NextTicket);
        assert!(outcome.ticket_blocked);
    }

    #[test]
    fn execute_failure_returns_to_next_ticket() {
        assert_eq!(execute_transition(false, true, true), Phase::NextTicket);
    }

    #[test]
    fn execute_success_out_of_plan_scope_redrives() {
        assert_eq!(execute_transition(true, false, true), Phase::Execute);
    }

    #[test]
    fn execute_success_within_plan_goes_to_qa() {
        assert_eq!(execute_transition(true, true, true), Phase::Qa);
    }

    #[test]
    fn qa_retry_under_cap_redrives_execute() {
        let outcome = qa_transition(false, 0, 2);
        assert_eq!(outcome.phase, Phase::Execute);
        assert!(!outcome.ticket_blocked);
    }

    #[test]
    fn qa_retry_exhausted_blocks_ticket() {
        let outcome = qa_transition(false, 2, 2);
        assert_eq!(outcome.phase, Phase::NextTicket);
        assert!(outcome.ticket_blocked);
    }

    #[test]
    fn spindle_abort_under_cap_blocks_and_continues() {
        assert_eq!(spindle_abort_transition(0, 2), Phase::NextTicket);
    }

    #[test]
    fn spindle_abort_past_cap_fails_session() {
        assert_eq!(spindle_abort_transition(2, 2), Phase::FailedSpindle);
    }
}
