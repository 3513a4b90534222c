//! The session-level phase state machine (§4.11, component K): drives
//! `Scout → Plan → Execute → Qa → Pr → NextTicket` (plus `ParallelExecute`
//! and the terminal phases), one `advance()`-style call at a time.
//!
//! Unlike `ratchet-tickets::run_ticket` or the proposal pipeline, this
//! crate never invokes an agent or a worktree itself — it depends only on
//! `ratchet-types` and `ratchet-persistence`. Callers (the CLI driver) do
//! the real work between calls and report the outcome back through one of
//! the `on_*` methods below, which apply the matching pure transition from
//! [`transitions`], write the bracketing events, bump budget counters, and
//! snapshot `SessionState` to disk. This mirrors `codex-pm-service::manager`'s
//! split between a pure decision table and the I/O that surrounds it.

pub mod budgets;
pub mod transitions;

use ratchet_persistence::RunDir;
use ratchet_types::{
    BudgetCounters, Event, EventType, Phase, SessionState, Ticket, TicketCategory,
};
use uuid::Uuid;

pub use budgets::{apply_counters, first_exhausted, BudgetKind, BudgetUpdate, SessionBudgets};
pub use transitions::{
    execute_transition, next_ticket_transition, plan_transition, pr_transition, qa_transition,
    scout_transition, spindle_abort_transition, PlanOutcome, QaOutcome, ReadyTicket, ScoutOutcome,
};

/// Wraps the pure transition table with event emission, budget bookkeeping,
/// and state persistence. One instance lives for the duration of one
/// session (one `auto run` invocation); the CLI driver owns it and calls
/// the `on_*` method matching whatever phase just finished.
pub struct PhaseMachine {
    state: SessionState,
    run_dir: RunDir,
    budgets: SessionBudgets,
}

/// What the driver should do next, returned by every `on_*` method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// Continue the loop; `state().phase` names the next step.
    Continue,
    /// The session has reached a terminal phase; stop the loop.
    Stop,
}

impl PhaseMachine {
    /// Starts a brand-new session. For resuming a crashed session, use
    /// [`PhaseMachine::resume`] instead.
    pub fn start(run_id: Uuid, run_dir: RunDir, budgets: SessionBudgets) -> Result<Self, ratchet_persistence::PersistenceError> {
        let state = SessionState::new(run_id);
        let mut machine = Self { state, run_dir, budgets };
        machine.emit(EventType::SessionStarted, serde_json::json!({}))?;
        machine.snapshot()?;
        Ok(machine)
    }

    /// Rebuilds a session from its last snapshot, falling back to replaying
    /// `events.ndjson` to fixed-point if the snapshot is absent or corrupt
    /// (§4.12's crash-recovery guarantee). Replay only recovers `step` and
    /// `phase`; a caller that needs budget counters reconstructed exactly
    /// should prefer snapshots taken every transition, which is the normal
    /// path — replay is the degraded fallback, not the common case.
    pub fn resume(run_id: Uuid, run_dir: RunDir, budgets: SessionBudgets) -> Result<Self, ratchet_persistence::PersistenceError> {
        let state = match run_dir.load_state() {
            Some(state) => state,
            None => Self::rebuild_from_events(run_id, &run_dir)?,
        };
        Ok(Self { state, run_dir, budgets })
    }

    fn rebuild_from_events(run_id: Uuid, run_dir: &RunDir) -> Result<SessionState, ratchet_persistence::PersistenceError> {
        let mut state = SessionState::new(run_id);
        for event in run_dir.replay_events()? {
            state.step = state.step.max(event.step + 1);
            if event.event_type == EventType::PhaseTransitioned {
                if let Some(phase) = event
                    .payload
                    .get("to")
                    .and_then(|v| v.as_str())
                    .and_then(parse_phase)
                {
                    state.phase = phase;
                }
            }
        }
        Ok(state)
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Checks every budget in §4.11's fixed order. On exhaustion the
    /// session moves to `FailedBudget` and the caller must stop. Call this
    /// before issuing the next prompt, exactly as §4.11 requires.
    pub fn check_budgets(
        &mut self,
        tool_calls_this_ticket: u32,
        elapsed: std::time::Duration,
    ) -> Result<Directive, ratchet_persistence::PersistenceError> {
        if let Some(kind) = first_exhausted(&self.state, &self.budgets, tool_calls_this_ticket, elapsed) {
            self.emit(EventType::BudgetExhausted, serde_json::json!({"kind": format!("{kind:?}")}))?;
            self.transition_to(Phase::FailedBudget)?;
            return Ok(Directive::Stop);
        }
        Ok(Directive::Continue)
    }

    /// Brackets one `advance()` call with `ADVANCE_CALLED`/`ADVANCE_RETURNED`,
    /// capturing the digest §4.11 requires (step, budgets remaining, spindle
    /// risk level, time remaining). The closure does the real phase work and
    /// returns the `Directive` its own `on_*` call produced.
    pub fn advance<F>(&mut self, spindle_risk: &str, time_remaining: std::time::Duration, f: F) -> Result<Directive, ratchet_persistence::PersistenceError>
    where
        F: FnOnce(&mut Self) -> Result<Directive, ratchet_persistence::PersistenceError>,
    {
        self.emit(
            EventType::AdvanceCalled,
            serde_json::json!({
                "phase": format!("{:?}", self.state.phase),
                "step": self.state.step,
            }),
        )?;
        let directive = f(self)?;
        self.state.step += 1;
        self.emit(
            EventType::AdvanceReturned,
            serde_json::json!({
                "phase": format!("{:?}", self.state.phase),
                "step": self.state.step,
                "spindle_risk": spindle_risk,
                "time_remaining_ms": time_remaining.as_millis() as u64,
            }),
        )?;
        self.snapshot()?;
        Ok(directive)
    }

    /// `Scout → NextTicket | Scout | Done`.
    pub fn on_scout_result(
        &mut self,
        accepted_ticket_count: u32,
        has_next_sector: bool,
        continuous_mode: bool,
    ) -> Result<Directive, ratchet_persistence::PersistenceError> {
        let (phase, outcome) = scout_transition(
            accepted_ticket_count,
            self.state.scout_retry_count,
            self.budgets_scout_cap(),
            has_next_sector,
            continuous_mode,
        );
        match outcome {
            ScoutOutcome::Accepted => self.state.scout_retry_count = 0,
            ScoutOutcome::RetrySameSector => self.state.scout_retry_count += 1,
            ScoutOutcome::AdvanceSector => self.state.scout_retry_count = 0,
            ScoutOutcome::Exhausted => {}
        }
        apply_counters(&mut self.state.budgets, BudgetUpdate { scout_cycle: true, ..Default::default() });
        self.transition_to(phase)?;
        Ok(self.directive_for(phase))
    }

    fn budgets_scout_cap(&self) -> u32 {
        2
    }

    /// `NextTicket → Plan | Execute | ParallelExecute | Scout | Done`.
    pub fn on_next_ticket(
        &mut self,
        ready: Option<TicketCategory>,
        parallel_width: u32,
        non_conflicting_available: bool,
        pr_budget_exhausted: bool,
        max_cycles_reached: bool,
        ticket_id: Option<Uuid>,
    ) -> Result<Directive, ratchet_persistence::PersistenceError> {
        let ready = ready.map(|category| ReadyTicket { category });
        let phase = next_ticket_transition(ready, parallel_width, non_conflicting_available, pr_budget_exhausted, max_cycles_reached);
        self.state.current_ticket_id = ticket_id;
        self.state.ticket_step = 0;
        self.state.qa_retry_count = 0;
        self.state.plan_approved = false;
        self.state.plan_rejection_count = 0;
        self.transition_to(phase)?;
        Ok(self.directive_for(phase))
    }

    /// `Plan → Execute | Plan`, blocking the ticket on the caller's behalf
    /// once rejections exceed the cap.
    pub fn on_plan_result(&mut self, approved: bool, max_rejections: u32) -> Result<PlanOutcome, ratchet_persistence::PersistenceError> {
        if !approved {
            self.state.plan_rejection_count += 1;
        }
        let outcome = plan_transition(approved, self.state.plan_rejection_count, max_rejections);
        self.state.plan_approved = approved && outcome.phase == Phase::Execute;
        if outcome.phase == Phase::Execute || outcome.ticket_blocked {
            self.state.plan_rejection_count = 0;
        }
        if outcome.ticket_blocked {
            apply_counters(&mut self.state.budgets, BudgetUpdate { ticket_blocked: true, ..Default::default() });
            self.emit(EventType::TicketBlocked, serde_json::json!({"reason": "validation_failed"}))?;
        }
        self.transition_to(outcome.phase)?;
        Ok(outcome)
    }

    /// `Execute → Qa | Execute | NextTicket`.
    pub fn on_execute_result(
        &mut self,
        ticket_result_done: bool,
        changed_within_plan: bool,
        lines_within_budget: bool,
        lines_changed: u64,
    ) -> Result<Directive, ratchet_persistence::PersistenceError> {
        let phase = execute_transition(ticket_result_done, changed_within_plan, lines_within_budget);
        apply_counters(&mut self.state.budgets, BudgetUpdate { lines_changed, ..Default::default() });
        if !ticket_result_done {
            apply_counters(&mut self.state.budgets, BudgetUpdate { ticket_failed: true, ..Default::default() });
        }
        self.transition_to(phase)?;
        Ok(self.directive_for(phase))
    }

    /// `Qa → Pr | Execute | NextTicket`.
    pub fn on_qa_result(&mut self, qa_passed: bool, qa_retry_cap: u32) -> Result<QaOutcome, ratchet_persistence::PersistenceError> {
        if !qa_passed {
            self.emit(EventType::QaFailed, serde_json::json!({}))?;
        } else {
            self.emit(EventType::QaPassed, serde_json::json!({}))?;
        }
        let outcome = qa_transition(qa_passed, self.state.qa_retry_count, qa_retry_cap);
        if outcome.phase == Phase::Execute {
            self.state.qa_retry_count += 1;
        }
        if outcome.ticket_blocked {
            apply_counters(&mut self.state.budgets, BudgetUpdate { ticket_blocked: true, ..Default::default() });
            self.emit(EventType::TicketBlocked, serde_json::json!({"reason": "qa_failed"}))?;
        }
        self.transition_to(outcome.phase)?;
        Ok(outcome)
    }

    /// `Pr → NextTicket`, unconditionally; records whether a URL was
    /// obtained without affecting the transition itself (§7 `pr_failed` is
    /// non-fatal).
    pub fn on_pr_result(&mut self, pr_created: bool) -> Result<Directive, ratchet_persistence::PersistenceError> {
        if pr_created {
            self.emit(EventType::PrCreated, serde_json::json!({}))?;
        } else {
            self.emit(EventType::PrFailed, serde_json::json!({}))?;
        }
        apply_counters(
            &mut self.state.budgets,
            BudgetUpdate { pr_created, ticket_completed: true, ..Default::default() },
        );
        let phase = pr_transition();
        self.transition_to(phase)?;
        Ok(self.directive_for(phase))
    }

    /// A spindle `should_abort` verdict fired mid-ticket, in any
    /// non-terminal phase. `should_block` verdicts go through
    /// [`PhaseMachine::on_spindle_block`] instead and never touch the
    /// recovery budget (open question in §9 — this spec resolves it by
    /// NOT charging `should_block` against recoveries, since it signals a
    /// different failure shape than a runaway loop).
    pub fn on_spindle_abort(&mut self, recovery_cap: u32, reason: &str) -> Result<Directive, ratchet_persistence::PersistenceError> {
        self.emit(EventType::SpindleAborted, serde_json::json!({"reason": reason}))?;
        let phase = spindle_abort_transition(self.state.budgets.spindle_recoveries_used, recovery_cap);
        if phase != Phase::FailedSpindle {
            self.state.budgets.spindle_recoveries_used += 1;
            apply_counters(&mut self.state.budgets, BudgetUpdate { ticket_blocked: true, ..Default::default() });
        }
        self.transition_to(phase)?;
        Ok(self.directive_for(phase))
    }

    /// A spindle `should_block` verdict: blocks the current ticket and
    /// always returns to `NextTicket` without touching the recovery
    /// budget.
    pub fn on_spindle_block(&mut self, reason: &str) -> Result<Directive, ratchet_persistence::PersistenceError> {
        self.emit(EventType::SpindleBlocked, serde_json::json!({"reason": reason}))?;
        apply_counters(&mut self.state.budgets, BudgetUpdate { ticket_blocked: true, ..Default::default() });
        self.transition_to(Phase::NextTicket)?;
        Ok(Directive::Continue)
    }

    fn directive_for(&self, phase: Phase) -> Directive {
        if phase.is_terminal() {
            Directive::Stop
        } else {
            Directive::Continue
        }
    }

    fn transition_to(&mut self, phase: Phase) -> Result<(), ratchet_persistence::PersistenceError> {
        let from = self.state.phase;
        self.state.phase = phase;
        self.emit(EventType::PhaseTransitioned, serde_json::json!({"from": format!("{from:?}"), "to": format!("{phase:?}")}))?;
        if phase.is_terminal() {
            self.emit(EventType::SessionEnded, serde_json::json!({"phase": format!("{phase:?}")}))?;
        }
        Ok(())
    }

    fn emit(&mut self, event_type: EventType, payload: serde_json::Value) -> Result<(), ratchet_persistence::PersistenceError> {
        let event = Event::new(self.state.run_id, self.state.step, event_type, payload);
        self.run_dir.append_event(&event)
    }

    fn snapshot(&self) -> Result<(), ratchet_persistence::PersistenceError> {
        self.run_dir.snapshot_state(&self.state)
    }
}

fn parse_phase(s: &str) -> Option<Phase> {
    Some(match s {
        "Scout" => Phase::Scout,
        "Plan" => Phase::Plan,
        "Execute" => Phase::Execute,
        "Qa" => Phase::Qa,
        "Pr" => Phase::Pr,
        "NextTicket" => Phase::NextTicket,
        "ParallelExecute" => Phase::ParallelExecute,
        "Done" => Phase::Done,
        "BlockedNeedsHuman" => Phase::BlockedNeedsHuman,
        "FailedBudget" => Phase::FailedBudget,
        "FailedValidation" => Phase::FailedValidation,
        "FailedSpindle" => Phase::FailedSpindle,
        _ => return None,
    })
}

/// Helper re-exported for the CLI driver's ticket-category lookup when
/// picking the next ready ticket (avoids importing `ratchet_types::Ticket`
/// just for this one field access).
pub fn ticket_category(ticket: &Ticket) -> TicketCategory {
    ticket.category
}

/// Snapshot of counters a report generator or CLI summary needs without
/// reaching into `SessionState` directly.
pub fn budget_summary(state: &SessionState) -> BudgetCounters {
    state.budgets.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PhaseMachine {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let run_dir = RunDir::new(dir.path(), run_id).unwrap();
        let machine = PhaseMachine::start(run_id, run_dir, SessionBudgets::default()).unwrap();
        std::mem::forget(dir); // keep tempdir alive for the test's duration
        machine
    }

    #[test]
    fn start_begins_in_scout_and_snapshots() {
        let m = machine();
        assert_eq!(m.state().phase, Phase::Scout);
        assert_eq!(m.state().step, 0);
    }

    #[test]
    fn scout_acceptance_moves_to_next_ticket() {
        let mut m = machine();
        let directive = m.on_scout_result(2, true, false).unwrap();
        assert_eq!(directive, Directive::Continue);
        assert_eq!(m.state().phase, Phase::NextTicket);
        assert_eq!(m.state().budgets.scout_cycles, 1);
    }

    #[test]
    fn scout_empty_then_exhausted_reaches_done() {
        let mut m = machine();
        m.on_scout_result(0, false, false).unwrap();
        assert_eq!(m.state().phase, Phase::Scout);
        let directive = m.on_scout_result(0, false, false).unwrap();
        assert_eq!(directive, Directive::Stop);
        assert_eq!(m.state().phase, Phase::Done);
    }

    #[test]
    fn next_ticket_docs_category_bypasses_plan() {
        let mut m = machine();
        let ticket_id = Uuid::new_v4();
        m.on_next_ticket(Some(TicketCategory::Docs), 1, false, false, false, Some(ticket_id)).unwrap();
        assert_eq!(m.state().phase, Phase::Execute);
        assert_eq!(m.state().current_ticket_id, Some(ticket_id));
    }

    #[test]
    fn plan_rejected_past_cap_blocks_and_returns_to_next_ticket() {
        let mut m = machine();
        m.state.phase = Phase::Plan;
        for _ in 0..2 {
            let outcome = m.on_plan_result(false, 3).unwrap();
            assert_eq!(outcome.phase, Phase::Plan);
        }
        let outcome = m.on_plan_result(false, 3).unwrap();
        assert_eq!(outcome.phase, Phase::NextTicket);
        assert!(outcome.ticket_blocked);
        assert_eq!(m.state().budgets.tickets_blocked, 1);
    }

    #[test]
    fn qa_retry_then_exhaustion_blocks_ticket() {
        let mut m = machine();
        let outcome = m.on_qa_result(false, 1).unwrap();
        assert_eq!(outcome.phase, Phase::Execute);
        assert_eq!(m.state().qa_retry_count, 1);
        let outcome = m.on_qa_result(false, 1).unwrap();
        assert_eq!(outcome.phase, Phase::NextTicket);
        assert!(outcome.ticket_blocked);
    }

    #[test]
    fn pr_result_bumps_completed_and_pr_counters() {
        let mut m = machine();
        m.on_pr_result(true).unwrap();
        assert_eq!(m.state().budgets.prs_created, 1);
        assert_eq!(m.state().budgets.tickets_completed, 1);
        assert_eq!(m.state().phase, Phase::NextTicket);
    }

    #[test]
    fn spindle_abort_under_cap_continues_session() {
        let mut m = machine();
        let directive = m.on_spindle_abort(2, "output_similarity").unwrap();
        assert_eq!(directive, Directive::Continue);
        assert_eq!(m.state().phase, Phase::NextTicket);
        assert_eq!(m.state().budgets.spindle_recoveries_used, 1);
    }

    #[test]
    fn spindle_abort_past_cap_fails_session() {
        let mut m = machine();
        m.on_spindle_abort(0, "stalled").unwrap();
        assert_eq!(m.state().phase, Phase::FailedSpindle);
    }

    #[test]
    fn spindle_block_never_touches_recovery_budget() {
        let mut m = machine();
        m.on_spindle_block("repeated_failing_command").unwrap();
        assert_eq!(m.state().budgets.spindle_recoveries_used, 0);
        assert_eq!(m.state().phase, Phase::NextTicket);
    }

    #[test]
    fn check_budgets_trips_session_step_cap() {
        let mut m = machine();
        m.state.step = 500;
        let directive = m.check_budgets(0, std::time::Duration::ZERO).unwrap();
        assert_eq!(directive, Directive::Stop);
        assert_eq!(m.state().phase, Phase::FailedBudget);
    }

    #[test]
    fn resume_rebuilds_phase_from_replayed_events_when_snapshot_missing() {
        let dir = tempfile::tempdir().unwrap();
        let run_id = Uuid::new_v4();
        {
            let run_dir = RunDir::new(dir.path(), run_id).unwrap();
            let mut m = PhaseMachine::start(run_id, run_dir, SessionBudgets::default()).unwrap();
            m.on_scout_result(1, true, false).unwrap();
            // Corrupt the snapshot to force event replay.
            std::fs::write(dir.path().join("runs").join(run_id.to_string()).join("state.json"), b"not json").unwrap();
        }
        let run_dir = RunDir::new(dir.path(), run_id).unwrap();
        let resumed = PhaseMachine::resume(run_id, run_dir, SessionBudgets::default()).unwrap();
        assert_eq!(resumed.state().phase, Phase::NextTicket);
    }
}
