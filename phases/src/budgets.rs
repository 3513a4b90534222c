//! Session-level budgets checked before every prompt the phase machine
//! would otherwise issue, grounded on `codex-pm-service::manager`'s
//! step/line counters generalized to the six caps §4.11 names.

use std::time::Duration;

use ratchet_types::{BudgetCounters, SessionState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetKind {
    SessionSteps,
    TicketSteps,
    LinesChanged,
    ToolCalls,
    Prs,
    ScoutCycles,
    WallClock,
}

#[derive(Debug, Clone)]
pub struct SessionBudgets {
    pub max_session_steps: u64,
    pub max_ticket_steps: u64,
    pub max_lines_changed: u64,
    pub max_tool_calls_per_ticket: u32,
    pub max_prs: u32,
    pub max_scout_cycles: u32,
    pub wall_clock: Duration,
}

impl Default for SessionBudgets {
    fn default() -> Self {
        Self {
            max_session_steps: 500,
            max_ticket_steps: 60,
            max_lines_changed: 5_000,
            max_tool_calls_per_ticket: 80,
            max_prs: 20,
            max_scout_cycles: 30,
            wall_clock: Duration::from_secs(4 * 60 * 60),
        }
    }
}

/// Check every budget in a fixed order and return the first one exhausted,
/// if any. `tool_calls_this_ticket` and `elapsed` are supplied by the
/// caller since neither is tracked in [`SessionState`] itself.
pub fn first_exhausted(
    state: &SessionState,
    budgets: &SessionBudgets,
    tool_calls_this_ticket: u32,
    elapsed: Duration,
) -> Option<BudgetKind> {
    if state.step >= budgets.max_session_steps {
        return Some(BudgetKind::SessionSteps);
    }
    if state.ticket_step >= budgets.max_ticket_steps {
        return Some(BudgetKind::TicketSteps);
    }
    if state.budgets.lines_changed >= budgets.max_lines_changed {
        return Some(BudgetKind::LinesChanged);
    }
    if tool_calls_this_ticket >= budgets.max_tool_calls_per_ticket {
        return Some(BudgetKind::ToolCalls);
    }
    if state.budgets.prs_created >= budgets.max_prs {
        return Some(BudgetKind::Prs);
    }
    if state.budgets.scout_cycles >= budgets.max_scout_cycles {
        return Some(BudgetKind::ScoutCycles);
    }
    if elapsed >= budgets.wall_clock {
        return Some(BudgetKind::WallClock);
    }
    None
}

pub fn apply_counters(state: &mut BudgetCounters, fields: BudgetUpdate) {
    if fields.ticket_completed {
        state.tickets_completed += 1;
    }
    if fields.ticket_failed {
        state.tickets_failed += 1;
    }
    if fields.ticket_blocked {
        state.tickets_blocked += 1;
    }
    if fields.pr_created {
        state.prs_created += 1;
    }
    if fields.scout_cycle {
        state.scout_cycles += 1;
    }
    state.lines_changed += fields.lines_changed;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BudgetUpdate {
    pub ticket_completed: bool,
    pub ticket_failed: bool,
    pub ticket_blocked: bool,
    pub pr_created: bool,
    pub scout_cycle: bool,
    pub lines_changed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn session_step_budget_trips_first() {
        let mut state = SessionState::new(Uuid::new_v4());
        state.step = 500;
        let budgets = SessionBudgets::default();
        assert_eq!(first_exhausted(&state, &budgets, 0, Duration::ZERO), Some(BudgetKind::SessionSteps));
    }

    #[test]
    fn under_every_cap_is_none() {
        let state = SessionState::new(Uuid::new_v4());
        let budgets = SessionBudgets::default();
        assert!(first_exhausted(&state, &budgets, 0, Duration::ZERO).is_none());
    }

    #[test]
    fn wall_clock_budget_trips_on_elapsed() {
        let state = SessionState::new(Uuid::new_v4());
        let budgets = SessionBudgets { wall_clock: Duration::from_secs(10), ..SessionBudgets::default() };
        assert_eq!(first_exhausted(&state, &budgets, 0, Duration::from_secs(11)), Some(BudgetKind::WallClock));
    }

    #[test]
    fn apply_counters_increments_requested_fields_only() {
        let mut counters = BudgetCounters::default();
        apply_counters(&mut counters, BudgetUpdate { ticket_completed: true, lines_changed: 42, ..Default::default() });
        assert_eq!(counters.tickets_completed, 1);
        assert_eq!(counters.tickets_failed, 0);
        assert_eq!(counters.lines_changed, 42);
    }
}
