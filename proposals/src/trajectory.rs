//! Thin behavior layer over `ratchet_types::Trajectory`'s DAG traversal:
//! scope-narrowing to the active step, injecting its description as the
//! cycle's strategic focus, and the skip/reset operations the scout loop
//! needs but the bare data type doesn't own.

use ratchet_types::{Trajectory, TrajectoryStepStatus};

/// What the scout should narrow its attention to this cycle, derived from
/// a trajectory's next runnable step (if any is active).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrajectoryFocus {
    pub scope_glob: String,
    pub strategic_focus: String,
    pub step_ordinal: u32,
}

/// Activate the next runnable step (if the trajectory isn't already
/// mid-step) and narrow scope to it. Returns `None` if the trajectory is
/// complete or every pending step is still blocked on a dependency.
pub fn narrow_to_active_step(trajectory: &mut Trajectory) -> Option<TrajectoryFocus> {
    if let Some(active_ordinal) = trajectory.active_step {
        let step = trajectory.steps.iter().find(|s| s.ordinal == active_ordinal)?;
        return Some(TrajectoryFocus {
            scope_glob: format!("**/{}/**", step.proposal_title.to_lowercase().replace(' ', "_")),
            strategic_focus: step.proposal_title.clone(),
            step_ordinal: step.ordinal,
        });
    }

    let next = trajectory.next_runnable_step()?.clone();
    trajectory.active_step = Some(next.ordinal);
    if let Some(step) = trajectory.steps.iter_mut().find(|s| s.ordinal == next.ordinal) {
        step.status = TrajectoryStepStatus::Active;
    }
    Some(TrajectoryFocus {
        scope_glob: format!("**/{}/**", next.proposal_title.to_lowercase().replace(' ', "_")),
        strategic_focus: next.proposal_title,
        step_ordinal: next.ordinal,
    })
}

/// Mark the active step skipped and clear it, so the next call to
/// [`narrow_to_active_step`] picks up the following runnable step.
pub fn skip_active_step(trajectory: &mut Trajectory) {
    if let Some(ordinal) = trajectory.active_step.take() {
        if let Some(step) = trajectory.steps.iter_mut().find(|s| s.ordinal == ordinal) {
            step.status = TrajectoryStepStatus::Skipped;
        }
    }
}

/// Mark the active step completed (its owning ticket finished
/// successfully) and clear it.
pub fn complete_active_step(trajectory: &mut Trajectory) {
    if let Some(ordinal) = trajectory.active_step.take() {
        if let Some(step) = trajectory.steps.iter_mut().find(|s| s.ordinal == ordinal) {
            step.status = TrajectoryStepStatus::Completed;
        }
    }
}

/// Clear all trajectory progress: every step reverts to `Pending` and no
/// step is active. Used when a trajectory needs to be re-run from
/// scratch rather than abandoned.
pub fn reset(trajectory: &mut Trajectory) {
    trajectory.active_step = None;
    for step in &mut trajectory.steps {
        step.status = TrajectoryStepStatus::Pending;
        step.ticket_id = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ratchet_types::TrajectoryStep;
    use uuid::Uuid;

    fn trajectory_with_steps() -> Trajectory {
        let mut t = Trajectory::new(Uuid::new_v4(), "migrate to async");
        t.steps = vec![
            TrajectoryStep {
                ordinal: 1,
                ticket_id: None,
                proposal_title: "extract interface".to_string(),
                status: TrajectoryStepStatus::Pending,
                depends_on: vec![],
            },
            TrajectoryStep {
                ordinal: 2,
                ticket_id: None,
                proposal_title: "migrate callers".to_string(),
                status: TrajectoryStepStatus::Pending,
                depends_on: vec![1],
            },
        ];
        t
    }

    #[test]
    fn narrows_to_first_runnable_step() {
        let mut t = trajectory_with_steps();
        let focus = narrow_to_active_step(&mut t).unwrap();
        assert_eq!(focus.step_ordinal, 1);
        assert_eq!(t.active_step, Some(1));
    }

    #[test]
    fn skip_advances_to_next_step() {
        let mut t = trajectory_with_steps();
        narrow_to_active_step(&mut t);
        skip_active_step(&mut t);
        assert!(t.active_step.is_none());
        assert_eq!(t.steps[0].status, TrajectoryStepStatus::Skipped);

        // step 2 still depends on step 1, which is Skipped not Completed,
        // so nothing is runnable yet.
        assert!(narrow_to_active_step(&mut t).is_none());
    }

    #[test]
    fn complete_unblocks_dependent_step() {
        let mut t = trajectory_with_steps();
        narrow_to_active_step(&mut t);
        complete_active_step(&mut t);
        let focus = narrow_to_active_step(&mut t).unwrap();
        assert_eq!(focus.step_ordinal, 2);
    }

    #[test]
    fn reset_clears_all_progress() {
        let mut t = trajectory_with_steps();
        narrow_to_active_step(&mut t);
        complete_active_step(&mut t);
        reset(&mut t);
        assert!(t.active_step.is_none());
        assert!(t.steps.iter().all(|s| s.status == TrajectoryStepStatus::Pending));
    }
}
