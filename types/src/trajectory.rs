use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TrajectoryStepStatus {
    Pending,
    Active,
    Completed,
    Failed,
    Skipped,
}

/// One planned ticket within a trajectory, in the order the planner
/// intends to execute it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryStep {
    pub ordinal: u32,
    pub ticket_id: Option<Uuid>,
    pub proposal_title: String,
    pub status: TrajectoryStepStatus,
    pub depends_on: Vec<u32>,
}

/// A multi-ticket plan toward a stated goal, produced when the proposal
/// pipeline is asked to chain several related tickets together instead of
/// picking one at a time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trajectory {
    pub id: Uuid,
    pub project_id: Uuid,
    pub goal: String,
    pub steps: Vec<TrajectoryStep>,
    pub created_at: DateTime<Utc>,
    pub active_step: Option<u32>,
}

impl Trajectory {
    pub fn new(project_id: Uuid, goal: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            project_id,
            goal: goal.into(),
            steps: Vec::new(),
            created_at: Utc::now(),
            active_step: None,
        }
    }

    /// The next step whose dependencies are all completed and which is
    /// still pending, in ordinal order.
    pub fn next_runnable_step(&self) -> Option<&TrajectoryStep> {
        self.steps
            .iter()
            .filter(|s| s.status == TrajectoryStepStatus::Pending)
            .find(|s| {
                s.depends_on.iter().all(|dep| {
                    self.steps
                        .iter()
                        .find(|other| other.ordinal == *dep)
                        .map(|other| other.status == TrajectoryStepStatus::Completed)
                        .unwrap_or(false)
                })
            })
    }

    pub fn is_complete(&self) -> bool {
        self.steps.iter().all(|s| {
            matches!(
                s.status,
                TrajectoryStepStatus::Completed | TrajectoryStepStatus::Skipped
            )
        })
    }
}
