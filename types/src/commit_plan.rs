use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannedFile {
    pub path: String,
    pub action: FileAction,
    pub reason: String,
}

/// Pre-execute summary for a ticket. A ticket enters execution only with
/// an approved plan, unless its category bypasses planning
/// (`TicketCategory::requires_plan() == false`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommitPlan {
    pub ticket_id: Uuid,
    pub files_to_touch: Vec<PlannedFile>,
    pub expected_tests: Vec<String>,
    pub risk_level: String,
    pub estimated_lines: u32,
}

impl CommitPlan {
    /// Files the plan intends to touch, as a plain path list — used by the
    /// phase machine's scope/budget validation when moving from planning
    /// into execution.
    pub fn touched_paths(&self) -> Vec<&str> {
        self.files_to_touch.iter().map(|f| f.path.as_str()).collect()
    }
}
