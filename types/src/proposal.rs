use serde::{Deserialize, Serialize};

use crate::ticket::TicketCategory;

pub use TicketCategory as ProposalCategory;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Trivial,
    Simple,
    Moderate,
    Complex,
}

/// A transient candidate produced by scout, before the proposal pipeline
/// turns it into a `Ticket`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Proposal {
    pub category: ProposalCategory,
    pub title: String,
    pub description: String,
    pub acceptance_criteria: Vec<String>,
    pub verification_commands: Vec<String>,
    pub files: Vec<String>,
    pub allowed_paths: Vec<String>,
    pub confidence: u8,
    pub impact_score: u8,
    pub rationale: String,
    pub complexity: Complexity,
    pub risk: String,
    pub touched_files_estimate: u32,
    pub rollback_note: String,
}

/// Top-level JSON shape required from the scout agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposalBatch {
    pub proposals: Vec<Proposal>,
}
