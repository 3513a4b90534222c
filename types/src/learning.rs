use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LearningCategory {
    Gotcha,
    Pattern,
    Warning,
    Context,
    Compaction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    QaFailure,
    TicketFailure,
    TicketSuccess,
    ReviewDowngrade,
    PlanRejection,
    ScopeViolation,
    ReviewerFeedback,
    CrossSectorPattern,
    ProcessInsight,
    Manual,
}

/// Structured detail about a command failure, attached to a learning when
/// the source was a QA or ticket failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FailureContext {
    pub command: Option<String>,
    pub error_signature: Option<String>,
    pub fix_applied: Option<String>,
}

/// The optional structured knowledge block a learning may carry, used by
/// `ratchet_memory::learnings::select_relevant` and
/// `assess_adaptive_risk` for scoring beyond plain tag overlap.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StructuredKnowledge {
    pub cochange_files: Vec<String>,
    pub fragile_paths: Vec<String>,
    pub root_cause: Option<String>,
    pub pattern_type: Option<String>,
    pub applies_to: Option<String>,
    pub failure_context: Option<FailureContext>,
}

/// A durable, decaying piece of knowledge produced by session outcomes and
/// fed back into future prompts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Learning {
    pub id: Uuid,
    pub text: String,
    pub category: LearningCategory,
    pub source: SourceTag,
    pub tags: Vec<String>,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_confirmed_at: DateTime<Utc>,
    pub access_count: u32,
    pub applied_count: u32,
    pub success_count: u32,
    pub knowledge: Option<StructuredKnowledge>,
}

impl Learning {
    pub fn new(text: impl Into<String>, category: LearningCategory, source: SourceTag) -> Self {
        let now = Utc::now();
        let text = text.into();
        debug_assert!(text.chars().count() <= 200, "learning text exceeds 200 chars");
        Self {
            id: Uuid::new_v4(),
            text,
            category,
            source,
            tags: Vec::new(),
            weight: 60.0,
            created_at: now,
            last_confirmed_at: now,
            access_count: 0,
            applied_count: 0,
            success_count: 0,
            knowledge: None,
        }
    }

    pub fn has_tag_prefix(&self, prefix: &str) -> bool {
        self.tags.iter().any(|t| t.starts_with(prefix))
    }
}
