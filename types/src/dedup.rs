use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One normalized-title entry in the scout's "don't propose this again"
/// memory. Weight decays on session load and is bumped whenever the same
/// (or a near-duplicate) title is seen again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DedupEntry {
    pub title: String,
    pub weight: f64,
    pub created_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub hit_count: u32,
    pub completed: bool,
    pub failure_reason: Option<String>,
    pub related_titles: Vec<String>,
}

impl DedupEntry {
    pub fn new(title: impl Into<String>, completed: bool) -> Self {
        let now = Utc::now();
        Self {
            title: title.into(),
            weight: if completed { 80.0 } else { 60.0 },
            created_at: now,
            last_seen_at: now,
            hit_count: 0,
            completed,
            failure_reason: None,
            related_titles: Vec::new(),
        }
    }
}
