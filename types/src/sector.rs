use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Moderate,
    Hard,
}

/// Per-category boost/suppress affinity tracked for a sector, keyed by
/// `TicketCategory` serialized name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CategoryAffinity {
    pub boosted: Vec<String>,
    pub suppressed: Vec<String>,
}

/// A directory in the repo the scout rotates through, so successive scout
/// runs don't keep re-mining the same hot paths. Persisted as versioned
/// JSON; rebuilt from a fresh codebase index if the on-disk version
/// mismatches or the file is corrupt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sector {
    pub path: String,
    pub inferred_purpose: String,
    pub is_production: bool,
    pub file_count: u32,
    pub confidence: Classification,
    pub last_scanned_at: Option<DateTime<Utc>>,
    pub last_scanned_cycle: u64,
    pub scan_count: u32,
    pub proposal_yield: f64,
    pub success_count: u32,
    pub failure_count: u32,
    pub affinity: CategoryAffinity,
}

impl Sector {
    pub fn new(path: impl Into<String>, inferred_purpose: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inferred_purpose: inferred_purpose.into(),
            is_production: false,
            file_count: 0,
            confidence: Classification::Medium,
            last_scanned_at: None,
            last_scanned_cycle: 0,
            scan_count: 0,
            proposal_yield: 0.0,
            success_count: 0,
            failure_count: 0,
            affinity: CategoryAffinity::default(),
        }
    }

    /// Success ratio over everything recorded so far, used to classify
    /// `Difficulty`. `0.5` (neutral) when nothing has run yet.
    pub fn success_ratio(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            0.5
        } else {
            self.success_count as f64 / total as f64
        }
    }

    pub fn difficulty(&self) -> Difficulty {
        let ratio = self.success_ratio();
        if ratio >= 0.66 {
            Difficulty::Easy
        } else if ratio >= 0.33 {
            Difficulty::Moderate
        } else {
            Difficulty::Hard
        }
    }

    /// Estimated yield scaled down for harder sectors, used by
    /// `get_next_scope` to rank candidates.
    pub fn estimated_yield(&self) -> f64 {
        let difficulty_factor = match self.difficulty() {
            Difficulty::Easy => 1.0,
            Difficulty::Moderate => 0.7,
            Difficulty::Hard => 0.4,
        };
        self.proposal_yield * difficulty_factor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_ratio_is_neutral_before_any_runs() {
        let s = Sector::new("src/api", "api");
        assert_eq!(s.success_ratio(), 0.5);
        assert_eq!(s.difficulty(), Difficulty::Moderate);
    }

    #[test]
    fn mostly_failing_sector_is_hard() {
        let mut s = Sector::new("src/legacy", "unknown");
        s.success_count = 1;
        s.failure_count = 9;
        assert_eq!(s.difficulty(), Difficulty::Hard);
    }

    #[test]
    fn estimated_yield_scales_down_with_difficulty() {
        let mut easy = Sector::new("src/utils", "utils");
        easy.success_count = 8;
        easy.proposal_yield = 2.0;

        let mut hard = easy.clone();
        hard.success_count = 1;
        hard.failure_count = 9;

        assert!(easy.estimated_yield() > hard.estimated_yield());
    }
}
