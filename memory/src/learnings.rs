//! Pure scoring, decay, and consolidation over [`Learning`] lists,
//! grounded on a librarian-style consolidation/classifier/causal-linking
//! design: merges near-duplicate learnings, scores relevance against a
//! ticket's touched paths/commands, and rolls failure-sourced learnings
//! into an adaptive risk read before a ticket starts.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use ratchet_types::{Learning, LearningCategory, SourceTag};

use crate::dedup::bigram_similarity;

const DEFAULT_DECAY_RATE: f64 = 3.0;
const CONFIRMATION_WINDOW_DAYS: i64 = 7;
const CONSOLIDATION_SIMILARITY_THRESHOLD: f64 = 0.7;
const RECENCY_BONUS_DAYS: i64 = 3;

/// Decay every learning's weight in place, halved for accessed learnings
/// and halved again if confirmed within the last week; drops entries at
/// or below zero weight.
pub fn apply_decay(learnings: &mut Vec<Learning>, rate: f64, now: DateTime<Utc>) {
    learnings.retain_mut(|l| {
        let mut decay = rate;
        if l.access_count > 0 {
            decay /= 2.0;
        }
        if now - l.last_confirmed_at < chrono::Duration::days(CONFIRMATION_WINDOW_DAYS) {
            decay /= 2.0;
        }
        l.weight = (l.weight - decay).min(100.0);
        l.weight > 0.0
    });
}

pub fn apply_default_decay(learnings: &mut Vec<Learning>, now: DateTime<Utc>) {
    apply_decay(learnings, DEFAULT_DECAY_RATE, now);
}

fn same_failure_type(a: &Learning, b: &Learning) -> bool {
    let a_tag = a.tags.iter().find(|t| t.starts_with("failureType:"));
    let b_tag = b.tags.iter().find(|t| t.starts_with("failureType:"));
    match (a_tag, b_tag) {
        (Some(x), Some(y)) => x == y,
        (None, None) => true,
        _ => false,
    }
}

/// Merge near-duplicate learnings when the list has grown past
/// `threshold`: pairs of entries with high text similarity, the same
/// category/source and compatible `failureType` tags merge (later into
/// earlier), unless either side has already been accessed 3+ times, or
/// doing so would shrink the list below 40% of `threshold` — in which
/// case consolidation aborts and returns the input unchanged.
pub fn consolidate(learnings: Vec<Learning>, threshold: usize) -> Vec<Learning> {
    if learnings.len() <= threshold {
        return learnings;
    }

    let min_surviving = (threshold as f64 * 0.4).ceil() as usize;

    let mut merged: Vec<Learning> = Vec::with_capacity(learnings.len());
    'outer: for candidate in learnings.clone() {
        for existing in merged.iter_mut() {
            if existing.category != candidate.category || existing.source != candidate.source {
                continue;
            }
            if existing.access_count >= 3 || candidate.access_count >= 3 {
                continue;
            }
            if !same_failure_type(existing, &candidate) {
                continue;
            }
            if bigram_similarity(&existing.text, &candidate.text) >= CONSOLIDATION_SIMILARITY_THRESHOLD {
                merge_into(existing, candidate);
                continue 'outer;
            }
        }
        merged.push(candidate);
    }

    if merged.len() < min_surviving {
        return learnings;
    }
    merged
}

fn merge_into(winner: &mut Learning, loser: Learning) {
    if loser.weight > winner.weight {
        winner.text = loser.text;
    }
    winner.access_count += loser.access_count;

    let mut tags: HashSet<String> = winner.tags.drain(..).collect();
    tags.extend(loser.tags);
    winner.tags = tags.into_iter().collect();

    if let Some(loser_knowledge) = loser.knowledge {
        let winner_knowledge = winner.knowledge.get_or_insert_with(Default::default);
        let mut cochange: HashSet<String> = winner_knowledge.cochange_files.drain(..).collect();
        cochange.extend(loser_knowledge.cochange_files);
        winner_knowledge.cochange_files = cochange.into_iter().collect();

        let mut fragile: HashSet<String> = winner_knowledge.fragile_paths.drain(..).collect();
        fragile.extend(loser_knowledge.fragile_paths);
        winner_knowledge.fragile_paths = fragile.into_iter().collect();
    }

    if loser.last_confirmed_at > winner.last_confirmed_at {
        winner.last_confirmed_at = loser.last_confirmed_at;
    }
}

/// A ticket's touched paths/commands/title, used to score which
/// learnings are worth surfacing.
#[derive(Debug, Clone, Default)]
pub struct RelevanceContext<'a> {
    pub paths: &'a [String],
    pub commands: &'a [String],
    pub title_hint: Option<&'a str>,
}

fn is_path_relation(a: &str, b: &str) -> bool {
    a != b && (a.starts_with(b) || b.starts_with(a))
}

fn score_learning(learning: &Learning, ctx: &RelevanceContext, now: DateTime<Utc>) -> f64 {
    let mut score = learning.weight;

    for tag in &learning.tags {
        if let Some(path) = tag.strip_prefix("path:") {
            if ctx.paths.iter().any(|p| p == path) {
                score += 30.0;
            } else if ctx.paths.iter().any(|p| is_path_relation(p, path)) {
                score += 15.0;
            }
        } else if let Some(cmd) = tag.strip_prefix("cmd:") {
            if ctx.commands.iter().any(|c| c == cmd) {
                score += 10.0;
            }
        } else if tag.starts_with("failureType:") && !ctx.commands.is_empty() {
            score += 5.0;
        }
    }

    if let Some(knowledge) = &learning.knowledge {
        if knowledge.cochange_files.iter().any(|f| ctx.paths.contains(f)) {
            score += 20.0;
        }
        if knowledge.fragile_paths.iter().any(|f| ctx.paths.contains(f)) {
            score += 15.0;
        }
        if let Some(failure) = &knowledge.failure_context {
            if let Some(signature) = &failure.error_signature {
                if ctx.commands.iter().any(|c| c.contains(signature.as_str())) {
                    score += 12.0;
                }
            }
        }
        if matches!(knowledge.pattern_type.as_deref(), Some("antipattern") | Some("dependency")) {
            score += 5.0;
        }
    }

    if let Some(hint) = ctx.title_hint {
        let lower_text = learning.text.to_lowercase();
        for word in hint.split_whitespace().map(str::to_lowercase) {
            if !word.is_empty() && lower_text.contains(&word) {
                score += 3.0;
            }
        }
    }

    if learning.category == LearningCategory::Gotcha && !ctx.commands.is_empty() {
        score += 10.0;
    }

    if now - learning.last_confirmed_at < chrono::Duration::days(RECENCY_BONUS_DAYS) {
        score += 5.0;
    }

    score
}

/// The `k` most relevant learnings for `ctx`, highest score first.
pub fn select_relevant<'a>(learnings: &'a [Learning], ctx: &RelevanceContext, k: usize) -> Vec<&'a Learning> {
    let now = Utc::now();
    let mut scored: Vec<(&Learning, f64)> = learnings.iter().map(|l| (l, score_learning(l, ctx, now))).collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.into_iter().take(k).map(|(l, _)| l).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RiskLevel {
    Low,
    Normal,
    Elevated,
    High,
}

#[derive(Debug, Clone)]
pub struct RiskAssessment {
    pub level: Option<RiskLevelValue>,
    pub score: f64,
    pub fragile_paths: Vec<String>,
    pub known_issues: Vec<String>,
}

/// `RiskLevel` wrapped so `RiskAssessment` can derive `Default` without
/// picking an arbitrary default variant for the enum itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskLevelValue(pub RiskLevel);

impl Default for RiskAssessment {
    fn default() -> Self {
        Self {
            level: None,
            score: 0.0,
            fragile_paths: Vec::new(),
            known_issues: Vec::new(),
        }
    }
}

fn is_failure_sourced(source: SourceTag) -> bool {
    matches!(
        source,
        SourceTag::QaFailure | SourceTag::TicketFailure | SourceTag::ReviewDowngrade | SourceTag::ScopeViolation
    )
}

fn classify(score: f64) -> RiskLevel {
    if score < 10.0 {
        RiskLevel::Low
    } else if score < 30.0 {
        RiskLevel::Normal
    } else if score < 60.0 {
        RiskLevel::Elevated
    } else {
        RiskLevel::High
    }
}

/// Accumulates a risk score from failure-sourced learnings overlapping
/// `ticket_paths` (plus any compaction-category learning, regardless of
/// path, as a proxy for context-pressure risk), classifying the result
/// into one of four bands.
pub fn assess_adaptive_risk(learnings: &[Learning], ticket_paths: &[String]) -> RiskAssessment {
    let mut score = 0.0;
    let mut fragile_paths = HashSet::new();
    let mut known_issues = Vec::new();

    for learning in learnings {
        let overlaps_paths = learning.tags.iter().any(|tag| {
            tag.strip_prefix("path:")
                .map(|p| ticket_paths.iter().any(|tp| tp == p))
                .unwrap_or(false)
        }) || learning
            .knowledge
            .as_ref()
            .map(|k| k.cochange_files.iter().any(|f| ticket_paths.contains(f)))
            .unwrap_or(false);

        let is_compaction_context = learning.category == LearningCategory::Compaction;

        if !(is_failure_sourced(learning.source) && overlaps_paths) && !is_compaction_context {
            continue;
        }

        score += learning.weight;
        if let Some(knowledge) = &learning.knowledge {
            for path in &knowledge.fragile_paths {
                fragile_paths.insert(path.clone());
            }
            if knowledge.cochange_files.iter().any(|f| ticket_paths.contains(f)) {
                score += 20.0;
            }
            if knowledge.fragile_paths.iter().any(|f| ticket_paths.contains(f)) {
                score += 15.0;
            }
        }

        if known_issues.len() < 5 {
            known_issues.push(learning.text.clone());
        }
    }

    RiskAssessment {
        level: Some(RiskLevelValue(classify(score))),
        score,
        fragile_paths: fragile_paths.into_iter().collect(),
        known_issues,
    }
}

/// Render the selected learnings as a bounded prompt block, each on its
/// own `- [CATEGORY] text (w:weight)` line, with an optional inline
/// annotation drawn from structured knowledge.
pub fn format_learnings_for_prompt(learnings: &[&Learning], budget: usize) -> String {
    let mut out = String::new();
    for learning in learnings {
        let mut line = format!(
            "- [{:?}] {} (w:{:.0})\n",
            learning.category, learning.text, learning.weight
        );
        if let Some(knowledge) = &learning.knowledge {
            if let Some(root_cause) = &knowledge.root_cause {
                line.push_str(&format!("  root cause: {root_cause}\n"));
            }
        }
        if out.len() + line.len() > budget {
            break;
        }
        out.push_str(&line);
    }
    out
}
