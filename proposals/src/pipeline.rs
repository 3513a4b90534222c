//! The eleven-stage proposal filter/rank pipeline, grounded on the
//! sequential filter-chain style of a codex-spec-kit-flavored review
//! queue, generalized here into ordered stage functions operating on
//! `Vec<Proposal>` so each stage's rejects are traceable independently
//! (a proposal rejected at stage S never reappears at stage S+1).

use std::collections::HashMap;

use chrono::Utc;
use ratchet_memory::dedup;
use ratchet_memory::sectors;
use ratchet_types::{CategoryAffinity, DedupEntry, Learning, LearningCategory, Proposal, ProposalCategory, SourceTag};
use wildmatch::WildMatch;

pub fn category_name(category: ProposalCategory) -> &'static str {
    match category {
        ProposalCategory::Refactor => "refactor",
        ProposalCategory::Docs => "docs",
        ProposalCategory::Test => "test",
        ProposalCategory::Perf => "perf",
        ProposalCategory::Security => "security",
        ProposalCategory::Fix => "fix",
        ProposalCategory::Cleanup => "cleanup",
        ProposalCategory::Types => "types",
    }
}

/// Selects the batch-size ceiling applied at stage 11.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Planning,
    Continuous,
    Milestone,
}

impl RunMode {
    pub fn default_batch(self) -> usize {
        match self {
            RunMode::Planning => 3,
            RunMode::Continuous => 5,
            RunMode::Milestone => 10,
        }
    }
}

/// Category allow/block list from the active scope formula. Block always
/// wins over allow; `test` proposals pass even when not explicitly
/// allow-listed, since test coverage is never actively harmful scope creep.
#[derive(Debug, Clone, Default)]
pub struct CategoryFilter {
    pub allow: Vec<String>,
    pub block: Vec<String>,
}

impl CategoryFilter {
    pub fn passes(&self, category: ProposalCategory) -> bool {
        let name = category_name(category);
        if self.block.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            return false;
        }
        if self.allow.is_empty() || name == "test" {
            return true;
        }
        self.allow.iter().any(|c| c.eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub min_impact_score: u8,
    pub max_test_ratio: f64,
    pub dedup_threshold: f64,
    pub scout_retry_cap: u32,
    pub run_mode: RunMode,
    pub remaining_pr_budget: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_impact_score: 3,
            max_test_ratio: 0.4,
            dedup_threshold: dedup::DEFAULT_THRESHOLD,
            scout_retry_cap: 2,
            run_mode: RunMode::Continuous,
            remaining_pr_budget: usize::MAX,
        }
    }
}

/// Everything the pipeline reads but does not own: cross-cycle memory,
/// scope, and the current sector's affinity, all supplied by the caller
/// so this crate stays free of any persistence or agent dependency.
#[derive(Debug, Clone, Default)]
pub struct PipelineContext {
    pub scope_globs: Vec<String>,
    pub existing_titles: Vec<String>,
    pub dedup_memory: Vec<DedupEntry>,
    pub sector_affinity: Option<CategoryAffinity>,
    pub file_cooldowns: HashMap<String, u32>,
    pub deferred_proposals: Vec<Proposal>,
}

#[derive(Debug, Clone)]
pub struct Rejection {
    pub proposal: Proposal,
    pub stage: &'static str,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct PipelineOutcome {
    pub accepted: Vec<Proposal>,
    /// Out-of-scope or overflow proposals carried forward to a later cycle.
    pub deferred: Vec<Proposal>,
    pub rejected: Vec<Rejection>,
    /// `(stage name, remaining count)` pairs in pipeline order, for the
    /// `found -> category -> scope -> dedup -> impact -> balance` counter
    /// line logged once per cycle.
    pub stage_counts: Vec<(&'static str, usize)>,
    /// Confidence-drop learnings produced by the adversarial review stage.
    pub review_learnings: Vec<Learning>,
}

fn file_in_scope(file: &str, globs: &[String]) -> bool {
    globs.is_empty() || globs.iter().any(|g| WildMatch::new(g).matches(file))
}

fn proposal_in_scope(proposal: &Proposal, globs: &[String]) -> bool {
    proposal.files.is_empty() || proposal.files.iter().all(|f| file_in_scope(f, globs))
}

/// Stage 1: apply an external reviewer's revised confidence per proposal
/// title. `skip_review` always bypasses this stage regardless of formula —
/// including `deep` — since a formula override here would silently
/// reintroduce unreviewed proposals into a higher-trust tier.
pub fn adversarial_review(
    mut proposals: Vec<Proposal>,
    reviewed_confidence: &HashMap<String, u8>,
    skip_review: bool,
) -> (Vec<Proposal>, Vec<Learning>) {
    if skip_review {
        return (proposals, Vec::new());
    }
    let mut learnings = Vec::new();
    for proposal in &mut proposals {
        let key = dedup::normalize_title(&proposal.title);
        if let Some(&revised) = reviewed_confidence.get(&key) {
            let original = proposal.confidence;
            if original.saturating_sub(revised) > 20 {
                learnings.push(Learning::new(
                    format!("adversarial review downgraded '{}' from {original} to {revised}", proposal.title),
                    LearningCategory::Warning,
                    SourceTag::ReviewDowngrade,
                ));
            }
            proposal.confidence = revised;
        }
    }
    (proposals, learnings)
}

/// Stage 2: re-inject previously deferred proposals whose files the
/// current scope now covers, prepending them so they compete for this
/// cycle's batch on equal footing with freshly scouted proposals.
pub fn reinject_deferred(mut proposals: Vec<Proposal>, deferred: &[Proposal], scope_globs: &[String]) -> Vec<Proposal> {
    let mut reinjected: Vec<Proposal> = deferred
        .iter()
        .filter(|p| proposal_in_scope(p, scope_globs))
        .cloned()
        .collect();
    reinjected.append(&mut proposals);
    reinjected
}

fn split<F: Fn(&Proposal) -> bool>(proposals: Vec<Proposal>, keep: F) -> (Vec<Proposal>, Vec<Proposal>) {
    proposals.into_iter().partition(|p| keep(p))
}

/// Runs stages 3 through 11 in order, returning the full accounting the
/// caller needs to persist (accepted tickets, a deferred queue, rejected
/// entries to record as dedup misses, and per-stage counters to log).
pub fn run_pipeline(proposals: Vec<Proposal>, category_filter: &CategoryFilter, config: &PipelineConfig, ctx: &PipelineContext) -> PipelineOutcome {
    let found = proposals.len();
    let mut stage_counts = vec![("found", found)];
    let mut rejected = Vec::new();
    let mut deferred = Vec::new();

    // Stage 3: category filter.
    let (kept, blocked) = split(proposals, |p| category_filter.passes(p.category));
    rejected.extend(blocked.into_iter().map(|p| Rejection {
        stage: "category",
        reason: format!("category {} blocked", category_name(p.category)),
        proposal: p,
    }));
    stage_counts.push(("category", kept.len()));

    // Stage 4: scope filter. Out-of-scope proposals are deferred, not rejected.
    let (kept, out_of_scope) = split(kept, |p| proposal_in_scope(p, &ctx.scope_globs));
    deferred.extend(out_of_scope);
    stage_counts.push(("scope", kept.len()));

    // Stage 5: deduplication against existing ticket/PR titles and dedup memory.
    let mut combined_memory: Vec<DedupEntry> = ctx
        .existing_titles
        .iter()
        .map(|t| DedupEntry::new(t.clone(), false))
        .collect();
    combined_memory.extend(ctx.dedup_memory.iter().cloned());
    let (kept, duplicates) = split(kept, |p| !dedup::is_duplicate(&p.title, &combined_memory, config.dedup_threshold));
    rejected.extend(duplicates.into_iter().map(|p| Rejection {
        stage: "dedup",
        reason: "duplicate of an existing ticket or proposal".to_string(),
        proposal: p,
    }));
    stage_counts.push(("dedup", kept.len()));

    // Stage 6: impact floor.
    let (kept, low_impact) = split(kept, |p| p.impact_score >= config.min_impact_score);
    rejected.extend(low_impact.into_iter().map(|p| Rejection {
        stage: "impact",
        reason: format!("impact score below floor {}", config.min_impact_score),
        proposal: p,
    }));
    stage_counts.push(("impact", kept.len()));

    // Stage 7: dependency enablement — proposals that unblock a recently
    // completed title move to the front.
    let enabled = dedup::get_enabled_proposals_default(&ctx.dedup_memory, Utc::now());
    let mut kept = kept;
    kept.sort_by_key(|p| !enabled.iter().any(|t| dedup::normalize_title(t) == dedup::normalize_title(&p.title)));

    // Stage 8: category x sector affinity. Suppressed categories need
    // confidence above the floor to survive at all; boosted categories
    // move to the front, suppressed ones (that survive) to the back.
    let kept = if let Some(affinity) = &ctx.sector_affinity {
        let sector = sector_with_affinity(affinity.clone());
        let (kept, suppressed) = split(kept, |p| sectors::category_allowed(&sector, category_name(p.category), p.confidence));
        rejected.extend(suppressed.into_iter().map(|p| Rejection {
            stage: "affinity",
            reason: "suppressed category below confidence floor for this sector".to_string(),
            proposal: p,
        }));
        let mut kept = kept;
        kept.sort_by_key(|p| affinity_rank(affinity, category_name(p.category)));
        kept
    } else {
        kept
    };

    // Stage 9: test balance — cap the proportion of `test` category
    // proposals in what's carried forward; excess moves to deferred.
    let max_tests = ((kept.len() as f64) * config.max_test_ratio).floor() as usize;
    let mut test_count = 0usize;
    let (kept, excess_tests): (Vec<Proposal>, Vec<Proposal>) = kept.into_iter().partition(|p| {
        if matches!(p.category, ProposalCategory::Test) {
            test_count += 1;
            test_count <= max_tests
        } else {
            true
        }
    });
    deferred.extend(excess_tests);

    // Stage 10: file-cooldown re-ranking — proposals touching recently
    // failed files sort to the back, but are not dropped.
    let mut kept = kept;
    kept.sort_by_key(|p| {
        p.files
            .iter()
            .map(|f| ctx.file_cooldowns.get(f).copied().unwrap_or(0))
            .max()
            .unwrap_or(0)
    });
    stage_counts.push(("balance", kept.len()));

    // Stage 11: batch selection.
    let batch_size = config.remaining_pr_budget.min(config.run_mode.default_batch());
    let overflow_at = batch_size.min(kept.len());
    let mut accepted = kept;
    let overflow = accepted.split_off(overflow_at);
    deferred.extend(overflow);

    for (stage, count) in &stage_counts {
        tracing::info!(stage = %stage, remaining = count, "proposal pipeline stage");
    }

    PipelineOutcome {
        accepted,
        deferred,
        rejected,
        stage_counts,
        review_learnings: Vec::new(),
    }
}

fn sector_with_affinity(affinity: CategoryAffinity) -> ratchet_types::Sector {
    let mut sector = ratchet_types::Sector::new("", "unknown");
    sector.affinity = affinity;
    sector
}

fn affinity_rank(affinity: &CategoryAffinity, category: &str) -> i32 {
    if affinity.boosted.iter().any(|c| c == category) {
        -1
    } else if affinity.suppressed.iter().any(|c| c == category) {
        1
    } else {
        0
    }
}

/// Whether the scout should retry the current sector (empty pipeline
/// result, cap not yet reached) or advance to the next one.
pub fn should_retry_scout(accepted_count: usize, retry_count: u32, config: &PipelineConfig) -> bool {
    accepted_count == 0 && retry_count < config.scout_retry_cap
}
