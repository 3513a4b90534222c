//! Codebase indexing and sector rotation, grounded on
//! `codex-core::architect`'s `chunker`/`complexity`/`churn` heuristics for
//! the indexing side, generalized here to name-based purpose inference
//! instead of AST-level chunking (the core doesn't parse the target
//! language). [`index_codebase`] is the only impure function in this
//! module; everything downstream of it — merging, scoring, affinity — is a
//! pure function over [`Sector`] lists, in the same style as
//! [`crate::dedup`] and [`crate::learnings`].

use std::path::{Path, PathBuf};

use ratchet_types::Sector;
use walkdir::WalkDir;

/// On-disk shape of `sectors.json`. Bumping [`CURRENT_VERSION`] forces a
/// fresh index on next load rather than attempting to interpret an
/// incompatible layout.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Default)]
pub struct SectorFile {
    pub version: u32,
    pub cycle: u64,
    pub sectors: Vec<Sector>,
}

pub const CURRENT_VERSION: u32 = 1;

/// Directory depth the scan walks below the project root. Two levels
/// mirrors the distilled heuristic (`src/api`, `src/services/billing`)
/// without descending into every leaf file.
const SCAN_DEPTH: usize = 2;

/// Files beyond this many lines are treated as large for purposes of the
/// scout prompt warning, mirrored from the teacher's `complexity` module's
/// size threshold.
pub const LARGE_FILE_LOC: usize = 300;

const PURPOSE_HINTS: &[(&str, &str)] = &[
    ("api", "api"),
    ("routes", "api"),
    ("handlers", "api"),
    ("services", "services"),
    ("service", "services"),
    ("tests", "tests"),
    ("test", "tests"),
    ("__tests__", "tests"),
    ("spec", "tests"),
    ("ui", "ui"),
    ("components", "ui"),
    ("views", "ui"),
    ("pages", "ui"),
    ("utils", "utils"),
    ("util", "utils"),
    ("helpers", "utils"),
    ("lib", "utils"),
    ("config", "config"),
    ("configs", "config"),
    ("settings", "config"),
];

/// Infer a sector's purpose from its directory name, falling back to
/// `"unknown"` when nothing matches — an explicit classification rather
/// than a guess the caller might mistake for a confident one (see
/// [`Sector::confidence`], set to `Low` in that case).
pub fn infer_purpose(dir_name: &str) -> &'static str {
    let lower = dir_name.to_lowercase();
    PURPOSE_HINTS
        .iter()
        .find(|(hint, _)| lower == *hint || lower.ends_with(hint))
        .map(|(_, purpose)| *purpose)
        .unwrap_or("unknown")
}

fn confidence_for(purpose: &str) -> ratchet_types::Classification {
    if purpose == "unknown" {
        ratchet_types::Classification::Low
    } else {
        ratchet_types::Classification::Medium
    }
}

/// A production sector is anything not under a test/docs/example
/// directory; used to weight scout attention toward code that ships.
fn looks_like_production(purpose: &str, dir_name: &str) -> bool {
    let lower = dir_name.to_lowercase();
    purpose != "tests" && lower != "examples" && lower != "docs" && lower != "fixtures"
}

fn is_code_file(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("rs" | "ts" | "tsx" | "js" | "jsx" | "py" | "go" | "java" | "rb" | "c" | "cpp" | "h")
    )
}

/// Walk `root` up to [`SCAN_DEPTH`] directories deep and produce one
/// `Sector` per directory with at least one code file. This is the single
/// impure function in the module — everything else here operates on the
/// `Vec<Sector>` it returns.
pub fn index_codebase(root: &Path) -> Vec<Sector> {
    let mut sectors = Vec::new();

    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(SCAN_DEPTH)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
    {
        let dir_name = entry.file_name().to_string_lossy().to_string();
        if dir_name.starts_with('.') || dir_name == "target" || dir_name == "node_modules" {
            continue;
        }

        let file_count = WalkDir::new(entry.path())
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && is_code_file(e.path()))
            .count() as u32;
        if file_count == 0 {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        let purpose = infer_purpose(&dir_name);

        let mut sector = Sector::new(relative, purpose);
        sector.file_count = file_count;
        sector.is_production = looks_like_production(purpose, &dir_name);
        sector.confidence = confidence_for(purpose);
        sectors.push(sector);
    }

    sectors
}

/// Merge a fresh scan into the preserved sector state: sectors that still
/// exist keep their counters (scan count, yield, success/failure,
/// affinity, last-scanned bookkeeping) but pick up the fresh file count and
/// purpose; sectors no longer present on disk are dropped; brand-new
/// sectors are added as-is.
pub fn merge_refresh(existing: Vec<Sector>, fresh: Vec<Sector>) -> Vec<Sector> {
    let mut by_path: std::collections::HashMap<String, Sector> =
        existing.into_iter().map(|s| (s.path.clone(), s)).collect();

    let mut merged = Vec::with_capacity(fresh.len());
    for scanned in fresh {
        if let Some(mut preserved) = by_path.remove(&scanned.path) {
            preserved.file_count = scanned.file_count;
            preserved.is_production = scanned.is_production;
            merged.push(preserved);
        } else {
            merged.push(scanned);
        }
    }
    merged
}

/// Pick the next sector to scout: prefer sectors not yet scanned in the
/// current round-trip (`last_scanned_cycle < current_cycle`), oldest
/// first; among ties on recency prefer higher estimated yield; break
/// remaining ties by path for determinism. `None` means every sector has
/// been scanned this round — the caller starts a fresh round by bumping
/// `current_cycle`.
pub fn get_next_scope(sectors: &[Sector], current_cycle: u64) -> Option<&Sector> {
    sectors
        .iter()
        .filter(|s| s.last_scanned_cycle < current_cycle || current_cycle == 0)
        .min_by(|a, b| {
            a.last_scanned_cycle
                .cmp(&b.last_scanned_cycle)
                .then_with(|| {
                    b.estimated_yield()
                        .partial_cmp(&a.estimated_yield())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.path.cmp(&b.path))
        })
}

/// Record a sector having been scanned this cycle: bumps scan count, sets
/// `last_scanned_at`/`last_scanned_cycle`, and rolls `yield_count` proposals
/// into the rolling-mean `proposal_yield`.
pub fn record_scan(sector: &mut Sector, cycle: u64, proposals_found: u32) {
    sector.scan_count += 1;
    sector.last_scanned_at = Some(chrono::Utc::now());
    sector.last_scanned_cycle = cycle;

    let n = sector.scan_count as f64;
    sector.proposal_yield += (proposals_found as f64 - sector.proposal_yield) / n;
}

/// Minimum confidence required for a suppressed category to still be
/// allowed through for a sector (§4.7: "only high-confidence proposals in
/// that category are allowed").
pub const SUPPRESSED_CATEGORY_CONFIDENCE_FLOOR: u8 = 80;

/// Record a ticket outcome against its sector's category affinity:
/// success nudges the category into the boosted list (and off suppressed,
/// if present); failure nudges it into suppressed (and off boosted).
pub fn record_category_outcome(sector: &mut Sector, category: &str, success: bool) {
    if success {
        sector.success_count += 1;
        sector.affinity.suppressed.retain(|c| c != category);
        if !sector.affinity.boosted.iter().any(|c| c == category) {
            sector.affinity.boosted.push(category.to_string());
        }
    } else {
        sector.failure_count += 1;
        sector.affinity.boosted.retain(|c| c != category);
        if !sector.affinity.suppressed.iter().any(|c| c == category) {
            sector.affinity.suppressed.push(category.to_string());
        }
    }
}

/// Whether a proposal in `category` at `confidence` is allowed for this
/// sector given its affinity: suppressed categories need confidence at or
/// above [`SUPPRESSED_CATEGORY_CONFIDENCE_FLOOR`].
pub fn category_allowed(sector: &Sector, category: &str, confidence: u8) -> bool {
    if sector.affinity.suppressed.iter().any(|c| c == category) {
        confidence >= SUPPRESSED_CATEGORY_CONFIDENCE_FLOOR
    } else {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sector(path: &str, purpose: &str) -> Sector {
        Sector::new(path, purpose)
    }

    #[test]
    fn infer_purpose_matches_known_hints() {
        assert_eq!(infer_purpose("services"), "services");
        assert_eq!(infer_purpose("Tests"), "tests");
        assert_eq!(infer_purpose("weird_dir_name"), "unknown");
    }

    #[test]
    fn merge_refresh_preserves_counters_for_existing_sectors() {
        let mut old = sector("src/api", "api");
        old.scan_count = 4;
        old.success_count = 2;
        old.proposal_yield = 1.5;

        let mut fresh = sector("src/api", "api");
        fresh.file_count = 9;

        let merged = merge_refresh(vec![old], vec![fresh]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].scan_count, 4);
        assert_eq!(merged[0].proposal_yield, 1.5);
        assert_eq!(merged[0].file_count, 9);
    }

    #[test]
    fn merge_refresh_drops_vanished_sectors_and_adds_new_ones() {
        let old = sector("src/removed", "unknown");
        let fresh = sector("src/new", "utils");

        let merged = merge_refresh(vec![old], vec![fresh.clone()]);
        assert_eq!(merged, vec![fresh]);
    }

    #[test]
    fn get_next_scope_prefers_oldest_unscanned_this_round() {
        let mut scanned_recently = sector("src/a", "api");
        scanned_recently.last_scanned_cycle = 5;
        let mut scanned_long_ago = sector("src/b", "utils");
        scanned_long_ago.last_scanned_cycle = 1;

        let sectors = vec![scanned_recently, scanned_long_ago];
        let next = get_next_scope(&sectors, 6).unwrap();
        assert_eq!(next.path, "src/b");
    }

    #[test]
    fn get_next_scope_breaks_ties_by_yield_then_path() {
        let mut high_yield = sector("src/z", "api");
        high_yield.proposal_yield = 5.0;
        high_yield.success_count = 3;
        let mut low_yield = sector("src/a", "api");
        low_yield.proposal_yield = 1.0;
        low_yield.success_count = 3;

        let sectors = vec![low_yield, high_yield];
        let next = get_next_scope(&sectors, 1).unwrap();
        assert_eq!(next.path, "src/z");
    }

    #[test]
    fn get_next_scope_is_none_once_round_exhausted() {
        let mut s = sector("src/a", "api");
        s.last_scanned_cycle = 3;
        assert!(get_next_scope(&[s], 3).is_none());
    }

    #[test]
    fn record_scan_updates_rolling_mean_yield() {
        let mut s = sector("src/a", "api");
        record_scan(&mut s, 1, 4);
        assert_eq!(s.proposal_yield, 4.0);
        record_scan(&mut s, 2, 0);
        assert_eq!(s.scan_count, 2);
        assert_eq!(s.proposal_yield, 2.0);
    }

    #[test]
    fn repeated_failure_suppresses_category_requiring_high_confidence() {
        let mut s = sector("src/a", "api");
        record_category_outcome(&mut s, "refactor", false);
        assert!(!category_allowed(&s, "refactor", 50));
        assert!(category_allowed(&s, "refactor", 90));
    }

    #[test]
    fn success_boosts_and_clears_suppression() {
        let mut s = sector("src/a", "api");
        record_category_outcome(&mut s, "fix", false);
        record_category_outcome(&mut s, "fix", true);
        assert!(s.affinity.boosted.contains(&"fix".to_string()));
        assert!(!s.affinity.suppressed.contains(&"fix".to_string()));
        assert!(category_allowed(&s, "fix", 10));
    }
}
