//! Pure scoring functions over [`DedupEntry`] lists, grounded on the
//! decaying-memory/tfidf-similarity style of a stage0-flavored scout
//! memory: everything here is a function of its arguments, with no file
//! I/O — [`super::DedupStore`] is the thin, lock-guarded wrapper that
//! persists the list this module operates on.

use std::collections::HashSet;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use ratchet_types::DedupEntry;

pub const DEFAULT_THRESHOLD: f64 = 0.6;
const DEFAULT_DECAY_RATE: f64 = 5.0;

fn recent_window() -> ChronoDuration {
    ChronoDuration::days(3)
}

fn enabled_proposal_window() -> ChronoDuration {
    ChronoDuration::hours(48)
}

/// Lowercase, collapse runs of non-word characters to single spaces, trim.
pub fn normalize_title(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_was_space = false;
    for c in s.to_lowercase().chars() {
        if c.is_alphanumeric() || c == '_' {
            out.push(c);
            last_was_space = false;
        } else if !last_was_space {
            out.push(' ');
            last_was_space = true;
        }
    }
    out.trim().to_string()
}

fn word_set(s: &str) -> HashSet<String> {
    normalize_title(s)
        .split_whitespace()
        .filter(|w| w.len() > 2)
        .map(str::to_string)
        .collect()
}

fn jaccard<T: Eq + std::hash::Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Jaccard similarity over the sets of words longer than two characters.
pub fn title_similarity(a: &str, b: &str) -> f64 {
    jaccard(&word_set(a), &word_set(b))
}

fn bigrams(s: &str) -> HashSet<(char, char)> {
    let filtered: Vec<char> = s
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    if filtered.len() < 2 {
        return HashSet::new();
    }
    filtered.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Jaccard similarity over character bigrams, after stripping non-alphanumerics.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    jaccard(&bigrams(a), &bigrams(b))
}

fn combined_score(a: &str, b: &str) -> f64 {
    title_similarity(a, b).max(bigram_similarity(a, b))
}

/// Whether `title` duplicates anything already in `existing`: exact match
/// after normalization, or combined word/bigram similarity at or above
/// `threshold`.
pub fn is_duplicate(title: &str, existing: &[DedupEntry], threshold: f64) -> bool {
    let normalized = normalize_title(title);
    existing.iter().any(|entry| {
        normalize_title(&entry.title) == normalized || combined_score(title, &entry.title) >= threshold
    })
}

/// The best-scoring entry in `memory` for `title`, or `None` if nothing
/// clears `threshold`.
pub fn match_against_memory<'a>(
    title: &str,
    memory: &'a [DedupEntry],
    threshold: f64,
) -> Option<&'a DedupEntry> {
    let normalized = normalize_title(title);
    memory
        .iter()
        .map(|entry| {
            let score = if normalize_title(&entry.title) == normalized {
                1.0
            } else {
                combined_score(title, &entry.title)
            };
            (entry, score)
        })
        .filter(|(_, score)| *score >= threshold)
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(entry, _)| entry)
}

/// Decay every entry's weight in place by `rate`, halved if recently seen
/// and halved again if completed; drops entries whose weight falls to
/// zero or below.
pub fn apply_decay(entries: &mut Vec<DedupEntry>, rate: f64, now: DateTime<Utc>) {
    entries.retain_mut(|entry| {
        let mut decay = rate;
        if now - entry.last_seen_at < recent_window() {
            decay /= 2.0;
        }
        if entry.completed {
            decay /= 2.0;
        }
        entry.weight = (entry.weight - decay).min(100.0);
        entry.weight > 0.0
    });
}

/// Apply the default decay rate.
pub fn apply_default_decay(entries: &mut Vec<DedupEntry>, now: DateTime<Utc>) {
    apply_decay(entries, DEFAULT_DECAY_RATE, now);
}

/// Record a title being proposed (or completed) again: bumps the matching
/// entry's weight, or inserts a fresh one.
pub fn record_entry(entries: &mut Vec<DedupEntry>, title: &str, completed: bool) {
    let now = Utc::now();
    let normalized = normalize_title(title);
    if let Some(entry) = entries
        .iter_mut()
        .find(|e| normalize_title(&e.title) == normalized)
    {
        entry.weight = (entry.weight + 15.0).min(100.0);
        entry.last_seen_at = now;
        entry.hit_count += 1;
        if completed {
            entry.completed = true;
        }
        return;
    }
    entries.push(DedupEntry::new(title.to_string(), completed));
}

/// Render the highest-weight entries as a bounded "already completed"
/// block, one title per line, stopping once `budget` characters would be
/// exceeded.
pub fn format_for_prompt(entries: &[DedupEntry], budget: usize) -> String {
    let mut sorted: Vec<&DedupEntry> = entries.iter().collect();
    sorted.sort_by(|a, b| b.weight.partial_cmp(&a.weight).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = String::new();
    for entry in sorted {
        let line = format!("- {}\n", entry.title);
        if out.len() + line.len() > budget {
            break;
        }
        out.push_str(&line);
    }
    out
}

/// Titles worth re-proposing: `related_titles` of entries completed
/// within `window`, minus titles already marked completed anywhere in
/// `entries`.
pub fn get_enabled_proposals(entries: &[DedupEntry], now: DateTime<Utc>, window: ChronoDuration) -> Vec<String> {
    let already_completed: HashSet<&str> = entries
        .iter()
        .filter(|e| e.completed)
        .map(|e| e.title.as_str())
        .collect();

    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in entries.iter().filter(|e| e.completed && now - e.last_seen_at < window) {
        for related in &entry.related_titles {
            if already_completed.contains(related.as_str()) {
                continue;
            }
            if seen.insert(related.clone()) {
                out.push(related.clone());
            }
        }
    }
    out
}

/// Default-window convenience wrapper over [`get_enabled_proposals`].
pub fn get_enabled_proposals_default(entries: &[DedupEntry], now: DateTime<Utc>) -> Vec<String> {
    get_enabled_proposals(entries, now, enabled_proposal_window())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_title_collapses_punctuation_and_case() {
        assert_eq!(normalize_title("Fix   the--Bug!!"), "fix the bug");
    }

    #[test]
    fn exact_normalized_match_is_duplicate() {
        let existing = vec![DedupEntry::new("Fix the bug", false)];
        assert!(is_duplicate("fix   THE bug", &existing, DEFAULT_THRESHOLD));
    }

    #[test]
    fn unrelated_titles_are_not_duplicates() {
        let existing = vec![DedupEntry::new("Add retry logic to the http client", false)];
        assert!(!is_duplicate("Rename the database module", &existing, DEFAULT_THRESHOLD));
    }

    #[test]
    fn match_against_memory_picks_highest_scoring_entry() {
        let memory = vec![
            DedupEntry::new("Add caching to the query planner", false),
            DedupEntry::new("Add caching layer for query planner results", false),
        ];
        let found = match_against_memory("add caching to query planner", &memory, 0.3).unwrap();
        assert!(found.title.contains("caching"));
    }

    #[test]
    fn apply_decay_drops_entries_at_zero_weight() {
        let mut entries = vec![DedupEntry {
            weight: 4.0,
            last_seen_at: Utc::now() - ChronoDuration::days(10),
            ..DedupEntry::new("old proposal", false)
        }];
        apply_decay(&mut entries, 5.0, Utc::now());
        assert!(entries.is_empty());
    }

    #[test]
    fn apply_decay_halves_for_recent_and_completed() {
        let mut entries = vec![DedupEntry {
            weight: 90.0,
            last_seen_at: Utc::now(),
            completed: true,
            ..DedupEntry::new("recent completed", true)
        }];
        apply_decay(&mut entries, 4.0, Utc::now());
        // decay = 4 / 2 (recent) / 2 (completed) = 1
        assert_eq!(entries[0].weight, 89.0);
    }

    #[test]
    fn record_entry_bumps_existing_and_inserts_new() {
        let mut entries = Vec::new();
        record_entry(&mut entries, "Add retry logic", false);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].weight, 60.0);

        record_entry(&mut entries, "add   retry logic", true);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].weight, 75.0);
        assert_eq!(entries[0].hit_count, 1);
        assert!(entries[0].completed);
    }

    #[test]
    fn format_for_prompt_respects_budget() {
        let entries = vec![
            DedupEntry { weight: 90.0, ..DedupEntry::new("high priority item", false) },
            DedupEntry { weight: 10.0, ..DedupEntry::new("low priority item", false) },
        ];
        let out = format_for_prompt(&entries, 25);
        assert!(out.contains("high priority"));
        assert!(!out.contains("low priority"));
    }

    #[test]
    fn get_enabled_proposals_excludes_already_completed() {
        let mut trigger = DedupEntry::new("finished feature", true);
        trigger.related_titles = vec!["follow up A".to_string(), "finished sibling".to_string()];
        let sibling = DedupEntry::new("finished sibling", true);

        let entries = vec![trigger, sibling];
        let enabled = get_enabled_proposals_default(&entries, Utc::now());
        assert_eq!(enabled, vec!["follow up A".to_string()]);
    }
}
