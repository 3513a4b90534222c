//! Online loop/stall/oscillation detector run once per agent iteration,
//! grounded on a guardians-style bounded-window signal accumulation: each
//! call folds one iteration's output/diff into [`ratchet_types::SpindleState`]
//! and returns a verdict the ticket pipeline acts on (abort the worktree,
//! block for human attention, or continue).

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use ratchet_types::{SpindleDiagnostics, SpindleReason, SpindleState, SpindleVerdict};

/// Tunable thresholds for [`check`]. All have defaults matching the
/// engine's baseline configuration; a cycle's formula may override any of
/// them per project.
#[derive(Debug, Clone, Copy)]
pub struct SpindleConfig {
    pub similarity_threshold: f64,
    pub max_similar_outputs: usize,
    pub max_stall_iterations: u32,
    pub token_warning_level: u64,
    pub token_abort_level: u64,
    pub max_file_edits: u32,
}

impl Default for SpindleConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_similar_outputs: 3,
            max_stall_iterations: 2,
            token_warning_level: 80_000,
            token_abort_level: 120_000,
            max_file_edits: 20,
        }
    }
}

/// Rough chars-per-token ratio used to turn cumulative output length into
/// a token-budget estimate without a real tokenizer.
const CHARS_PER_TOKEN_ESTIMATE: u64 = 4;

/// A 64-bit simhash over word shingles: similar texts land on hashes with
/// a small Hamming distance, so [`hamming_similarity`] approximates
/// content similarity from the hash alone, without retaining the original
/// output text in [`SpindleState`].
fn simhash(text: &str) -> u64 {
    let mut bit_votes = [0i32; 64];
    let mut any_word = false;
    for word in text.split_whitespace() {
        any_word = true;
        let mut hasher = DefaultHasher::new();
        word.hash(&mut hasher);
        let h = hasher.finish();
        for (bit, vote) in bit_votes.iter_mut().enumerate() {
            if (h >> bit) & 1 == 1 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }
    if !any_word {
        return 0;
    }
    let mut result: u64 = 0;
    for (bit, vote) in bit_votes.iter().enumerate() {
        if *vote > 0 {
            result |= 1 << bit;
        }
    }
    result
}

fn hamming_similarity(a: u64, b: u64) -> f64 {
    1.0 - ((a ^ b).count_ones() as f64 / 64.0)
}

fn normalize_command(command: &str) -> String {
    command.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Evaluate one agent iteration's output/diff against accumulated state,
/// mutating `state` in place and returning a verdict for the caller to
/// act on. `failing_command` is `Some` only when the iteration's exec
/// outcome failed, carrying its (already redacted) command line.
pub fn check(
    state: &mut SpindleState,
    new_output: &str,
    new_diff: &str,
    failing_command: Option<&str>,
    config: &SpindleConfig,
) -> SpindleVerdict {
    let output_hash = simhash(new_output);
    let diff_hash = simhash(new_diff);

    let similar_count = state
        .output_hashes
        .iter()
        .filter(|h| hamming_similarity(**h, output_hash) >= config.similarity_threshold)
        .count();
    let similarity_score = state
        .output_hashes
        .iter()
        .map(|h| hamming_similarity(*h, output_hash))
        .fold(0.0_f64, f64::max);

    let diff_unchanged = new_diff.trim().is_empty()
        || state
            .diff_hashes
            .back()
            .is_some_and(|last| hamming_similarity(*last, diff_hash) >= config.similarity_threshold);
    if diff_unchanged {
        state.iterations_since_change += 1;
    } else {
        state.iterations_since_change = 0;
    }

    state.push_output_hash(output_hash);
    state.push_diff_hash(diff_hash);
    state.cumulative_output_chars += new_output.len() as u64;

    let mut repeated_command = false;
    if let Some(command) = failing_command {
        let signature = normalize_command(command);
        if !state.failing_command_signatures.insert(signature) {
            repeated_command = true;
        }
    }

    let oscillation = {
        let hashes: Vec<u64> = state.plan_hashes.iter().copied().collect();
        hashes.len() >= 4
            && hashes[hashes.len() - 1] == hashes[hashes.len() - 3]
            && hashes[hashes.len() - 2] == hashes[hashes.len() - 4]
            && hashes[hashes.len() - 1] != hashes[hashes.len() - 2]
    };

    let thrashing_file = state
        .file_edit_counts
        .iter()
        .find(|(_, count)| **count > config.max_file_edits);

    let estimated_tokens = state.cumulative_output_chars / CHARS_PER_TOKEN_ESTIMATE;

    let diagnostics = SpindleDiagnostics {
        similarity_score,
        iterations_without_change: state.iterations_since_change,
        repeated_patterns: similar_count as u32,
        oscillation_pattern: oscillation,
    };

    if repeated_command {
        return SpindleVerdict {
            should_abort: false,
            should_block: true,
            reason: Some(SpindleReason::RepeatedFailingCommand),
            confidence: 1.0,
            diagnostics,
        };
    }

    if thrashing_file.is_some() {
        return SpindleVerdict {
            should_abort: true,
            should_block: false,
            reason: Some(SpindleReason::FileThrash),
            confidence: 1.0,
            diagnostics,
        };
    }

    if oscillation {
        return SpindleVerdict {
            should_abort: true,
            should_block: false,
            reason: Some(SpindleReason::Oscillation),
            confidence: 1.0,
            diagnostics,
        };
    }

    if estimated_tokens >= config.token_abort_level {
        return SpindleVerdict {
            should_abort: true,
            should_block: false,
            reason: Some(SpindleReason::TokenBudget),
            confidence: (estimated_tokens as f64 / config.token_abort_level as f64).min(1.0),
            diagnostics,
        };
    }

    if similar_count + 1 >= config.max_similar_outputs {
        return SpindleVerdict {
            should_abort: true,
            should_block: false,
            reason: Some(SpindleReason::OutputSimilarity),
            confidence: similarity_score,
            diagnostics,
        };
    }

    if state.iterations_since_change > config.max_stall_iterations {
        return SpindleVerdict {
            should_abort: true,
            should_block: false,
            reason: Some(SpindleReason::Stalled),
            confidence: (state.iterations_since_change as f64 / (config.max_stall_iterations as f64 + 1.0)).min(1.0),
            diagnostics,
        };
    }

    SpindleVerdict {
        should_abort: false,
        should_block: false,
        reason: None,
        confidence: 0.0,
        diagnostics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_iteration_does_not_abort() {
        let mut state = SpindleState::new(3);
        let verdict = check(&mut state, "did some work", "+1 line", None, &SpindleConfig::default());
        assert!(!verdict.should_abort);
        assert!(!verdict.should_block);
        assert!(verdict.reason.is_none());
    }

    #[test]
    fn repeated_output_triggers_output_similarity() {
        let mut state = SpindleState::new(5);
        let config = SpindleConfig {
            max_similar_outputs: 2,
            ..SpindleConfig::default()
        };
        let _ = check(&mut state, "same exact analysis of the module", "diff a", None, &config);
        let verdict = check(&mut state, "same exact analysis of the module", "diff b", None, &config);
        assert!(verdict.should_abort);
        assert_eq!(verdict.reason, Some(SpindleReason::OutputSimilarity));
    }

    #[test]
    fn no_diff_change_across_iterations_stalls() {
        let mut state = SpindleState::new(5);
        let config = SpindleConfig {
            max_stall_iterations: 1,
            ..SpindleConfig::default()
        };
        let _ = check(&mut state, "looked around", "", None, &config);
        let _ = check(&mut state, "looked around more", "", None, &config);
        let verdict = check(&mut state, "looked around even more", "", None, &config);
        assert!(verdict.should_abort);
        assert_eq!(verdict.reason, Some(SpindleReason::Stalled));
    }

    #[test]
    fn same_failing_command_twice_blocks_not_aborts() {
        let mut state = SpindleState::new(5);
        let config = SpindleConfig::default();
        let _ = check(&mut state, "ran tests", "diff", Some("cargo test --lib"), &config);
        let verdict = check(&mut state, "ran tests again", "diff2", Some("cargo test --lib"), &config);
        assert!(verdict.should_block);
        assert!(!verdict.should_abort);
        assert_eq!(verdict.reason, Some(SpindleReason::RepeatedFailingCommand));
    }

    #[test]
    fn file_thrash_detected_from_preexisting_edit_counts() {
        let mut state = SpindleState::new(5);
        for _ in 0..25 {
            state.record_file_edit("src/lib.rs");
        }
        let config = SpindleConfig {
            max_file_edits: 20,
            ..SpindleConfig::default()
        };
        let verdict = check(&mut state, "edited again", "diff", None, &config);
        assert!(verdict.should_abort);
        assert_eq!(verdict.reason, Some(SpindleReason::FileThrash));
    }

    #[test]
    fn oscillating_plan_hashes_detected() {
        let mut state = SpindleState::new(5);
        state.push_plan_hash(1);
        state.push_plan_hash(2);
        state.push_plan_hash(1);
        state.push_plan_hash(2);
        let verdict = check(&mut state, "plan A again", "diff", None, &SpindleConfig::default());
        assert!(verdict.should_abort);
        assert_eq!(verdict.reason, Some(SpindleReason::Oscillation));
    }
}
