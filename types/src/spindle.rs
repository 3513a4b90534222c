use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

/// Bounded sliding-window signal history the spindle detector updates on
/// each agent iteration. `window` bounds every `VecDeque` below to the
/// same size (default 3-5, configurable).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpindleState {
    pub window: usize,
    pub output_hashes: VecDeque<u64>,
    pub diff_hashes: VecDeque<u64>,
    pub iterations_since_change: u32,
    pub cumulative_output_chars: u64,
    pub cumulative_change_chars: u64,
    pub failing_command_signatures: HashSet<String>,
    pub plan_hashes: VecDeque<u64>,
    pub file_edit_counts: HashMap<String, u32>,
}

impl SpindleState {
    pub fn new(window: usize) -> Self {
        Self {
            window,
            output_hashes: VecDeque::new(),
            diff_hashes: VecDeque::new(),
            iterations_since_change: 0,
            cumulative_output_chars: 0,
            cumulative_change_chars: 0,
            failing_command_signatures: HashSet::new(),
            plan_hashes: VecDeque::new(),
            file_edit_counts: HashMap::new(),
        }
    }

    fn push_bounded(deque: &mut VecDeque<u64>, value: u64, window: usize) {
        deque.push_back(value);
        while deque.len() > window {
            deque.pop_front();
        }
    }

    pub fn push_output_hash(&mut self, hash: u64) {
        Self::push_bounded(&mut self.output_hashes, hash, self.window);
    }

    pub fn push_diff_hash(&mut self, hash: u64) {
        Self::push_bounded(&mut self.diff_hashes, hash, self.window);
    }

    pub fn push_plan_hash(&mut self, hash: u64) {
        Self::push_bounded(&mut self.plan_hashes, hash, self.window);
    }

    pub fn record_file_edit(&mut self, path: impl Into<String>) {
        *self.file_edit_counts.entry(path.into()).or_insert(0) += 1;
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SpindleReason {
    OutputSimilarity,
    Stalled,
    TokenBudget,
    RepeatedFailingCommand,
    Oscillation,
    FileThrash,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpindleDiagnostics {
    pub similarity_score: f64,
    pub iterations_without_change: u32,
    pub repeated_patterns: u32,
    pub oscillation_pattern: bool,
}

/// Result of evaluating `SpindleState` against the detector's thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpindleVerdict {
    pub should_abort: bool,
    pub should_block: bool,
    pub reason: Option<SpindleReason>,
    pub confidence: f64,
    pub diagnostics: SpindleDiagnostics,
}

impl SpindleVerdict {
    pub fn clean() -> Self {
        Self {
            should_abort: false,
            should_block: false,
            reason: None,
            confidence: 0.0,
            diagnostics: SpindleDiagnostics::default(),
        }
    }
}
