// Query pattern frequency tracking for cache warm-up.

use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

const MAX_TRACKED_PATTERNS: usize = 150;
const PRUNED_PATTERNS: usize = 100;
const MIN_FREQUENT_COUNT: u64 = 3;
const FREQUENT_RATIO: f64 = 0.02;
const MAX_EXPANSIONS: usize = 3;

const SAMPLE_FILES: [&str; MAX_EXPANSIONS] = ["index.ts", "main.py", "app.js"];
const SAMPLE_NUMBERS: [&str; MAX_EXPANSIONS] = ["10", "50", "100"];

fn file_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b[\w-]+\.(ts|tsx|js|jsx|mjs|py|rs|go|java|kt|swift|rb|php|cs|cpp|cc|c|h|hpp|vue)\b").ok()
    })
    .as_ref()
}

fn hash_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[0-9a-fA-F]{8,}\b").ok()).as_ref()
}

fn number_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d+\b").ok()).as_ref()
}

/// Mask the variable parts of an already-normalized query:
/// file names -> `FILE`, 8+ hex digit tokens -> `HASH`, integers -> `NUM`.
pub fn normalize_pattern(query: &str) -> String {
    let mut masked = query.to_string();
    for (re, placeholder) in [(file_regex(), "FILE"), (hash_regex(), "HASH"), (number_regex(), "NUM")] {
        if let Some(re) = re {
            masked = re.replace_all(&masked, placeholder).into_owned();
        }
    }
    masked
}

/// Concrete queries for a warm-up pattern, substituting representative
/// literals for placeholders. Patterns with a `HASH` cannot be concretized.
pub fn expand_pattern(pattern: &str) -> Vec<String> {
    if pattern.contains("HASH") {
        return Vec::new();
    }
    if !pattern.contains("FILE") && !pattern.contains("NUM") {
        return vec![pattern.to_string()];
    }

    (0..MAX_EXPANSIONS)
        .map(|i| pattern.replace("FILE", SAMPLE_FILES[i]).replace("NUM", SAMPLE_NUMBERS[i]))
        .collect()
}

#[derive(Debug, Default)]
pub struct FrequencyTracker {
    counts: HashMap<String, u64>,
    total_queries: u64,
}

impl FrequencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one occurrence of `pattern`, returning its new count.
    pub fn record(&mut self, pattern: &str) -> u64 {
        self.total_queries += 1;
        let count = {
            let entry = self.counts.entry(pattern.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        if self.counts.len() > MAX_TRACKED_PATTERNS {
            self.prune();
        }
        count
    }

    pub fn count(&self, pattern: &str) -> u64 {
        self.counts.get(pattern).copied().unwrap_or(0)
    }

    /// Frequent once seen at least `max(3, 2% of all queries)` times.
    pub fn is_frequent(&self, pattern: &str) -> bool {
        let threshold = (MIN_FREQUENT_COUNT as f64).max(self.total_queries as f64 * FREQUENT_RATIO);
        self.count(pattern) as f64 >= threshold
    }

    pub fn tracked(&self) -> usize {
        self.counts.len()
    }

    pub fn top(&self, n: usize) -> Vec<(String, u64)> {
        let mut sorted: Vec<(String, u64)> = self.counts.iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.truncate(n);
        sorted
    }

    fn prune(&mut self) {
        let keep: HashMap<String, u64> = self.top(PRUNED_PATTERNS).into_iter().collect();
        tracing::debug!("Pruned query frequency table from {} to {} patterns", self.counts.len(), keep.len());
        self.counts = keep;
    }
}
