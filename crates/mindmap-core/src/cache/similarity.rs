// Multi-factor similarity between two cache contexts.

use serde_json::{Map, Value};
use std::collections::HashSet;
use std::hash::Hash;

const TYPE_WEIGHT: f64 = 1.0;
const ACTIVE_FILES_WEIGHT: f64 = 2.0;
const SESSION_GOALS_WEIGHT: f64 = 1.0;
const FRAMEWORK_CONTEXT_WEIGHT: f64 = 1.5;
const OPTIONS_WEIGHT: f64 = 0.5;

const BOOLEAN_OPTIONS: &[&str] = &["useActivation", "includeMetadata", "includeParentContext", "includeChildContext"];
const NUMERIC_OPTIONS: &[(&str, f64)] = &[("limit", 5.0), ("activationLevels", 1.0)];

/// Score in `[0, 1]`. Structured comparison when both contexts are JSON
/// objects sharing at least one scored field; word-level Jaccard otherwise.
pub fn context_similarity(a: &str, b: &str) -> f64 {
    match (serde_json::from_str::<Value>(a), serde_json::from_str::<Value>(b)) {
        (Ok(Value::Object(a_obj)), Ok(Value::Object(b_obj))) => {
            structured_similarity(&a_obj, &b_obj).unwrap_or_else(|| word_jaccard(a, b))
        }
        _ => word_jaccard(a, b),
    }
}

fn structured_similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> Option<f64> {
    let mut score = 0.0;
    let mut weight = 0.0;

    if let (Some(x), Some(y)) = (a.get("type"), b.get("type")) {
        score += if x == y { TYPE_WEIGHT } else { 0.0 };
        weight += TYPE_WEIGHT;
    }

    for (field, field_weight) in [
        ("activeFiles", ACTIVE_FILES_WEIGHT),
        ("sessionGoals", SESSION_GOALS_WEIGHT),
        ("frameworkContext", FRAMEWORK_CONTEXT_WEIGHT),
    ] {
        if let (Some(x), Some(y)) = (string_set(a.get(field)), string_set(b.get(field))) {
            score += jaccard(&x, &y) * field_weight;
            weight += field_weight;
        }
    }

    if let Some(options) = options_similarity(a, b) {
        score += options * OPTIONS_WEIGHT;
        weight += OPTIONS_WEIGHT;
    }

    if weight > 0.0 {
        Some(score / weight)
    } else {
        None
    }
}

/// Fraction of shared option fields that agree: booleans exactly, numbers
/// within a per-field tolerance.
fn options_similarity(a: &Map<String, Value>, b: &Map<String, Value>) -> Option<f64> {
    let mut matched = 0usize;
    let mut compared = 0usize;

    for field in BOOLEAN_OPTIONS {
        if let (Some(x), Some(y)) = (a.get(*field).and_then(Value::as_bool), b.get(*field).and_then(Value::as_bool)) {
            compared += 1;
            if x == y {
                matched += 1;
            }
        }
    }

    for (field, tolerance) in NUMERIC_OPTIONS {
        if let (Some(x), Some(y)) = (a.get(*field).and_then(Value::as_f64), b.get(*field).and_then(Value::as_f64)) {
            compared += 1;
            if (x - y).abs() <= *tolerance {
                matched += 1;
            }
        }
    }

    (compared > 0).then(|| matched as f64 / compared as f64)
}

fn string_set(value: Option<&Value>) -> Option<HashSet<String>> {
    let items = value?.as_array()?;
    Some(items.iter()
        .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string()))
        .collect())
}

pub fn jaccard<T: Eq + Hash>(a: &HashSet<T>, b: &HashSet<T>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

fn word_jaccard(a: &str, b: &str) -> f64 {
    let words = |s: &str| -> HashSet<String> {
        s.split_whitespace().map(str::to_lowercase).collect()
    };
    jaccard(&words(a), &words(b))
}
