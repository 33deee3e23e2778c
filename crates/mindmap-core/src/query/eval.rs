// Field resolution and condition semantics shared by filtering and ordering.

use super::ast::{ComparisonOperator, Condition, LogicalOperator, NodePattern, WhereClause};
use mindmap_common::{Node, QueryError, Value};
use regex::{Regex, RegexBuilder};
use std::cmp::Ordering;

/// Resolve a dotted field path against a node.
///
/// - `field`: own field, else `metadata[field]`
/// - `n.field` / `node.field`: same as above
/// - `<other>.field`: `metadata[field]` only
///
/// The prefix is not checked against the variables bound in the pattern.
pub fn resolve_field(node: &Node, path: &str) -> Option<Value> {
    let parts: Vec<&str> = path.split('.').collect();
    match parts.as_slice() {
        [field] => own_or_metadata(node, field),
        [prefix, field] if *prefix == "n" || *prefix == "node" => own_or_metadata(node, field),
        [_, field] => node.metadata.get(*field).cloned(),
        _ => None,
    }
}

fn own_or_metadata(node: &Node, field: &str) -> Option<Value> {
    node.field(field).or_else(|| node.metadata.get(field).cloned())
}

/// Label and literal-property filter of a single node pattern.
pub fn matches_pattern(node: &Node, pattern: &NodePattern) -> bool {
    let label_ok = pattern.labels.is_empty()
        || pattern.labels.iter().any(|l| l.eq_ignore_ascii_case(&node.node_type));
    if !label_ok {
        return false;
    }

    pattern.properties.iter().all(|(key, expected)| {
        // Metadata is only consulted when the direct field is absent or falsy.
        let actual = match node.field(key) {
            Some(direct) if direct.is_truthy() => Some(direct),
            _ => node.metadata.get(key).cloned(),
        };
        actual.is_some_and(|v| v.matches(expected))
    })
}

/// Sort group of a value: numbers, strings, datetimes, booleans, null, then
/// missing fields last.
fn order_rank(value: Option<&Value>) -> u8 {
    match value {
        Some(Value::Int(_) | Value::Float(_)) => 0,
        Some(Value::Str(_)) => 1,
        Some(Value::DateTime(_)) => 2,
        Some(Value::Bool(_)) => 3,
        Some(Value::Null) => 4,
        None => 5,
    }
}

/// Total order used by ORDER BY. Values of different kinds sort by kind, so
/// mixed-type keys still give a consistent order; NaN sorts after every
/// other number.
pub fn order_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (Some(Value::Int(x)), Some(Value::Int(y))) => x.cmp(y),
        (Some(Value::Int(x)), Some(Value::Float(y))) => (*x as f64).total_cmp(y),
        (Some(Value::Float(x)), Some(Value::Int(y))) => x.total_cmp(&(*y as f64)),
        (Some(Value::Float(x)), Some(Value::Float(y))) => x.total_cmp(y),
        _ => {
            let (ra, rb) = (order_rank(a), order_rank(b));
            if ra != rb {
                return ra.cmp(&rb);
            }
            match (a, b) {
                (Some(a), Some(b)) => a.compare(b).unwrap_or(Ordering::Equal),
                _ => Ordering::Equal,
            }
        }
    }
}

/// Evaluates a WHERE clause with its regex patterns compiled once per query.
pub struct ConditionEvaluator<'c> {
    clause: &'c WhereClause,
    regexes: Vec<Option<Regex>>,
}

impl<'c> ConditionEvaluator<'c> {
    pub fn new(clause: &'c WhereClause) -> Result<Self, QueryError> {
        let regexes = clause.conditions.iter()
            .map(|c| match c.operator {
                ComparisonOperator::Regex => {
                    let pattern = c.right.to_string();
                    RegexBuilder::new(&pattern)
                        .case_insensitive(true)
                        .build()
                        .map(Some)
                        .map_err(|e| QueryError::Evaluation(format!(
                            "invalid regex '{}' in condition on '{}': {}",
                            pattern, c.left, e
                        )))
                }
                _ => Ok(None),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { clause, regexes })
    }

    pub fn evaluate(&self, node: &Node) -> bool {
        let mut results = self.clause.conditions.iter()
            .zip(&self.regexes)
            .map(|(cond, regex)| evaluate_condition(node, cond, regex.as_ref()));

        match self.clause.operator {
            LogicalOperator::Or => results.any(|r| r),
            LogicalOperator::And => results.all(|r| r),
        }
    }
}

fn evaluate_condition(node: &Node, cond: &Condition, regex: Option<&Regex>) -> bool {
    let value = resolve_field(node, &cond.left);
    let ordering = value.as_ref().and_then(|v| v.compare(&cond.right));

    match cond.operator {
        ComparisonOperator::Eq => ordering == Some(Ordering::Equal),
        ComparisonOperator::Ne => ordering != Some(Ordering::Equal),
        ComparisonOperator::Gt => ordering == Some(Ordering::Greater),
        ComparisonOperator::Lt => ordering == Some(Ordering::Less),
        ComparisonOperator::Gte => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
        ComparisonOperator::Lte => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
        ComparisonOperator::Contains
        | ComparisonOperator::StartsWith
        | ComparisonOperator::EndsWith => {
            let Some(value) = value else { return false };
            let haystack = value.to_string().to_lowercase();
            let needle = cond.right.to_string().to_lowercase();
            match cond.operator {
                ComparisonOperator::Contains => haystack.contains(&needle),
                ComparisonOperator::StartsWith => haystack.starts_with(&needle),
                _ => haystack.ends_with(&needle),
            }
        }
        ComparisonOperator::Regex => match (value, regex) {
            (Some(value), Some(re)) => re.is_match(&value.to_string()),
            _ => false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn runner() -> Node {
        Node::new("n1", "class", "TestRunner")
            .with_path("/src/test/runner.ts")
            .with_confidence(0.9)
            .with_metadata("loc", 120i64)
            .with_metadata("name", "shadowed")
            .with_metadata("visibility", "public")
    }

    fn clause(conditions: Vec<Condition>, operator: LogicalOperator) -> WhereClause {
        WhereClause { conditions, operator }
    }

    fn cond(left: &str, operator: ComparisonOperator, right: impl Into<Value>) -> Condition {
        Condition { left: left.to_string(), operator, right: right.into() }
    }

    #[test]
    fn test_resolve_field_prefixes() {
        let node = runner();
        assert_eq!(resolve_field(&node, "name"), Some(Value::Str("TestRunner".into())));
        assert_eq!(resolve_field(&node, "n.name"), Some(Value::Str("TestRunner".into())));
        assert_eq!(resolve_field(&node, "node.loc"), Some(Value::Int(120)));
        // Unknown prefixes read metadata only, even for direct fields.
        assert_eq!(resolve_field(&node, "m.name"), Some(Value::Str("shadowed".into())));
        assert_eq!(resolve_field(&node, "m.path"), None);
        assert_eq!(resolve_field(&node, "a.b.c"), None);
    }

    #[test]
    fn test_contains_is_case_insensitive() {
        let c = clause(vec![cond("name", ComparisonOperator::Contains, "test")], LogicalOperator::And);
        let eval = ConditionEvaluator::new(&c).unwrap();
        assert!(eval.evaluate(&runner()));
    }

    #[test]
    fn test_starts_and_ends_with() {
        let node = runner();
        let c = clause(vec![
            cond("n.path", ComparisonOperator::StartsWith, "/SRC"),
            cond("n.path", ComparisonOperator::EndsWith, ".ts"),
        ], LogicalOperator::And);
        assert!(ConditionEvaluator::new(&c).unwrap().evaluate(&node));
    }

    #[test]
    fn test_numeric_comparisons() {
        let node = runner();
        let check = |op, right: Value| {
            let c = clause(vec![Condition { left: "loc".into(), operator: op, right }], LogicalOperator::And);
            ConditionEvaluator::new(&c).unwrap().evaluate(&node)
        };
        assert!(check(ComparisonOperator::Gt, Value::Int(100)));
        assert!(check(ComparisonOperator::Gte, Value::Float(120.0)));
        assert!(check(ComparisonOperator::Lte, Value::Int(120)));
        assert!(!check(ComparisonOperator::Lt, Value::Int(120)));
        assert!(check(ComparisonOperator::Eq, Value::Float(120.0)));
        // Mixed types are unordered.
        assert!(!check(ComparisonOperator::Gt, Value::Str("1".into())));
        assert!(check(ComparisonOperator::Ne, Value::Str("120".into())));
    }

    #[test]
    fn test_missing_field_semantics() {
        let node = runner();
        let eq = clause(vec![cond("owner", ComparisonOperator::Eq, Value::Null)], LogicalOperator::And);
        assert!(!ConditionEvaluator::new(&eq).unwrap().evaluate(&node));
        let ne = clause(vec![cond("owner", ComparisonOperator::Ne, "x")], LogicalOperator::And);
        assert!(ConditionEvaluator::new(&ne).unwrap().evaluate(&node));
        let contains = clause(vec![cond("owner", ComparisonOperator::Contains, "")], LogicalOperator::And);
        assert!(!ConditionEvaluator::new(&contains).unwrap().evaluate(&node));
    }

    #[test]
    fn test_or_versus_and() {
        let node = runner();
        let conditions = vec![
            cond("name", ComparisonOperator::Eq, "Nope"),
            cond("visibility", ComparisonOperator::Eq, "public"),
        ];
        let or = clause(conditions.clone(), LogicalOperator::Or);
        let and = clause(conditions, LogicalOperator::And);
        assert!(ConditionEvaluator::new(&or).unwrap().evaluate(&node));
        assert!(!ConditionEvaluator::new(&and).unwrap().evaluate(&node));
    }

    #[test]
    fn test_regex_case_insensitive() {
        let c = clause(vec![cond("name", ComparisonOperator::Regex, "^test.*r$")], LogicalOperator::And);
        assert!(ConditionEvaluator::new(&c).unwrap().evaluate(&runner()));
    }

    #[test]
    fn test_invalid_regex_is_evaluation_error() {
        let c = clause(vec![cond("name", ComparisonOperator::Regex, "([unclosed")], LogicalOperator::And);
        let err = ConditionEvaluator::new(&c).err().unwrap();
        assert!(matches!(err, QueryError::Evaluation(_)));
    }

    #[test]
    fn test_pattern_labels_and_properties() {
        let node = runner();
        let mut pattern = NodePattern {
            variable: Some("n".into()),
            labels: vec!["CLASS".into()],
            properties: BTreeMap::new(),
        };
        assert!(matches_pattern(&node, &pattern));

        pattern.properties.insert("visibility".into(), Value::Str("public".into()));
        pattern.properties.insert("name".into(), Value::Str("TestRunner".into()));
        assert!(matches_pattern(&node, &pattern));

        pattern.properties.insert("loc".into(), Value::Int(99));
        assert!(!matches_pattern(&node, &pattern));

        pattern.labels = vec!["function".into()];
        pattern.properties.clear();
        assert!(!matches_pattern(&node, &pattern));
    }

    #[test]
    fn test_falsy_direct_field_falls_back_to_metadata() {
        let node = Node::new("n2", "file", "").with_metadata("name", "from-metadata");
        let mut properties = BTreeMap::new();
        properties.insert("name".to_string(), Value::Str("from-metadata".into()));
        let pattern = NodePattern { variable: None, labels: vec![], properties };
        assert!(matches_pattern(&node, &pattern));
    }

    #[test]
    fn test_order_values() {
        assert_eq!(order_values(Some(&Value::Int(1)), Some(&Value::Float(2.0))), Ordering::Less);
        assert_eq!(order_values(None, Some(&Value::Int(1))), Ordering::Greater);
        assert_eq!(order_values(None, None), Ordering::Equal);
        assert_eq!(order_values(Some(&Value::Str("a".into())), Some(&Value::Int(1))), Ordering::Greater);
        assert_eq!(order_values(Some(&Value::Float(f64::NAN)), Some(&Value::Int(1))), Ordering::Greater);
    }

    #[test]
    fn test_order_values_is_transitive_across_kinds() {
        let values = [
            Some(Value::Int(2)),
            Some(Value::Str("a".into())),
            None,
            Some(Value::Float(0.5)),
            Some(Value::Bool(true)),
            Some(Value::Null),
            Some(Value::Int(1)),
            Some(Value::Str("B".into())),
        ];
        for a in &values {
            for b in &values {
                for c in &values {
                    let (a, b, c) = (a.as_ref(), b.as_ref(), c.as_ref());
                    if order_values(a, b) != Ordering::Greater && order_values(b, c) != Ordering::Greater {
                        assert_ne!(order_values(a, c), Ordering::Greater, "{:?} {:?} {:?}", a, b, c);
                    }
                }
            }
            assert_eq!(order_values(a.as_ref(), a.as_ref()), Ordering::Equal);
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| order_values(a.as_ref(), b.as_ref()));
        assert_eq!(sorted, vec![
            Some(Value::Float(0.5)),
            Some(Value::Int(1)),
            Some(Value::Int(2)),
            Some(Value::Str("B".into())),
            Some(Value::Str("a".into())),
            Some(Value::Bool(true)),
            Some(Value::Null),
            None,
        ]);
    }
}
