// Query Optimizer - heuristic cost estimate and explain trace.
// Hints are advisory: the executor always scans every node.

use super::ast::{QueryPlan, LogicalOperator, SortDirection};

const BASE_COST: i64 = 100;
const LABEL_INDEX_DISCOUNT: i64 = 20;
const FIELD_INDEX_DISCOUNT: i64 = 10;

/// Labels that the graph store keeps a type index for.
const INDEXED_LABELS: &[&str] = &["file", "function"];
/// Field suffixes that the graph store keeps a lookup index for.
const INDEXED_FIELD_SUFFIXES: &[&str] = &[".name", ".path"];

#[derive(Debug, Clone, PartialEq)]
pub struct OptimizationHints {
    pub use_index: bool,
    pub index_hints: Vec<String>,
    pub estimated_cost: i64,
    pub execution_plan: Vec<String>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct QueryOptimizer;

impl QueryOptimizer {
    pub fn new() -> Self {
        Self
    }

    /// Pure function of the plan; never fails.
    pub fn optimize(&self, plan: &QueryPlan) -> OptimizationHints {
        let mut index_hints = Vec::new();
        let mut execution_plan = Vec::new();
        let mut estimated_cost = BASE_COST;

        // Rule 1: label index for indexed node types
        for (i, pattern) in plan.node_patterns.iter().enumerate() {
            let indexed = pattern.labels.iter()
                .find(|l| INDEXED_LABELS.iter().any(|idx| l.eq_ignore_ascii_case(idx)));
            if let Some(label) = indexed {
                let label = label.to_ascii_lowercase();
                index_hints.push(format!("label:{}", label));
                estimated_cost -= LABEL_INDEX_DISCOUNT;
                execution_plan.push(format!(
                    "Use type index for pattern #{} ({}:{})",
                    i + 1,
                    pattern.variable.as_deref().unwrap_or("_"),
                    label
                ));
            }
        }

        // Rule 2: field index for name/path conditions
        if let Some(clause) = &plan.where_clause {
            for cond in &clause.conditions {
                if INDEXED_FIELD_SUFFIXES.iter().any(|s| cond.left.ends_with(s)) {
                    index_hints.push(format!("field:{}", cond.left));
                    estimated_cost -= FIELD_INDEX_DISCOUNT;
                    execution_plan.push(format!(
                        "Use field index for {} {} {}",
                        cond.left, cond.operator, cond.right
                    ));
                }
            }
        }

        execution_plan.extend(Self::describe_steps(plan));

        OptimizationHints {
            use_index: !index_hints.is_empty(),
            index_hints,
            estimated_cost,
            execution_plan,
        }
    }

    fn describe_steps(plan: &QueryPlan) -> Vec<String> {
        let mut steps = vec![format!(
            "Scan nodes and intersect {} pattern(s)",
            plan.node_patterns.len()
        )];

        if let Some(clause) = &plan.where_clause {
            let op = match clause.operator {
                LogicalOperator::And => "AND",
                LogicalOperator::Or => "OR",
            };
            steps.push(format!("Filter {} condition(s) combined with {}", clause.conditions.len(), op));
        }
        if let Some(order) = &plan.order_by {
            let keys: Vec<String> = order.items.iter()
                .map(|i| match i.direction {
                    SortDirection::Asc => format!("{} ASC", i.expression),
                    SortDirection::Desc => format!("{} DESC", i.expression),
                })
                .collect();
            steps.push(format!("Sort by {}", keys.join(", ")));
        }
        if let Some(skip) = plan.skip {
            steps.push(format!("Skip {}", skip));
        }
        if let Some(limit) = plan.limit {
            steps.push(format!("Limit {}", limit));
        }
        steps.push("Collect incident edges".to_string());
        steps
    }
}

/// Execution trace renderer (for EXPLAIN-style output)
pub struct PlanExplainer;

impl PlanExplainer {
    pub fn explain(hints: &OptimizationHints) -> String {
        let mut out = format!(
            "Estimated cost: {} (index: {})",
            hints.estimated_cost,
            if hints.use_index { "yes" } else { "no" }
        );
        for (i, step) in hints.execution_plan.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, step));
        }
        out
    }
}
