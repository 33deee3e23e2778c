// Typed query plan produced by the parser.

use mindmap_common::Value;
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodePattern {
    pub variable: Option<String>,
    pub labels: Vec<String>,
    pub properties: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeDirection {
    Out,
    In,
    Both,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdgePattern {
    pub variable: Option<String>,
    pub edge_type: Option<String>,
    pub direction: EdgeDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComparisonOperator::Eq => "=",
            ComparisonOperator::Ne => "!=",
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Gte => ">=",
            ComparisonOperator::Lte => "<=",
            ComparisonOperator::Contains => "CONTAINS",
            ComparisonOperator::StartsWith => "STARTS WITH",
            ComparisonOperator::EndsWith => "ENDS WITH",
            ComparisonOperator::Regex => "REGEX",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    /// Dotted field path such as `n.name` or `loc`.
    pub left: String,
    pub operator: ComparisonOperator,
    pub right: Value,
}

/// All conditions combine with one operator; there is no nesting.
#[derive(Debug, Clone, PartialEq)]
pub struct WhereClause {
    pub conditions: Vec<Condition>,
    pub operator: LogicalOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
    Collect,
}

impl AggregateFunction {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "count" => Some(AggregateFunction::Count),
            "sum" => Some(AggregateFunction::Sum),
            "avg" => Some(AggregateFunction::Avg),
            "min" => Some(AggregateFunction::Min),
            "max" => Some(AggregateFunction::Max),
            "collect" => Some(AggregateFunction::Collect),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnItem {
    pub expression: String,
    pub alias: Option<String>,
    pub aggregate: Option<AggregateFunction>,
}

impl ReturnItem {
    /// Column name used in projected rows.
    pub fn column_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.expression)
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReturnClause {
    pub items: Vec<ReturnItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expression: String,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct OrderByClause {
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryPlan {
    pub node_patterns: Vec<NodePattern>,
    pub edge_patterns: Vec<EdgePattern>,
    pub where_clause: Option<WhereClause>,
    pub return_clause: Option<ReturnClause>,
    pub order_by: Option<OrderByClause>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
}
