// Query pipeline: text -> tokens -> plan -> hints -> result.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod eval;
pub mod optimizer;
pub mod executor;

pub use ast::QueryPlan;
pub use executor::{Deadline, QueryExecutor, Row};
pub use optimizer::{OptimizationHints, PlanExplainer, QueryOptimizer};
pub use parser::parse;
