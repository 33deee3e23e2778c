use std::time::Duration;
use thiserror::Error;

/// Failure kinds surfaced by the query engine. Cache operations never fail.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    /// Query text does not match the MATCH grammar.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Runtime fault while evaluating a condition (e.g. an invalid regex).
    #[error("Evaluation error: {0}")]
    Evaluation(String),

    /// Fault outside parsing and evaluation, such as an unreadable graph store.
    #[error("Query execution failed: {0}")]
    Execution(String),

    #[error("Saved query not found: {0}")]
    SavedQueryNotFound(String),

    #[error("Query deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl QueryError {
    /// Whether re-issuing the same query might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, QueryError::Evaluation(_) | QueryError::DeadlineExceeded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_message_shape() {
        let err = QueryError::Execution("graph store lock poisoned".into());
        assert_eq!(err.to_string(), "Query execution failed: graph store lock poisoned");
    }

    #[test]
    fn test_retryable_kinds() {
        assert!(QueryError::Evaluation("bad regex".into()).is_retryable());
        assert!(QueryError::DeadlineExceeded(Duration::from_millis(5)).is_retryable());
        assert!(!QueryError::Parse("x".into()).is_retryable());
        assert!(!QueryError::SavedQueryNotFound("id".into()).is_retryable());
    }
}
