// Error taxonomy for query construction, store access, and request execution.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Builder errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// The builder was finalized without a table or without any select
    /// expressions. Callers treat this as an inert builder.
    #[error("query is missing its {clause} clause")]
    MissingClause { clause: &'static str },
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool is closed")]
    PoolClosed,

    #[error("store worker failed: {0}")]
    Worker(String),
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(e: tokio::task::JoinError) -> Self {
        StoreError::Worker(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Request errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum QueryError {
    /// Neither source resolved to anything executable.
    #[error("query resolved to nothing executable on either source")]
    EmptyQuery,

    /// A cross-source merge was attempted but one side returned no rows.
    #[error("no data found\n  totals: {totals_sql}\n  plays: {plays_sql}")]
    NoDataFound { totals_sql: String, plays_sql: String },

    #[error("failed to execute `{sql}`: {source}")]
    Execution {
        sql: String,
        #[source]
        source: StoreError,
    },

    #[error("metric catalog unavailable: {source}")]
    Catalog {
        #[source]
        source: StoreError,
    },

    #[error("metric dependency cycle: {}", path.join(" -> "))]
    DependencyCycle { path: Vec<String> },

    #[error("invalid value for filter `{key}`: {message}")]
    InvalidFilter { key: String, message: String },

    #[error("request cancelled")]
    Cancelled,

    #[error("calculator failed: {message}")]
    Calculator { message: String },
}

impl QueryError {
    pub(crate) fn execution(sql: impl Into<String>, source: StoreError) -> Self {
        QueryError::Execution {
            sql: sql.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_path() {
        let err = QueryError::DependencyCycle {
            path: vec!["a".into(), "b".into(), "a".into()],
        };
        assert_eq!(err.to_string(), "metric dependency cycle: a -> b -> a");
    }

    #[test]
    fn missing_clause_names_clause() {
        let err = BuildError::MissingClause { clause: "FROM" };
        assert_eq!(err.to_string(), "query is missing its FROM clause");
    }
}
