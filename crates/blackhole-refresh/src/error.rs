//! Error types for the refresh library.

use std::time::Duration;
use thiserror::Error;

/// Main error type for refresh operations.
///
/// Every variant is fatal for the job: nothing in the engine retries.
#[derive(Error, Debug)]
pub enum RefreshError {
    /// Bad options, missing credentials, unreadable option file.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The topology has no usable definition for the requested cluster.
    #[error("Topology resolution failed: {0}")]
    Topology(String),

    /// Pool or network failure with context.
    #[error("Connection error: {message}\n  Context: {context}")]
    Connection { message: String, context: String },

    /// Replicas did not catch up within the allowed wait.
    #[error("Replication lag still {lag:?} after waiting {waited:?} (ceiling {max_lag:?})")]
    ReplicationTimeout {
        lag: Duration,
        max_lag: Duration,
        waited: Duration,
    },

    /// The source table definition did not match the expected rewrite pattern.
    #[error("Cannot rewrite definition of table {table}: {message}")]
    SchemaParse { table: String, message: String },

    /// A statement was rejected by the server.
    #[error("Statement failed: {message}\n  Statement: {statement}")]
    Statement { statement: String, message: String },

    /// A lifecycle phase was invoked from the wrong state.
    #[error("Cannot {action} while job is {phase}")]
    InvalidTransition { action: &'static str, phase: String },

    /// Checkpoint file error.
    #[error("State file error: {0}")]
    State(String),

    /// Options hash mismatch on resume.
    #[error("Options have changed since the checkpoint was written - cannot resume. Start a fresh run instead.")]
    ConfigChanged,

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RefreshError {
    /// Create a Connection error with context about where it occurred.
    pub fn connection(message: impl ToString, context: impl Into<String>) -> Self {
        RefreshError::Connection {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a Statement error for the given SQL text.
    pub fn statement(statement: impl Into<String>, message: impl ToString) -> Self {
        RefreshError::Statement {
            statement: statement.into(),
            message: message.to_string(),
        }
    }

    /// Create a SchemaParse error.
    pub fn schema_parse(table: impl Into<String>, message: impl Into<String>) -> Self {
        RefreshError::SchemaParse {
            table: table.into(),
            message: message.into(),
        }
    }

    /// Classify a driver error raised while running `statement`.
    ///
    /// Server-side rejections are statement failures; everything else
    /// (IO, protocol, pool) means the connection itself is unusable.
    pub fn from_mysql(statement: &str, err: mysql_async::Error) -> Self {
        match err {
            mysql_async::Error::Server(e) => Self::statement(statement, e),
            other => Self::connection(other, format!("executing `{}`", statement)),
        }
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            RefreshError::Config(_)
            | RefreshError::Topology(_)
            | RefreshError::ConfigChanged => 2,
            RefreshError::Connection { .. } => 3,
            RefreshError::ReplicationTimeout { .. } => 4,
            RefreshError::SchemaParse { .. } => 5,
            RefreshError::Statement { .. } => 6,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for refresh operations.
pub type Result<T> = std::result::Result<T, RefreshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct_per_fatal_class() {
        assert_eq!(RefreshError::Config("x".into()).exit_code(), 2);
        assert_eq!(RefreshError::Topology("x".into()).exit_code(), 2);
        assert_eq!(RefreshError::connection("refused", "pool").exit_code(), 3);
        let timeout = RefreshError::ReplicationTimeout {
            lag: Duration::from_secs(30),
            max_lag: Duration::from_secs(5),
            waited: Duration::from_secs(600),
        };
        assert_eq!(timeout.exit_code(), 4);
        assert_eq!(RefreshError::schema_parse("t", "no engine").exit_code(), 5);
        assert_eq!(RefreshError::statement("INSERT", "dup").exit_code(), 6);
        assert_eq!(RefreshError::State("bad".into()).exit_code(), 1);
    }

    #[test]
    fn test_statement_error_names_sql() {
        let err = RefreshError::statement("DROP TABLE IF EXISTS t_data_pipeline_refresh", "denied");
        let text = err.to_string();
        assert!(text.contains("denied"));
        assert!(text.contains("DROP TABLE IF EXISTS t_data_pipeline_refresh"));
    }

    #[test]
    fn test_format_detailed_includes_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "topology.yaml missing");
        let err = RefreshError::from(io);
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: IO error"));
    }
}
