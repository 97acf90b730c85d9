//! Error types for the transfer engine.

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum MoverError {
    /// Configuration error (invalid YAML, unknown load option, missing datasource, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// A probed source does not exist
    #[error("SourceIsEmpty: {0}")]
    SourceEmpty(String),

    /// Operation invoked on an adapter that cannot support it
    #[error("{datasource} does not implement {operation}")]
    NotImplemented {
        datasource: String,
        operation: String,
    },

    /// Network or external process failure against an endpoint
    #[error("Transport failure on {endpoint}: {message}")]
    Transport { endpoint: String, message: String },

    /// PostgreSQL / Redshift error
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// SQL Server error
    #[error("SQL Server error: {0}")]
    SqlServer(#[from] tiberius::error::Error),

    /// Connection pool error with context
    #[error("Pool error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// Malformed record, archive or delimited buffer
    #[error("Decode error: {0}")]
    Decode(String),

    /// GPG failure
    #[error("Encryption error: {0}")]
    Encryption(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A load failed and dropping its staging table failed as well
    #[error("{primary}\n  Staging cleanup also failed: {cleanup}")]
    Cleanup {
        primary: Box<MoverError>,
        cleanup: Box<MoverError>,
    },
}

impl MoverError {
    /// Create a Pool error with context about where it occurred
    pub fn pool(message: impl Into<String>, context: impl Into<String>) -> Self {
        MoverError::Pool {
            message: message.into(),
            context: context.into(),
        }
    }

    /// Create a Transport error for an endpoint
    pub fn transport(endpoint: impl Into<String>, message: impl ToString) -> Self {
        MoverError::Transport {
            endpoint: endpoint.into(),
            message: message.to_string(),
        }
    }

    /// Create a NotImplemented error
    pub fn not_implemented(datasource: impl Into<String>, operation: impl Into<String>) -> Self {
        MoverError::NotImplemented {
            datasource: datasource.into(),
            operation: operation.into(),
        }
    }

    /// Combine a primary failure with a later cleanup failure.
    ///
    /// The primary error comes first in the message. Neither error is exposed
    /// through `source()`, so detailed output prints each one once.
    pub fn with_cleanup(primary: MoverError, cleanup: MoverError) -> Self {
        MoverError::Cleanup {
            primary: Box::new(primary),
            cleanup: Box::new(cleanup),
        }
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            MoverError::Config(_) | MoverError::Yaml(_) | MoverError::Json(_) => 2,
            MoverError::SourceEmpty(_) => 3,
            MoverError::NotImplemented { .. } => 4,
            MoverError::Transport { .. }
            | MoverError::Postgres(_)
            | MoverError::SqlServer(_)
            | MoverError::Pool { .. }
            | MoverError::Io(_) => 5,
            MoverError::Decode(_) => 6,
            MoverError::Encryption(_) => 7,
            MoverError::Cleanup { primary, .. } => primary.exit_code(),
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

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, MoverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanup_shows_primary_first() {
        let err = MoverError::with_cleanup(
            MoverError::Decode("bad line".into()),
            MoverError::transport("db", "connection reset"),
        );
        let text = err.to_string();
        let primary = text.find("bad line").unwrap();
        let cleanup = text.find("connection reset").unwrap();
        assert!(primary < cleanup);
        assert_eq!(err.exit_code(), 6);
    }

    #[test]
    fn test_cleanup_has_no_source_chain() {
        let err = MoverError::with_cleanup(
            MoverError::Config("nope".into()),
            MoverError::transport("db", "gone"),
        );
        assert!(std::error::Error::source(&err).is_none());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MoverError::Config("x".into()).exit_code(), 2);
        assert_eq!(MoverError::SourceEmpty("x".into()).exit_code(), 3);
        assert_eq!(MoverError::not_implemented("stdout", "stream read").exit_code(), 4);
        assert_eq!(MoverError::transport("x", "y").exit_code(), 5);
        assert_eq!(MoverError::Encryption("x".into()).exit_code(), 7);
    }

    #[test]
    fn test_format_detailed_prints_cleanup_primary_once() {
        let err = MoverError::with_cleanup(
            MoverError::SourceEmpty("s3://b/k".into()),
            MoverError::transport("db", "gone"),
        );
        let detailed = err.format_detailed();
        assert!(detailed.starts_with("Error: "));
        assert_eq!(detailed.matches("s3://b/k").count(), 1);
        assert_eq!(detailed.matches("gone").count(), 1);
        assert!(!detailed.contains("Caused by:"));
    }

    #[test]
    fn test_format_detailed_walks_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let detailed = MoverError::Io(io).format_detailed();
        assert!(detailed.starts_with("Error: IO error: disk full"));
        assert!(detailed.contains("Caused by:\n  1: disk full"));
    }
}
