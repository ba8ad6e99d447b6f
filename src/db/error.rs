//! Error types for store construction and backend selection.
//!
//! Operational failures (connection refused, constraint violations, disk
//! errors) never surface as these errors: stores log them and return
//! `false`, `None` or an empty list instead.

use std::fmt;

use crate::db::schema::BackendKind;

/// Errors raised while building a credential store or its descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Required configuration is missing or inconsistent.
    Config(String),

    /// The requested backend kind has no implementation for this operation.
    UnsupportedBackend(BackendKind),

    /// Local filesystem preparation failed (embedded backend only).
    Io(String),
}

impl StoreError {
    /// Shorthand for a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::UnsupportedBackend(kind) => {
                write!(f, "Unsupported backend for this operation: {}", kind)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_display() {
        assert_eq!(
            StoreError::config("missing user").to_string(),
            "Configuration error: missing user"
        );
        assert_eq!(
            StoreError::UnsupportedBackend(BackendKind::Sqlite).to_string(),
            "Unsupported backend for this operation: sqlite"
        );
    }
}
