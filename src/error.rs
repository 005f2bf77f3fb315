//! Error types for Stratus
//!
//! All modules use `StratusResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Stratus operations
pub type StratusResult<T> = Result<T, StratusError>;

/// All errors that can occur in Stratus
#[derive(Error, Debug)]
pub enum StratusError {
    // Lookup errors
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("Record already exists: {0}")]
    Duplicate(String),

    // Delete / mutation conflicts
    #[error("{kind} {id} is not empty: {dependents} dependent record(s) remain")]
    NotEmpty {
        kind: &'static str,
        id: String,
        dependents: usize,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    // Lock coordinator errors
    #[error("Lock backend unavailable: {0}")]
    LockUnavailable(String),

    // Task orchestrator errors
    #[error("Unknown task kind: {0}")]
    UnknownTaskKind(String),

    #[error("Task queue is closed, cannot schedule task {0}")]
    QueueClosed(String),

    // Cache manager errors
    #[error("Cache {cache_id} is at capacity for payload {payload_id}")]
    CapacityExceeded {
        cache_id: String,
        payload_id: String,
    },

    // Reconciliation errors
    #[error("Partial sync failure: {failed} of {total} entries failed")]
    PartialSync { failed: usize, total: usize },

    // Input validation errors
    #[error("Invalid input: {0}")]
    Validation(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StratusError {
    /// Create a not-found error for a record kind
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Check if this error blocks only the current entry of a
    /// reconciliation pass rather than the whole pass
    pub fn is_entry_scoped(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Duplicate(_) | Self::Conflict(_) | Self::Validation(_)
        )
    }

    /// Check if this error means the caller must abort the whole operation
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::LockUnavailable(_) | Self::QueueClosed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StratusError::not_found("resource", "res-1");
        assert_eq!(err.to_string(), "resource not found: res-1");

        let err = StratusError::UnknownTaskKind("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }

    #[test]
    fn error_entry_scoped() {
        assert!(StratusError::Conflict("x".into()).is_entry_scoped());
        assert!(!StratusError::LockUnavailable("down".into()).is_entry_scoped());
    }

    #[test]
    fn error_fatal() {
        assert!(StratusError::LockUnavailable("down".into()).is_fatal());
        assert!(!StratusError::not_found("task", "t").is_fatal());
    }
}
