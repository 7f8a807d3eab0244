use serde::{Deserialize, Serialize};
use thiserror::Error;

use madmin_types::VerificationStatus;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Module '{0}' not found")]
    ModuleNotFound(String),

    #[error("Build aborted: {0}")]
    BuildAborted(String),

    #[error("Invalid review transition for '{identifier}': {from} -> {to}")]
    InvalidTransition {
        identifier: String,
        from: VerificationStatus,
        to: VerificationStatus,
    },

    #[error(
        "Review conflict for '{identifier}': expected revision {expected}, found {actual}"
    )]
    ReviewConflict {
        identifier: String,
        expected: u64,
        actual: u64,
    },

    #[error("Snapshot {offered} does not advance the current snapshot {current}")]
    StaleSnapshot { offered: u64, current: u64 },

    #[error("Snapshot {sequence} failed its integrity check: {reason}")]
    CorruptedSnapshot { sequence: u64, reason: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("IO operation '{operation}' failed on path '{path}': {source}")]
    IoOperation {
        operation: String,
        path: std::path::PathBuf,
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid state file at '{path}': {source}")]
    InvalidStateFile {
        path: std::path::PathBuf,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

impl StoreError {
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            StoreError::NetworkError(_)
                | StoreError::ReviewConflict { .. }
                | StoreError::BuildAborted(_)
        )
    }

    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            StoreError::ModuleNotFound(_)
                | StoreError::InvalidTransition { .. }
                | StoreError::ReviewConflict { .. }
                | StoreError::InvalidQuery(_)
                | StoreError::ConfigError(_)
        )
    }

    pub(crate) fn io(
        operation: impl Into<String>,
        path: impl Into<std::path::PathBuf>,
        source: std::io::Error,
    ) -> Self {
        StoreError::IoOperation {
            operation: operation.into(),
            path: path.into(),
            source,
        }
    }
}

/// Classification attached to every entry of a build report.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed or incomplete manifest.
    SchemaViolation,
    /// Identifier collision inside one build batch.
    DuplicateIdentifier,
    /// Attempted change of an attested field on a reviewed identifier.
    VerifiedFieldMismatch,
    /// Unrecoverable failure while constructing or publishing a snapshot.
    BuildAborted,
    /// Identifier excluded because a reviewer rejected it.
    ReviewRejected,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}
