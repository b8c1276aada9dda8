//! Error taxonomy shared by the store layer, the remote authority client and the
//! reconciliation controller.
//!
//! Store failures (`StorageError`) never leave the adapters; they are logged and
//! degrade to a cache miss. Remote failures (`AuthorityError`) propagate to the
//! controller, which classifies them as terminal or transient and records them in
//! the published `AuthState`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure of a raw key/value backend.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("quota exceeded writing '{key}': {bytes} bytes > limit {limit}")]
    QuotaExceeded { key: String, bytes: usize, limit: usize },
    #[error("store io error: {0}")]
    Io(String),
    #[error("corrupt entry under '{0}'")]
    Corrupt(String),
}

impl StorageError {
    pub fn code_str(&self) -> &'static str {
        match self {
            StorageError::Unavailable(_) => "storage_unavailable",
            StorageError::QuotaExceeded { .. } => "storage_quota_exceeded",
            StorageError::Io(_) => "storage_io",
            StorageError::Corrupt(_) => "storage_corrupt",
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Failure reported by (or on the way to) the remote session authority.
#[derive(Debug, Clone, Error, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthorityError {
    /// Identifier/secret pair rejected. Terminal for that sign-in attempt.
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Refresh credential rejected. Forces a full sign-out and cache clear.
    #[error("refresh credential rejected")]
    InvalidRefreshCredential,
    #[error("{op} timed out after {after_ms}ms")]
    Timeout { op: String, after_ms: u64 },
    #[error("remote unavailable: {message}")]
    RemoteUnavailable { message: String },
}

impl AuthorityError {
    pub fn timeout(op: impl Into<String>, after_ms: u64) -> Self {
        AuthorityError::Timeout { op: op.into(), after_ms }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        AuthorityError::RemoteUnavailable { message: message.into() }
    }

    pub fn code_str(&self) -> &'static str {
        match self {
            AuthorityError::InvalidCredentials => "invalid_credentials",
            AuthorityError::InvalidRefreshCredential => "invalid_refresh_credential",
            AuthorityError::Timeout { .. } => "timeout",
            AuthorityError::RemoteUnavailable { .. } => "remote_unavailable",
        }
    }

    /// Terminal errors require the user to authenticate again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AuthorityError::InvalidCredentials | AuthorityError::InvalidRefreshCredential)
    }

    /// Transient errors may be retried on the next reconciliation cycle.
    pub fn is_transient(&self) -> bool {
        !self.is_terminal()
    }

    /// Process exit code used by the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            AuthorityError::InvalidCredentials => 2,
            AuthorityError::InvalidRefreshCredential => 3,
            AuthorityError::Timeout { .. } => 4,
            AuthorityError::RemoteUnavailable { .. } => 5,
        }
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod error_tests;
