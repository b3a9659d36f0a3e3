// Copyright (C) 2026 Muster Authors
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Error types for document store operations.

/// Result type using StoreError.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by document store backends and the transaction engine.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum StoreError {
    /// An op set was rejected because an assertion no longer held when the
    /// set was applied. Nothing was written.
    #[error("transaction rejected: an assertion failed against current state")]
    Rejected,

    /// A retry budget was exhausted without resolving to a definitive
    /// success or guard failure. Safe to retry the whole operation later.
    #[error("state is changing too quickly; try again later")]
    ExcessiveContention,

    /// The backing store failed.
    #[error("store error during '{operation}': {details}")]
    Backend {
        /// The operation that failed.
        operation: String,
        /// Error details.
        details: String,
    },

    /// A document could not be encoded or decoded.
    #[error("document serialization failed: {details}")]
    Serialization {
        /// Error details.
        details: String,
    },
}

impl StoreError {
    /// Whether this error is an op-set rejection (assertion failure).
    pub fn is_rejected(&self) -> bool {
        matches!(self, StoreError::Rejected)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Backend {
            operation: "query".to_string(),
            details: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization {
            details: err.to_string(),
        }
    }
}
