//! Error types for store operations.

use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A key holds a value of a different structural type than the
    /// operation expects (for example a hash operation against a set key).
    #[error("wrong type for key '{key}': expected {expected}, found {found}")]
    WrongType {
        /// The key that was accessed.
        key: String,
        /// The structural type the operation expected.
        expected: &'static str,
        /// The structural type the key actually holds.
        found: &'static str,
    },

    /// An increment was applied to a value that is not an integer.
    #[error("value at key '{key}' is not an integer")]
    NotInteger {
        /// The key that was incremented.
        key: String,
    },

    /// The backend failed for a reason outside the store's data model,
    /// such as a lost connection in a networked implementation.
    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Creates a backend error from any displayable cause.
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }
}
