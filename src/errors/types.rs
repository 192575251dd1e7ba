//! Error type definitions for the content aggregation core
//!
//! The taxonomy maps directly onto the retry policy: `Network` errors are
//! transient and retried with backoff, `Auth` errors get exactly one session
//! refresh-and-retry, `MalformedData` skips the offending item, `Storage`
//! degrades the affected cache to memory-only, and `NotFound` is surfaced
//! directly.

use thiserror::Error;

/// Convenience result alias used throughout the crate
pub type SourceResult<T> = Result<T, SourceError>;

/// Error type for provider fetch, cache, and guide operations
#[derive(Error, Debug)]
pub enum SourceError {
    /// Transient transport failure (timeouts, connection resets, 5xx)
    #[error("network error: {message}")]
    Network { message: String },

    /// Credentials rejected or session token expired
    #[error("authentication failed: {message}")]
    Auth { message: String },

    /// Provider returned data we could not interpret
    #[error("malformed data: {message}")]
    MalformedData { message: String },

    /// Local cache read/write failure
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    /// Requested category/item/stream does not exist
    #[error("not found: {resource}")]
    NotFound { resource: String },
}

impl SourceError {
    /// Create a network error with a custom message
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create an authentication error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        Self::Auth {
            message: message.into(),
        }
    }

    /// Create a malformed-data error
    pub fn malformed<S: Into<String>>(message: S) -> Self {
        Self::MalformedData {
            message: message.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(resource: S) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }

    /// Whether the retry-with-backoff policy applies to this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Whether the one-shot session refresh policy applies to this error
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }
}

impl From<reqwest::Error> for SourceError {
    fn from(err: reqwest::Error) -> Self {
        // Status-mapped errors are produced by the HTTP wrapper; anything that
        // bubbles up here (connect, timeout, body read) is transport-level.
        Self::Network {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for SourceError {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedData {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_drives_retry_policy() {
        assert!(SourceError::network("timeout").is_transient());
        assert!(!SourceError::network("timeout").is_auth());
        assert!(SourceError::auth("expired token").is_auth());
        assert!(!SourceError::auth("expired token").is_transient());
        assert!(!SourceError::not_found("category 42").is_transient());
    }
}
