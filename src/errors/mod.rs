//! Error handling for the content aggregation core
//!
//! Re-exports the error types so callers can use `crate::errors::SourceError`
//! without knowing the internal module layout.

pub mod types;

pub use types::{SourceError, SourceResult};
