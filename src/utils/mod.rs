//! Shared utilities: hashing, retry backoff, atomic file writes, HTTP client

pub mod backoff;
pub mod fs;
pub mod hashing;
pub mod http;

pub use backoff::retry_delay;
pub use fs::write_atomic;
pub use hashing::sha256_hex;
pub use http::HttpClient;
