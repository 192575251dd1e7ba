//! Thin HTTP client wrapper over reqwest
//!
//! Centralizes timeouts, status-code-to-error mapping, transparent gzip
//! handling for guide feeds, and credential obfuscation in log output so the
//! provider handlers stay free of transport concerns.

use flate2::read::GzDecoder;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::io::Read;
use std::time::Duration;
use tracing::debug;

use crate::errors::{SourceError, SourceResult};

/// Shared HTTP client for all provider and artifact fetches
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    /// Create a client with the given connect and total-request timeouts
    pub fn new(connect_timeout: Duration, request_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .timeout(request_timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    /// Fetch a URL as text, gunzipping if the body is gzip-compressed
    pub async fn get_text(&self, url: &str, headers: &[(&str, &str)]) -> SourceResult<String> {
        let bytes = self.get_bytes(url, headers).await?.0;
        String::from_utf8(bytes)
            .map_err(|e| SourceError::malformed(format!("response is not UTF-8: {e}")))
    }

    /// Fetch a URL and deserialize the JSON body
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> SourceResult<T> {
        let bytes = self.get_bytes(url, headers).await?.0;
        serde_json::from_slice(&bytes).map_err(|e| {
            SourceError::malformed(format!("invalid JSON from {}: {e}", redact(url)))
        })
    }

    /// Fetch a URL as raw bytes; returns the body and its content type.
    /// Gzip-compressed bodies (magic `1f 8b`) are decompressed transparently.
    pub async fn get_bytes(
        &self,
        url: &str,
        headers: &[(&str, &str)],
    ) -> SourceResult<(Vec<u8>, Option<String>)> {
        debug!("fetching {}", redact(url));
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = request.send().await.map_err(|e| SourceError::Network {
            message: format!("request to {} failed: {e}", redact(url)),
        })?;

        let response = Self::check_status(response, url)?;
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string());

        let body = response.bytes().await.map_err(|e| SourceError::Network {
            message: format!("reading body from {} failed: {e}", redact(url)),
        })?;

        Ok((maybe_gunzip(&body)?, content_type))
    }

    fn check_status(response: Response, url: &str) -> SourceResult<Response> {
        let status = response.status();
        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            Err(SourceError::auth(format!("{status} from {}", redact(url))))
        } else if status == StatusCode::NOT_FOUND {
            Err(SourceError::not_found(redact(url)))
        } else {
            Err(SourceError::network(format!(
                "{status} from {}",
                redact(url)
            )))
        }
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(10), Duration::from_secs(30))
    }
}

/// Decompress gzip payloads; anything else passes through untouched
pub fn maybe_gunzip(bytes: &[u8]) -> SourceResult<Vec<u8>> {
    if bytes.len() < 2 || bytes[0] != 0x1f || bytes[1] != 0x8b {
        return Ok(bytes.to_vec());
    }
    let mut decoder = GzDecoder::new(bytes);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| SourceError::malformed(format!("gzip decode failed: {e}")))?;
    Ok(out)
}

/// Strip the query string so credentials embedded in URLs never hit the logs
pub fn redact(url: &str) -> String {
    match url.split_once('?') {
        Some((base, _)) => format!("{base}?..."),
        None => url.to_string(),
    }
}
