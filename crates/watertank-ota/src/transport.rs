//! Transport client contract and the HTTP implementation
//!
//! A request either yields a [`TransportResponse`] (any status) or fails to
//! open. Status handling is the caller's decision.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A fully read response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportResponse {
    status: u16,
    headers: HashMap<String, String>,
    body: Vec<u8>,
    truncated: bool,
}

impl TransportResponse {
    /// Build a response; header names are stored lower-cased
    pub fn new<I, K, V>(status: u16, headers: I, body: Vec<u8>) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
            body,
            truncated: false,
        }
    }

    /// Mark the body as cut off at the read limit
    pub fn with_truncated(mut self, truncated: bool) -> Self {
        self.truncated = truncated;
        self
    }

    /// HTTP status code
    pub fn status(&self) -> u16 {
        self.status
    }

    /// Whether the status is 2xx
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All headers, names lower-cased
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.headers
    }

    /// Body bytes read (at most the requested limit)
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Take ownership of the body
    pub fn into_body(self) -> Vec<u8> {
        self.body
    }

    /// Body was longer than the read limit
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }
}

/// Issues GET requests for the version check and the blob ranges
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    /// Open `url`, read headers and at most `max_body_len` body bytes.
    ///
    /// An error means the request could not be opened or completed.
    async fn get(&self, url: &str, max_body_len: usize) -> Result<TransportResponse>;
}

/// [`Transport`] over `reqwest`
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a client with the given per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("watertank-ota/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client })
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for HttpTransport {
    async fn get(&self, url: &str, max_body_len: usize) -> Result<TransportResponse> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to open {url}"))?;

        let status = response.status().as_u16();
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let mut body = Vec::new();
        let mut truncated = false;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read response body")?
        {
            let room = max_body_len.saturating_sub(body.len());
            if chunk.len() > room {
                body.extend_from_slice(chunk.get(..room).unwrap_or_default());
                truncated = true;
                break;
            }
            body.extend_from_slice(&chunk);
        }

        debug!(status, body_len = body.len(), truncated, "Response received");

        Ok(TransportResponse::new(status, headers, body).with_truncated(truncated))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let response = TransportResponse::new(200, [("Content-MD5", "abc==")], Vec::new());
        assert_eq!(response.header("content-md5"), Some("abc=="));
        assert_eq!(response.header("CONTENT-MD5"), Some("abc=="));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_success_range() {
        let empty: [(&str, &str); 0] = [];
        assert!(TransportResponse::new(200, empty, Vec::new()).is_success());
        assert!(TransportResponse::new(206, empty, Vec::new()).is_success());
        assert!(!TransportResponse::new(404, empty, Vec::new()).is_success());
        assert!(!TransportResponse::new(500, empty, Vec::new()).is_success());
    }
}
