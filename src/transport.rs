//! HTTP transport to the remote engine
//!
//! The session only talks to [`Transport`], so tests can substitute a
//! recording fake for the reqwest-backed [`HttpTransport`].

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Call;
use crate::protocol::{timeouts, Method};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineRequest {
    pub call: Call,
    /// Route relative to the engine base URL
    pub path: String,
    pub body: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl EngineResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one request and waits for the engine's reply.
///
/// An `Err` means no HTTP response was obtained at all; non-success
/// statuses come back as `Ok` and are judged by the caller.
pub trait Transport {
    fn send(&self, request: &EngineRequest) -> Result<EngineResponse>;
}

#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub token: Option<String>,
    pub insecure: bool,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            token: None,
            insecure: false,
            connect_timeout: Duration::from_secs(timeouts::CONNECT_SECS),
            request_timeout: Duration::from_secs(timeouts::REQUEST_SECS),
        }
    }
}

pub struct HttpTransport {
    client: Client,
    base_url: Url,
}

impl HttpTransport {
    pub fn new(base_url: &str, options: &TransportOptions) -> Result<Self> {
        let base_url = normalize_base_url(base_url)?;

        let mut headers = HeaderMap::new();
        if let Some(token) = options.token.as_deref().filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {}", token))
                .context("Access token contains invalid header characters")?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = Client::builder()
            .default_headers(headers)
            .connect_timeout(options.connect_timeout)
            .timeout(options.request_timeout)
            .danger_accept_invalid_certs(options.insecure)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }
}

/// Parse the engine URL, making sure relative routes append to its path
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let with_slash = if trimmed.ends_with('/') {
        trimmed.to_string()
    } else {
        format!("{}/", trimmed)
    };
    let url = Url::parse(&with_slash).with_context(|| format!("Invalid engine URL: {}", raw))?;
    if !matches!(url.scheme(), "http" | "https") {
        anyhow::bail!("Engine URL must use http or https: {}", raw);
    }
    Ok(url)
}

impl Transport for HttpTransport {
    fn send(&self, request: &EngineRequest) -> Result<EngineResponse> {
        let url = self
            .base_url
            .join(&request.path)
            .with_context(|| format!("Invalid route {}", request.path))?;
        let builder = match request.call.method() {
            Method::Post => self.client.post(url.clone()),
            Method::Put => self.client.put(url.clone()),
        };
        let response = builder
            .json(&request.body)
            .send()
            .with_context(|| format!("{} {}", request.call, url))?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .with_context(|| format!("Failed to read {} response body", request.call))?
            .to_vec();
        Ok(EngineResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_base_url_appends_slash() {
        let url = normalize_base_url("http://localhost:9090/api/v1").unwrap();
        assert_eq!(url.as_str(), "http://localhost:9090/api/v1/");
        assert_eq!(
            url.join("projects/remote-bind/start").unwrap().as_str(),
            "http://localhost:9090/api/v1/projects/remote-bind/start"
        );
    }

    #[test]
    fn test_normalize_base_url_rejects_other_schemes() {
        assert!(normalize_base_url("ftp://example.com").is_err());
        assert!(normalize_base_url("not a url").is_err());
    }

    #[test]
    fn test_http_transport_builds_with_token() {
        let options = TransportOptions {
            token: Some("secret".into()),
            insecure: true,
            ..Default::default()
        };
        let t = HttpTransport::new("https://engine.example/api/v1/", &options).unwrap();
        assert_eq!(t.base_url().path(), "/api/v1/");
    }

    #[test]
    fn test_response_success_range() {
        let ok = EngineResponse { status: 202, body: vec![] };
        let bad = EngineResponse { status: 404, body: vec![] };
        assert!(ok.is_success());
        assert!(!bad.is_success());
    }
}
