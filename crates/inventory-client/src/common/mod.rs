//! Common utilities for inventory and source endpoint requests

use crate::error::InventoryError;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// TLS settings for a source endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TlsOptions {
    pub insecure_skip_verify: bool,
    /// PEM bundle
    pub cacert: Option<String>,
}

/// Build a reqwest client honouring the endpoint's TLS options.
pub fn build_client(tls: &TlsOptions, timeout: Option<Duration>) -> Result<Client, InventoryError> {
    let mut builder = Client::builder().danger_accept_invalid_certs(tls.insecure_skip_verify);
    if let Some(timeout) = timeout {
        builder = builder.timeout(timeout);
    }
    if let Some(pem) = tls.cacert.as_deref().filter(|p| !p.trim().is_empty()) {
        for cert in reqwest::Certificate::from_pem_bundle(pem.as_bytes())? {
            builder = builder.add_root_certificate(cert);
        }
    }
    Ok(builder.build()?)
}

/// HTTP client wrapper with bearer authentication
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpClient {
    /// Create a new HTTP client wrapper
    pub fn new(client: Client, base_url: String, token: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Build a full URL from a path
    pub fn build_url(&self, path: &str) -> String {
        if path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// Make a GET request
    pub async fn get<T: for<'de> Deserialize<'de>>(&self, path: &str) -> Result<T, InventoryError> {
        let url = self.build_url(path);
        debug!("GET {}", url);

        let response = self
            .authorize(self.client.get(&url))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| InventoryError::SourceUnavailable(format!("GET {path}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::ItemNotFound(format!(
                "Resource not found: {} - {}",
                path, body
            )));
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(InventoryError::Authentication(format!("GET {} - {}", path, status)));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(InventoryError::SourceUnavailable(format!(
                "GET {} failed: {} - {}",
                path, status, body
            )));
        }

        let text = response.text().await?;
        serde_json::from_str(&text).map_err(|e| {
            InventoryError::SourceSchema(format!(
                "error decoding {}: {} - Response (first 500 chars): {}",
                path,
                e,
                text.chars().take(500).collect::<String>()
            ))
        })
    }

    /// Build query string from filters
    pub fn build_query_string(filters: &[(&str, &str)]) -> String {
        filters
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}
