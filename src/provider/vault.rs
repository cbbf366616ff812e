//! # Vault KV Reader
//!
//! Reads secrets from HashiCorp Vault's KV engine over its HTTP API.
//!
//! `storeLocation` is the Vault base URL and `sourcePath` is the API path below
//! `/v1/`. Both KV v1 (`{"data": {...}}`) and KV v2
//! (`{"data": {"data": {...}, "metadata": {...}}}`) responses are understood.

use crate::provider::{FetchedFields, ProviderError, SecretProvider};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use tracing::debug;
use zeroize::Zeroizing;

const TOKEN_HEADER: &str = "X-Vault-Token";

/// Vault KV provider
pub struct VaultKvProvider {
    client: reqwest::Client,
    token: Option<Zeroizing<String>>,
}

impl fmt::Debug for VaultKvProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultKvProvider")
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish_non_exhaustive()
    }
}

impl VaultKvProvider {
    /// Create a new provider with a per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(token: Option<Zeroizing<String>>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build Vault HTTP client")?;
        Ok(Self { client, token })
    }

    /// Load the Vault token from `VAULT_TOKEN`, falling back to the file named by
    /// `VAULT_TOKEN_FILE`. Returns `None` when neither is set.
    ///
    /// # Errors
    ///
    /// Returns an error if `VAULT_TOKEN_FILE` is set but cannot be read.
    pub fn token_from_env() -> Result<Option<Zeroizing<String>>> {
        if let Ok(token) = std::env::var("VAULT_TOKEN") {
            if !token.trim().is_empty() {
                return Ok(Some(Zeroizing::new(token.trim().to_string())));
            }
        }
        match std::env::var("VAULT_TOKEN_FILE") {
            Ok(path) => {
                let raw = Zeroizing::new(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read Vault token file {path}"))?,
                );
                Ok(Some(Zeroizing::new(raw.trim().to_string())))
            }
            Err(_) => Ok(None),
        }
    }
}

#[async_trait]
impl SecretProvider for VaultKvProvider {
    async fn fetch(
        &self,
        store_location: &str,
        source_path: &str,
    ) -> Result<FetchedFields, ProviderError> {
        let url = secret_url(store_location, source_path);
        debug!(url = %url, "Reading secret from Vault");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token.as_str());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| ProviderError::Unavailable(format!("reading response body: {e}")))?;

        if let Some(err) = classify_status(status, source_path) {
            return Err(err);
        }

        parse_kv_response(&body)
    }
}

/// Build the read URL for a path
#[must_use]
pub fn secret_url(store_location: &str, source_path: &str) -> String {
    format!(
        "{}/v1/{}",
        store_location.trim_end_matches('/'),
        source_path.trim_start_matches('/')
    )
}

/// Map a non-success HTTP status to a provider error. `None` means success.
#[must_use]
pub fn classify_status(status: StatusCode, source_path: &str) -> Option<ProviderError> {
    if status.is_success() {
        return None;
    }
    let err = match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ProviderError::Unauthorized(format!("vault returned {status} for {source_path}"))
        }
        StatusCode::NOT_FOUND => {
            ProviderError::NotFound(format!("no secret at {source_path}"))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            ProviderError::Unavailable(format!("vault throttled the request ({status})"))
        }
        s if s.is_server_error() => {
            ProviderError::Unavailable(format!("vault returned {status}"))
        }
        _ => ProviderError::Malformed(format!("unexpected vault response {status}")),
    };
    Some(err)
}

/// Decode a KV v1 or v2 read response into raw fields
///
/// # Errors
///
/// `Malformed` if the body is not JSON or has no field map, `NotFound` if the
/// KV v2 version is deleted or destroyed.
pub fn parse_kv_response(body: &[u8]) -> Result<FetchedFields, ProviderError> {
    let root: Value = serde_json::from_slice(body)
        .map_err(|e| ProviderError::Malformed(format!("invalid JSON: {e}")))?;

    let data = root
        .get("data")
        .ok_or_else(|| ProviderError::Malformed("response has no data".to_string()))?;

    let fields = match (data.get("data"), data.get("metadata")) {
        (Some(Value::Object(inner)), Some(_)) => inner,
        (Some(Value::Null), Some(_)) => {
            return Err(ProviderError::NotFound(
                "secret version is deleted or destroyed".to_string(),
            ));
        }
        _ => data
            .as_object()
            .ok_or_else(|| ProviderError::Malformed("data is not an object".to_string()))?,
    };

    let mut fetched = FetchedFields::new();
    for (name, value) in fields {
        let bytes = match value {
            Value::String(s) => s.as_bytes().to_vec(),
            other => serde_json::to_vec(other)
                .map_err(|e| ProviderError::Malformed(format!("field {name}: {e}")))?,
        };
        fetched.insert(name.clone(), bytes);
    }
    Ok(fetched)
}
