//! # Provider Modules
//!
//! Readers for external secret stores.
//!
//! A provider resolves a store location plus a path into the raw field values
//! stored there. It never writes to the store.

use async_trait::async_trait;
use std::collections::BTreeMap;

pub mod vault;

pub use vault::VaultKvProvider;

/// Raw field values keyed by source field name
pub type FetchedFields = BTreeMap<String, Vec<u8>>;

/// Provider trait for external secret stores
#[async_trait]
pub trait SecretProvider: Send + Sync {
    /// Fetch all fields stored at `source_path` in the store at `store_location`
    async fn fetch(
        &self,
        store_location: &str,
        source_path: &str,
    ) -> Result<FetchedFields, ProviderError>;
}

/// Failure reading from an external secret store
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Credentials were refused
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Nothing is stored at the requested path
    #[error("not found: {0}")]
    NotFound(String),
    /// Store unreachable, throttling, or failing server-side
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// Response could not be decoded into fields
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl ProviderError {
    /// Only transient failures are retried with backoff. The rest wait out the
    /// rejected cooldown.
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        matches!(self, ProviderError::Unavailable(_))
    }

    /// Condition reason recorded on the source object
    #[must_use]
    pub fn reason(&self) -> &'static str {
        match self {
            ProviderError::Unauthorized(_) => "ProviderUnauthorized",
            ProviderError::NotFound(_) => "SourceNotFound",
            ProviderError::Unavailable(_) => "ProviderUnavailable",
            ProviderError::Malformed(_) => "SourceMalformed",
        }
    }
}
