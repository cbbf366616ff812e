//! # Validation
//!
//! Checks a VaultSecret spec before anything is fetched from the store.

use crate::crd::VaultSecretSpec;
use regex::Regex;
use std::sync::LazyLock;

/// Secret data keys: alphanumerics, `-`, `_` and `.`
static SECRET_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-._a-zA-Z0-9]+$").expect("secret key regex is valid"));

const MAX_SECRET_KEY_LEN: usize = 253;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Validate a VaultSecret spec
///
/// Returns the first violation found.
pub fn validate_spec(spec: &VaultSecretSpec) -> Result<(), ValidationError> {
    validate_store_location(&spec.store_location)?;

    if spec.source_path.trim().trim_matches('/').is_empty() {
        return Err(ValidationError::new("sourcePath", "cannot be empty"));
    }

    if spec.field_mappings.is_empty() {
        return Err(ValidationError::new(
            "fieldMappings",
            "must contain at least one entry",
        ));
    }

    for (destination, source_field) in &spec.field_mappings {
        validate_secret_key(destination)?;
        if source_field.trim().is_empty() {
            return Err(ValidationError::new(
                format!("fieldMappings.{destination}"),
                "source field name cannot be empty",
            ));
        }
    }

    Ok(())
}

/// Store location must be an absolute http(s) URL with a host
fn validate_store_location(location: &str) -> Result<(), ValidationError> {
    let trimmed = location.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::new("storeLocation", "cannot be empty"));
    }

    let rest = trimmed
        .strip_prefix("https://")
        .or_else(|| trimmed.strip_prefix("http://"))
        .ok_or_else(|| {
            ValidationError::new(
                "storeLocation",
                format!("'{trimmed}' must start with http:// or https://"),
            )
        })?;

    let host = rest.split('/').next().unwrap_or_default();
    if host.is_empty() || host.contains(char::is_whitespace) {
        return Err(ValidationError::new(
            "storeLocation",
            format!("'{trimmed}' has no valid host"),
        ));
    }

    Ok(())
}

fn validate_secret_key(key: &str) -> Result<(), ValidationError> {
    let field = format!("fieldMappings.{key}");
    if key.is_empty() {
        return Err(ValidationError::new("fieldMappings", "destination key cannot be empty"));
    }
    if key.len() > MAX_SECRET_KEY_LEN {
        return Err(ValidationError::new(
            field,
            format!(
                "exceeds maximum length of {MAX_SECRET_KEY_LEN} characters (got {})",
                key.len()
            ),
        ));
    }
    if key == "." || key == ".." {
        return Err(ValidationError::new(field, "'.' and '..' are not valid secret keys"));
    }
    if !SECRET_KEY_REGEX.is_match(key) {
        return Err(ValidationError::new(
            field,
            "must consist of alphanumeric characters, '-', '_' or '.'",
        ));
    }
    Ok(())
}
