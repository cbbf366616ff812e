//! # VaultSecret Status
//!
//! Status types for tracking the sync phase and conditions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The only condition type the controller maintains
pub const SECRET_SYNCHRONIZED_CONDITION: &str = "SecretSynchronized";

/// Status of the VaultSecret resource
///
/// Written only by the controller. `phase` is kept as the raw persisted string
/// so that values written by other actors can be detected instead of coerced.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Default, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultSecretStatus {
    /// Sync phase: Pending, InSync, Stale or Error. Empty means not yet observed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// Conditions, at most one per type, ordered by type
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

impl VaultSecretStatus {
    /// Parse the persisted phase
    pub fn sync_phase(&self) -> Result<SyncPhase, UnknownPhase> {
        SyncPhase::parse(self.phase.as_deref())
    }

    /// Look up a condition by type
    #[must_use]
    pub fn condition(&self, type_: &str) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.type_ == type_)
    }
}

/// Phase of the sync state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncPhase {
    /// No phase persisted yet
    Empty,
    Pending,
    InSync,
    Stale,
    Error,
}

/// A persisted phase outside the recognized set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown phase '{0}'")]
pub struct UnknownPhase(pub String);

impl SyncPhase {
    /// Parse a persisted phase value. `None` and `""` both mean `Empty`.
    pub fn parse(value: Option<&str>) -> Result<Self, UnknownPhase> {
        match value {
            None | Some("") => Ok(SyncPhase::Empty),
            Some("Pending") => Ok(SyncPhase::Pending),
            Some("InSync") => Ok(SyncPhase::InSync),
            Some("Stale") => Ok(SyncPhase::Stale),
            Some("Error") => Ok(SyncPhase::Error),
            Some(other) => Err(UnknownPhase(other.to_string())),
        }
    }

    /// Value persisted in `status.phase`; `None` for `Empty`
    #[must_use]
    pub fn as_persisted(&self) -> Option<&'static str> {
        match self {
            SyncPhase::Empty => None,
            SyncPhase::Pending => Some("Pending"),
            SyncPhase::InSync => Some("InSync"),
            SyncPhase::Stale => Some("Stale"),
            SyncPhase::Error => Some("Error"),
        }
    }
}

impl fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_persisted().unwrap_or("Empty"))
    }
}

/// Status of a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

/// Condition represents a named boolean fact about the resource
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    #[serde(rename = "type")]
    pub type_: String,
    /// Status of the condition
    pub status: ConditionStatus,
    /// Machine-readable reason
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Last time `status` or `reason` changed (RFC3339)
    pub last_transition_time: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_recognized_phases() {
        assert_eq!(SyncPhase::parse(None), Ok(SyncPhase::Empty));
        assert_eq!(SyncPhase::parse(Some("")), Ok(SyncPhase::Empty));
        assert_eq!(SyncPhase::parse(Some("Pending")), Ok(SyncPhase::Pending));
        assert_eq!(SyncPhase::parse(Some("InSync")), Ok(SyncPhase::InSync));
        assert_eq!(SyncPhase::parse(Some("Stale")), Ok(SyncPhase::Stale));
        assert_eq!(SyncPhase::parse(Some("Error")), Ok(SyncPhase::Error));
    }

    #[test]
    fn test_parse_rejects_unrecognized_phase() {
        assert_eq!(
            SyncPhase::parse(Some("Synchronizing")),
            Err(UnknownPhase("Synchronizing".to_string()))
        );
        // Case matters
        assert!(SyncPhase::parse(Some("insync")).is_err());
    }

    #[test]
    fn test_empty_phase_is_not_persisted() {
        assert_eq!(SyncPhase::Empty.as_persisted(), None);
        assert_eq!(SyncPhase::InSync.as_persisted(), Some("InSync"));
    }

    #[test]
    fn test_condition_serializes_kubernetes_shape() {
        let condition = Condition {
            type_: SECRET_SYNCHRONIZED_CONDITION.to_string(),
            status: ConditionStatus::False,
            reason: "ProviderUnavailable".to_string(),
            message: "vault sealed".to_string(),
            last_transition_time: "2026-01-01T00:00:00+00:00".to_string(),
        };
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "SecretSynchronized");
        assert_eq!(json["status"], "False");
        assert_eq!(json["lastTransitionTime"], "2026-01-01T00:00:00+00:00");
    }

    #[test]
    fn test_status_without_phase_omits_field() {
        let json = serde_json::to_value(VaultSecretStatus::default()).unwrap();
        assert!(json.get("phase").is_none());
        assert_eq!(json["conditions"], serde_json::json!([]));
    }
}
