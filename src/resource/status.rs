//! Lifecycle states and the provider status classifier
//!
//! Cinder and Glance/Nova report free-form status strings. They are folded
//! into five canonical states by a single table so full records and
//! status-only listings never disagree on the same input.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical convergence status of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    /// Still converging (also the fallback for unknown statuses)
    #[default]
    Pending,
    Available,
    Active,
    Error,
    Deleted,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Available => "AVAILABLE",
            Self::Active => "ACTIVE",
            Self::Error => "ERROR",
            Self::Deleted => "DELETED",
        }
    }

    /// States an asynchronous operation can settle in
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Known provider statuses (lower-case)
const STATUS_TABLE: &[(&str, LifecycleState)] = &[
    ("available", LifecycleState::Available),
    ("in-use", LifecycleState::Available),
    ("active", LifecycleState::Active),
    ("creating", LifecycleState::Pending),
    ("attaching", LifecycleState::Pending),
    ("detaching", LifecycleState::Pending),
    ("saving", LifecycleState::Pending),
    ("queued", LifecycleState::Pending),
    ("preparing", LifecycleState::Pending),
    ("importing", LifecycleState::Pending),
    ("uploading", LifecycleState::Pending),
    ("downloading", LifecycleState::Pending),
    ("deleting", LifecycleState::Pending),
    ("backing-up", LifecycleState::Pending),
    ("restoring-backup", LifecycleState::Pending),
    ("extending", LifecycleState::Pending),
    ("retyping", LifecycleState::Pending),
    ("maintenance", LifecycleState::Pending),
    ("build", LifecycleState::Pending),
    ("error", LifecycleState::Error),
    ("error_deleting", LifecycleState::Error),
    ("error_restoring", LifecycleState::Error),
    ("error_extending", LifecycleState::Error),
    ("failed", LifecycleState::Error),
    ("deleted", LifecycleState::Deleted),
    ("killed", LifecycleState::Deleted),
];

/// Look up a status without the unknown-status fallback
pub fn lookup(raw_status: &str) -> Option<LifecycleState> {
    let status = raw_status.trim().to_lowercase();
    STATUS_TABLE
        .iter()
        .find(|(known, _)| *known == status)
        .map(|(_, state)| *state)
}

/// Classify a provider status string.
///
/// Total: an unrecognized status logs a warning and yields `Pending`.
pub fn classify(raw_status: &str) -> LifecycleState {
    lookup(raw_status).unwrap_or_else(|| {
        tracing::warn!("Unknown provider status: {}", raw_status);
        LifecycleState::Pending
    })
}

/// Lightweight `(id, state)` pair returned by status-only listings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceStatus {
    pub id: String,
    pub state: LifecycleState,
}

impl ResourceStatus {
    pub fn new(id: impl Into<String>, state: LifecycleState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_statuses() {
        assert_eq!(classify("available"), LifecycleState::Available);
        assert_eq!(classify("in-use"), LifecycleState::Available);
        assert_eq!(classify("ACTIVE"), LifecycleState::Active);
        assert_eq!(classify("creating"), LifecycleState::Pending);
        assert_eq!(classify("Attaching"), LifecycleState::Pending);
        assert_eq!(classify("error"), LifecycleState::Error);
        assert_eq!(classify("killed"), LifecycleState::Deleted);
        assert_eq!(classify("deleted"), LifecycleState::Deleted);
    }

    #[test]
    fn test_unknown_status_is_pending() {
        assert_eq!(classify("reticulating"), LifecycleState::Pending);
        assert_eq!(classify(""), LifecycleState::Pending);
        assert_eq!(lookup("reticulating"), None);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!LifecycleState::Pending.is_terminal());
        assert!(LifecycleState::Deleted.is_terminal());
        assert!(LifecycleState::Error.is_terminal());
    }

    #[test]
    fn test_state_serializes_upper_case() {
        let json = serde_json::to_string(&LifecycleState::Available).unwrap();
        assert_eq!(json, "\"AVAILABLE\"");
    }
}
