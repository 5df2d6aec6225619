//! Shared types, error definitions, and constants for the Beacon platform.
//!
//! This crate provides the foundational types used across all Beacon crates:
//! incident categories, the status state machine, broadcast event kinds, and
//! field-level validation errors (via `thiserror`/`serde`).
//!
//! No crate in the workspace depends on anything *except* `beacon-types` for
//! cross-cutting type definitions. This keeps the dependency graph clean and
//! prevents circular dependencies.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The channel on which committed incident events are broadcast.
pub const INCIDENTS_CHANNEL: &str = "incidents";

/// Maximum length for a channel name, in bytes.
pub const MAX_CHANNEL_NAME_LEN: usize = 128;

/// Incident categories accepted by the reporting API.
///
/// Wire labels are lowercase (`"flood"`, `"fire"`, ...), matching the
/// category values submitted by report forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    Flood,
    Fire,
    Earthquake,
    Medical,
    Other,
}

impl IncidentType {
    /// Returns the lowercase wire/storage label for this category.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flood => "flood",
            Self::Fire => "fire",
            Self::Earthquake => "earthquake",
            Self::Medical => "medical",
            Self::Other => "other",
        }
    }

    /// All known categories, in display order.
    pub fn all() -> &'static [IncidentType] {
        &[
            Self::Flood,
            Self::Fire,
            Self::Earthquake,
            Self::Medical,
            Self::Other,
        ]
    }
}

impl fmt::Display for IncidentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentType {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "flood" => Ok(Self::Flood),
            "fire" => Ok(Self::Fire),
            "earthquake" => Ok(Self::Earthquake),
            "medical" => Ok(Self::Medical),
            "other" => Ok(Self::Other),
            _ => Err(UnknownLabel {
                what: "incident type",
                label: s.to_string(),
            }),
        }
    }
}

/// Lifecycle status of an incident.
///
/// Transitions move strictly forward: `pending -> in_progress -> resolved`,
/// with `pending -> resolved` permitted for incidents resolved directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Pending,
    InProgress,
    Resolved,
}

impl IncidentStatus {
    /// Returns the snake_case wire/storage label for this status.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
        }
    }

    /// Whether the state machine permits moving from `self` to `next`.
    ///
    /// Same-status "transitions" are rejected: a repeated update carries no
    /// information and usually signals a double-submitted request.
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Resolved)
                | (Self::InProgress, Self::Resolved)
        )
    }

    /// All known statuses, in lifecycle order.
    pub fn all() -> &'static [IncidentStatus] {
        &[Self::Pending, Self::InProgress, Self::Resolved]
    }
}

impl fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IncidentStatus {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            _ => Err(UnknownLabel {
                what: "incident status",
                label: s.to_string(),
            }),
        }
    }
}

/// Kinds of broadcast events derived from committed incidents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "incident.reported")]
    IncidentReported,
    #[serde(rename = "incident.status_changed")]
    IncidentStatusChanged,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::IncidentReported => "incident.reported",
            Self::IncidentStatusChanged => "incident.status_changed",
        }
    }
}

/// Error returned when a wire label does not name a known enum variant.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown {what}: {label:?}")]
pub struct UnknownLabel {
    /// What kind of label failed to parse ("incident type", "incident status").
    pub what: &'static str,
    /// The offending input.
    pub label: String,
}

/// A single field-level validation failure, safe to return to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Name of the offending payload field.
    pub field: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validates a subscription channel name.
///
/// Channel names are created implicitly on first subscribe, so this is the
/// only gate against garbage names accumulating in the registry.
pub fn validate_channel_name(name: &str) -> Result<(), FieldError> {
    if name.is_empty() {
        return Err(FieldError::new("channel", "channel name must not be empty"));
    }
    if name.len() > MAX_CHANNEL_NAME_LEN {
        return Err(FieldError::new(
            "channel",
            format!(
                "channel name exceeds maximum length of {} bytes",
                MAX_CHANNEL_NAME_LEN
            ),
        ));
    }
    if name.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return Err(FieldError::new(
            "channel",
            "channel name must not contain whitespace or control characters",
        ));
    }
    Ok(())
}
