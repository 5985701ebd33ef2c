//! Calendar event snapshots
//!
//! An [`EventSnapshot`] is one immutable version of a calendar entry as
//! returned by a list call. Later snapshots with the same id supersede
//! earlier ones by arrival order; nothing here is ever mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Confirmed,
    Tentative,
    Cancelled,
}

impl EventStatus {
    /// Map the provider's wire string. Unknown values are treated as
    /// confirmed so a new provider status never drops events silently.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "tentative" => Self::Tentative,
            "cancelled" => Self::Cancelled,
            _ => Self::Confirmed,
        }
    }
}

impl Default for EventStatus {
    fn default() -> Self {
        Self::Confirmed
    }
}

/// One immutable snapshot of a calendar event.
///
/// Cancelled snapshots may carry no timestamps at all; they are identified
/// by status alone. Provider fields the service does not interpret are
/// preserved in `extra` for downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSnapshot {
    pub id: String,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventSnapshot {
    pub fn is_cancelled(&self) -> bool {
        self.status == EventStatus::Cancelled
    }

    /// True when the event's end lies at or before `now`.
    pub fn has_ended(&self, now: DateTime<Utc>) -> bool {
        matches!(self.end, Some(end) if end <= now)
    }
}
