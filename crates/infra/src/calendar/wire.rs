//! Google Calendar wire types

use chrono::{DateTime, Utc};
use meetings_domain::{EventSnapshot, EventStatus, MeetingsError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
pub(crate) struct WatchRequest<'a> {
    pub id: &'a str,
    #[serde(rename = "type")]
    pub kind: &'a str,
    pub address: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WatchResponse {
    #[serde(rename = "resourceId")]
    pub resource_id: String,
    /// Epoch milliseconds, encoded as a string.
    pub expiration: Option<String>,
}

impl WatchResponse {
    pub fn expiration_time(&self) -> Result<DateTime<Utc>> {
        let raw = self
            .expiration
            .as_deref()
            .ok_or_else(|| MeetingsError::InvalidInput("watch response missing expiration".into()))?;
        let millis: i64 = raw.parse().map_err(|_| {
            MeetingsError::InvalidInput(format!("invalid channel expiration: {raw}"))
        })?;
        DateTime::<Utc>::from_timestamp_millis(millis)
            .ok_or_else(|| MeetingsError::InvalidInput(format!("invalid channel expiration: {raw}")))
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StopRequest<'a> {
    pub id: &'a str,
    #[serde(rename = "resourceId")]
    pub resource_id: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventsPage {
    #[serde(default)]
    pub items: Vec<WireEvent>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "nextSyncToken")]
    pub next_sync_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireEvent {
    pub id: String,
    pub status: Option<String>,
    pub summary: Option<String>,
    pub start: Option<WireTime>,
    pub end: Option<WireTime>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireTime {
    #[serde(rename = "dateTime")]
    pub date_time: Option<String>,
    pub date: Option<String>,
}

impl WireEvent {
    pub fn into_snapshot(self) -> Result<EventSnapshot> {
        let status = self.status.as_deref().map(EventStatus::from_wire).unwrap_or_default();
        let start = self.start.map(|t| t.parse("start")).transpose()?;
        let end = self.end.map(|t| t.parse("end")).transpose()?;

        Ok(EventSnapshot {
            id: self.id,
            status,
            start,
            end,
            summary: self.summary.filter(|s| !s.trim().is_empty()),
            extra: self.extra,
        })
    }
}

impl WireTime {
    /// Timed events carry `dateTime`; all-day events carry a bare `date`
    /// which maps to midnight UTC.
    fn parse(self, field: &str) -> Result<DateTime<Utc>> {
        if let Some(value) = self.date_time {
            return parse_event_timestamp(&value, field);
        }
        if let Some(value) = self.date {
            let date = chrono::NaiveDate::parse_from_str(&value, "%Y-%m-%d").map_err(|e| {
                MeetingsError::InvalidInput(format!("invalid all-day {field} date '{value}': {e}"))
            })?;
            let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                MeetingsError::InvalidInput(format!("invalid all-day {field} date '{value}'"))
            })?;
            return Ok(midnight.and_utc());
        }
        Err(MeetingsError::InvalidInput(format!("event {field} carries no usable time")))
    }
}

fn parse_event_timestamp(value: &str, field: &str) -> Result<DateTime<Utc>> {
    let trimmed = value.trim();
    let has_explicit_timezone = trimmed.ends_with('Z')
        || trimmed
            .rfind('T')
            .is_some_and(|idx| trimmed[idx + 1..].chars().any(|c| matches!(c, '+' | '-')));

    let candidate = if has_explicit_timezone { trimmed.to_string() } else { format!("{trimmed}Z") };

    DateTime::parse_from_rfc3339(&candidate)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| MeetingsError::InvalidInput(format!("invalid {field} timestamp '{value}': {e}")))
}
