//! Calendar provider port interfaces

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meetings_domain::{EventSnapshot, Result};

/// Provider-side state of a freshly created push channel.
#[derive(Debug, Clone)]
pub struct WatchedChannel {
    pub channel_id: String,
    pub resource_id: String,
    pub expiration: DateTime<Utc>,
}

/// Result of one delta fetch: ordered snapshots to apply plus the cursor
/// for the next call.
#[derive(Debug, Clone, Default)]
pub struct EventDelta {
    pub events: Vec<EventSnapshot>,
    pub next_sync_token: Option<String>,
}

/// Operations the service needs from the calendar provider.
#[async_trait]
pub trait CalendarApi: Send + Sync {
    /// Create a push channel delivering to `address`. The channel id is
    /// chosen by the caller and must be fresh per creation.
    async fn watch(
        &self,
        access_token: &str,
        calendar: &str,
        channel_id: &str,
        address: &str,
    ) -> Result<WatchedChannel>;

    /// Ask the provider to stop delivering to a channel.
    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()>;

    /// With a sync token, return only changes since that token; without
    /// one, return all events with a start in `[now, until)`. The returned
    /// snapshots are ordered and must be applied in sequence.
    ///
    /// A provider signal that the token is no longer valid surfaces as
    /// [`meetings_domain::MeetingsError::TokenExpired`]; the caller blanks
    /// its token and retries as a full fetch.
    async fn fetch_delta(
        &self,
        access_token: &str,
        calendar: &str,
        until: DateTime<Utc>,
        sync_token: Option<&str>,
    ) -> Result<EventDelta>;
}
