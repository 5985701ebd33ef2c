//! Provider push notices
//!
//! A [`PushNotice`] is the parsed form of the headers the calendar provider
//! sends to the push endpoint when a watched calendar changes.

use chrono::{DateTime, Utc};

/// Resource state value that forces a sync-token reset.
pub const RESOURCE_STATE_SYNC: &str = "sync";

/// Parsed push notification from the calendar provider.
#[derive(Debug, Clone)]
pub struct PushNotice {
    /// Identifies the channel the push belongs to.
    pub channel_id: String,
    /// Provider-side resource id, needed to stop a stray channel.
    pub resource_id: String,
    /// `sync` resets the stored sync token; anything else triggers a delta
    /// fetch.
    pub resource_state: String,
    /// Monotonic per channel; advisory only.
    pub message_number: Option<String>,
    pub channel_expiration: Option<DateTime<Utc>>,
    pub resource_uri: Option<String>,
    pub token: Option<String>,
}

impl PushNotice {
    /// Synthesize the self-directed sync push used by the safety tick.
    pub fn sync_for_channel(channel_id: impl Into<String>, resource_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            resource_id: resource_id.into(),
            resource_state: RESOURCE_STATE_SYNC.to_string(),
            message_number: Some("1".to_string()),
            channel_expiration: None,
            resource_uri: None,
            token: None,
        }
    }

    pub fn is_sync(&self) -> bool {
        self.resource_state == RESOURCE_STATE_SYNC
    }
}
