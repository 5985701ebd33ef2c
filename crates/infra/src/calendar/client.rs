//! Google Calendar API client

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use meetings_core::{CalendarApi, EventDelta, WatchedChannel};
use meetings_domain::{MeetingsError, Result};
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::wire::{EventsPage, StopRequest, WatchRequest, WatchResponse};
use crate::errors::InfraError;

const GOOGLE_CALENDAR_API_BASE: &str = "https://www.googleapis.com/calendar/v3";

/// Maximum events per list page, matching the provider's limit.
const MAX_RESULTS: &str = "2500";

/// Google Calendar implementation of [`CalendarApi`].
#[derive(Clone)]
pub struct GoogleCalendarApi {
    http: reqwest::Client,
    base_url: String,
}

impl GoogleCalendarApi {
    pub fn new(timeout: Duration) -> Result<Self> {
        Self::with_base_url(GOOGLE_CALENDAR_API_BASE, timeout)
    }

    /// Point the client at a different API base; used by tests.
    pub fn with_base_url(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeetingsError::Internal(format!("failed to build http client: {e}")))?;
        Ok(Self { http, base_url: base_url.into() })
    }

    async fn error_from_response(response: reqwest::Response) -> MeetingsError {
        let status = response.status();
        let body = response.text().await.unwrap_or_else(|_| "unknown error".to_string());
        MeetingsError::Network(format!("Google API error ({status}): {body}"))
    }
}

#[async_trait]
impl CalendarApi for GoogleCalendarApi {
    async fn watch(
        &self,
        access_token: &str,
        calendar: &str,
        channel_id: &str,
        address: &str,
    ) -> Result<WatchedChannel> {
        let url = format!("{}/calendars/{}/events/watch", self.base_url, calendar);
        let body = WatchRequest { id: channel_id, kind: "web_hook", address };

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(InfraError::from)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let watch: WatchResponse = response.json().await.map_err(InfraError::from)?;
        let expiration = watch.expiration_time()?;

        debug!(calendar, channel_id, %expiration, "created push channel");

        Ok(WatchedChannel {
            channel_id: channel_id.to_string(),
            resource_id: watch.resource_id,
            expiration,
        })
    }

    async fn stop_channel(
        &self,
        access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()> {
        let url = format!("{}/channels/stop", self.base_url);
        let body = StopRequest { id: channel_id, resource_id };

        let response = self
            .http
            .post(&url)
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await
            .map_err(InfraError::from)?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        debug!(channel_id, "stopped push channel");
        Ok(())
    }

    async fn fetch_delta(
        &self,
        access_token: &str,
        calendar: &str,
        until: DateTime<Utc>,
        sync_token: Option<&str>,
    ) -> Result<EventDelta> {
        let url = format!("{}/calendars/{}/events", self.base_url, calendar);

        let mut base_params: Vec<(&str, String)> = vec![
            ("maxResults", MAX_RESULTS.to_string()),
            // Expands recurrences so every occurrence is a distinct id.
            ("singleEvents", "true".to_string()),
        ];
        match sync_token {
            Some(token) => base_params.push(("syncToken", token.to_string())),
            None => {
                let now = Utc::now();
                base_params.push(("timeMin", now.to_rfc3339_opts(SecondsFormat::Secs, true)));
                base_params.push(("timeMax", until.to_rfc3339_opts(SecondsFormat::Secs, true)));
            }
        }

        let mut events = Vec::new();
        let mut next_sync_token: Option<String> = None;
        let mut page_cursor: Option<String> = None;

        loop {
            let mut params = base_params.clone();
            if let Some(ref cursor) = page_cursor {
                params.push(("pageToken", cursor.clone()));
            }

            let response = self
                .http
                .get(&url)
                .bearer_auth(access_token)
                .query(&params)
                .send()
                .await
                .map_err(InfraError::from)?;

            if response.status() == StatusCode::GONE {
                return Err(MeetingsError::TokenExpired);
            }
            if !response.status().is_success() {
                return Err(Self::error_from_response(response).await);
            }

            let page: EventsPage = response.json().await.map_err(InfraError::from)?;
            next_sync_token = page.next_sync_token.or(next_sync_token);
            page_cursor = page.next_page_token;

            for item in page.items {
                match item.into_snapshot() {
                    Ok(snapshot) => events.push(snapshot),
                    Err(e) => {
                        // One unparsable record must not sink the delta.
                        warn!(error = %e, "skipping malformed provider event");
                    }
                }
            }

            if page_cursor.is_none() {
                break;
            }
        }

        debug!(calendar, events = events.len(), "fetched events delta");

        Ok(EventDelta { events, next_sync_token })
    }
}
