//! Shared test support: a scriptable in-memory calendar provider.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use meetings_core::{CalendarApi, EventDelta, WatchedChannel};
use meetings_domain::{EventSnapshot, EventStatus, MeetingsError, Result};

/// One recorded provider call.
#[derive(Debug, Clone, PartialEq)]
pub enum ApiCall {
    Watch { calendar: String, channel_id: String, address: String },
    StopChannel { channel_id: String, resource_id: String },
    FetchDelta { calendar: String, sync_token: Option<String> },
}

/// Hand-rolled [`CalendarApi`] double: records every call and replays
/// scripted delta results.
pub struct MockCalendarApi {
    calls: Mutex<Vec<ApiCall>>,
    fetch_results: Mutex<VecDeque<Result<EventDelta>>>,
    default_delta: Mutex<EventDelta>,
    fail_next_watch: AtomicBool,
    watch_counter: AtomicUsize,
    /// How long a created channel lives before the provider expires it.
    channel_ttl: chrono::Duration,
}

impl MockCalendarApi {
    pub fn new() -> Self {
        Self::with_channel_ttl(chrono::Duration::hours(1))
    }

    pub fn with_channel_ttl(channel_ttl: chrono::Duration) -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            fetch_results: Mutex::new(VecDeque::new()),
            default_delta: Mutex::new(EventDelta::default()),
            fail_next_watch: AtomicBool::new(false),
            watch_counter: AtomicUsize::new(0),
            channel_ttl,
        }
    }

    pub fn fail_next_watch(&self) {
        self.fail_next_watch.store(true, Ordering::SeqCst);
    }

    /// Queue one fetch result; once the queue drains, the default delta is
    /// served.
    pub fn push_fetch_result(&self, result: Result<EventDelta>) {
        self.fetch_results.lock().unwrap().push_back(result);
    }

    pub fn set_default_delta(&self, delta: EventDelta) {
        *self.default_delta.lock().unwrap() = delta;
    }

    pub fn calls(&self) -> Vec<ApiCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn watch_calls(&self) -> Vec<ApiCall> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, ApiCall::Watch { .. }))
            .collect()
    }

    pub fn stopped_channels(&self) -> Vec<(String, String)> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::StopChannel { channel_id, resource_id } => Some((channel_id, resource_id)),
                _ => None,
            })
            .collect()
    }

    pub fn fetch_tokens(&self) -> Vec<Option<String>> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ApiCall::FetchDelta { sync_token, .. } => Some(sync_token),
                _ => None,
            })
            .collect()
    }

    /// Channel id of the most recent watch call.
    pub fn current_channel_id(&self) -> Option<String> {
        self.watch_calls().into_iter().rev().find_map(|c| match c {
            ApiCall::Watch { channel_id, .. } => Some(channel_id),
            _ => None,
        })
    }
}

#[async_trait]
impl CalendarApi for MockCalendarApi {
    async fn watch(
        &self,
        _access_token: &str,
        calendar: &str,
        channel_id: &str,
        address: &str,
    ) -> Result<WatchedChannel> {
        self.calls.lock().unwrap().push(ApiCall::Watch {
            calendar: calendar.to_string(),
            channel_id: channel_id.to_string(),
            address: address.to_string(),
        });
        if self.fail_next_watch.swap(false, Ordering::SeqCst) {
            return Err(MeetingsError::Network("provider rejected watch".into()));
        }
        let n = self.watch_counter.fetch_add(1, Ordering::SeqCst);
        Ok(WatchedChannel {
            channel_id: channel_id.to_string(),
            resource_id: format!("res-{n}"),
            expiration: Utc::now() + self.channel_ttl,
        })
    }

    async fn stop_channel(
        &self,
        _access_token: &str,
        channel_id: &str,
        resource_id: &str,
    ) -> Result<()> {
        self.calls.lock().unwrap().push(ApiCall::StopChannel {
            channel_id: channel_id.to_string(),
            resource_id: resource_id.to_string(),
        });
        Ok(())
    }

    async fn fetch_delta(
        &self,
        _access_token: &str,
        calendar: &str,
        _until: DateTime<Utc>,
        sync_token: Option<&str>,
    ) -> Result<EventDelta> {
        self.calls.lock().unwrap().push(ApiCall::FetchDelta {
            calendar: calendar.to_string(),
            sync_token: sync_token.map(str::to_string),
        });
        if let Some(result) = self.fetch_results.lock().unwrap().pop_front() {
            return result;
        }
        Ok(self.default_delta.lock().unwrap().clone())
    }
}

/// Snapshot with start/end relative to now, in seconds.
pub fn snapshot(id: &str, start_in_secs: i64, end_in_secs: i64) -> EventSnapshot {
    let now = Utc::now();
    EventSnapshot {
        id: id.to_string(),
        status: EventStatus::Confirmed,
        start: Some(now + chrono::Duration::seconds(start_in_secs)),
        end: Some(now + chrono::Duration::seconds(end_in_secs)),
        summary: Some(format!("meeting {id}")),
        extra: serde_json::Map::new(),
    }
}

pub fn delta(events: Vec<EventSnapshot>, next_sync_token: Option<&str>) -> EventDelta {
    EventDelta { events, next_sync_token: next_sync_token.map(str::to_string) }
}
