//! Integration tests for the Google Calendar wire client
//!
//! **Infrastructure:** WireMock HTTP server simulating the calendar API.

use std::time::Duration;

use chrono::Utc;
use meetings_core::CalendarApi;
use meetings_domain::MeetingsError;
use meetings_infra::GoogleCalendarApi;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param, query_param_is_missing};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer) -> GoogleCalendarApi {
    GoogleCalendarApi::with_base_url(server.uri(), Duration::from_secs(5)).expect("client builds")
}

fn until() -> chrono::DateTime<Utc> {
    Utc::now() + chrono::Duration::days(14)
}

#[tokio::test]
async fn full_range_fetch_sends_a_time_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("singleEvents", "true"))
        .and(query_param("maxResults", "2500"))
        .and(query_param_is_missing("syncToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "id": "e1",
                    "status": "confirmed",
                    "summary": "standup",
                    "start": {"dateTime": "2026-08-02T12:05:00Z"},
                    "end": {"dateTime": "2026-08-02T12:30:00Z"}
                }
            ],
            "nextSyncToken": "tok-1"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delta = client(&server).fetch_delta("t", "primary", until(), None).await.unwrap();

    assert_eq!(delta.events.len(), 1);
    assert_eq!(delta.events[0].id, "e1");
    assert_eq!(delta.events[0].summary.as_deref(), Some("standup"));
    assert_eq!(delta.next_sync_token.as_deref(), Some("tok-1"));
}

#[tokio::test]
async fn token_fetch_presents_the_sync_token_instead_of_a_window() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("syncToken", "tok-1"))
        .and(query_param_is_missing("timeMin"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [],
            "nextSyncToken": "tok-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delta = client(&server)
        .fetch_delta("t", "primary", until(), Some("tok-1"))
        .await
        .unwrap();

    assert!(delta.events.is_empty());
    assert_eq!(delta.next_sync_token.as_deref(), Some("tok-2"));
}

#[tokio::test]
async fn paginated_results_are_flattened() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "e1",
                "start": {"dateTime": "2026-08-02T12:00:00Z"},
                "end": {"dateTime": "2026-08-02T13:00:00Z"}
            }],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [{
                "id": "e2",
                "start": {"dateTime": "2026-08-03T12:00:00Z"},
                "end": {"dateTime": "2026-08-03T13:00:00Z"}
            }],
            "nextSyncToken": "tok-after-pages"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let delta = client(&server).fetch_delta("t", "primary", until(), None).await.unwrap();

    let ids: Vec<_> = delta.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2"]);
    assert_eq!(delta.next_sync_token.as_deref(), Some("tok-after-pages"));
}

#[tokio::test]
async fn gone_maps_to_token_expired() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch_delta("t", "primary", until(), Some("stale"))
        .await
        .unwrap_err();
    assert!(matches!(err, MeetingsError::TokenExpired));
}

#[tokio::test]
async fn malformed_items_are_skipped_not_fatal() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/calendars/primary/events"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {
                    "id": "bad",
                    "start": {"dateTime": "not a timestamp"},
                    "end": {"dateTime": "2026-08-02T13:00:00Z"}
                },
                {
                    "id": "good",
                    "start": {"dateTime": "2026-08-02T12:00:00Z"},
                    "end": {"dateTime": "2026-08-02T13:00:00Z"}
                }
            ]
        })))
        .mount(&server)
        .await;

    let delta = client(&server).fetch_delta("t", "primary", until(), None).await.unwrap();
    let ids: Vec<_> = delta.events.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["good"]);
}

#[tokio::test]
async fn watch_creates_a_web_hook_channel() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events/watch"))
        .and(body_json(json!({
            "id": "chan-1",
            "type": "web_hook",
            "address": "https://meetings.example/push/u@x.com_primary"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "resourceId": "res-1",
            "expiration": "1754130000000"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let channel = client(&server)
        .watch("t", "primary", "chan-1", "https://meetings.example/push/u@x.com_primary")
        .await
        .unwrap();

    assert_eq!(channel.channel_id, "chan-1");
    assert_eq!(channel.resource_id, "res-1");
    assert_eq!(channel.expiration.timestamp_millis(), 1_754_130_000_000);
}

#[tokio::test]
async fn watch_rejection_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/calendars/primary/events/watch"))
        .respond_with(ResponseTemplate::new(403).set_body_string("push not allowed"))
        .mount(&server)
        .await;

    let err = client(&server)
        .watch("t", "primary", "chan-1", "https://meetings.example/push/k")
        .await
        .unwrap_err();
    assert!(matches!(err, MeetingsError::Network(_)));
}

#[tokio::test]
async fn stop_posts_both_channel_ids() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/channels/stop"))
        .and(body_json(json!({"id": "chan-1", "resourceId": "res-1"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client(&server).stop_channel("t", "chan-1", "res-1").await.unwrap();
}
