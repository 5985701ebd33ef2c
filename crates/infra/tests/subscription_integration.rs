//! Integration tests for the managed push subscription
//!
//! Covers the channel lifecycle against a scripted provider double: start
//! and teardown, sync-token threading across pushes, stray-channel
//! rejection, token expiry recovery, and renewal at channel expiration.

#![allow(dead_code)]

#[path = "support.rs"]
mod support;

use std::sync::Arc;
use std::time::Duration;

use meetings_domain::{MeetingsError, PushNotice, SubscriptionConfig};
use meetings_infra::ManagedSubscription;
use support::{delta, snapshot, ApiCall, MockCalendarApi};
use tokio::time::timeout;

const ADDRESS: &str = "https://meetings.example/push/u@x.com_primary";

fn test_config() -> SubscriptionConfig {
    SubscriptionConfig {
        // Keep the safety tick out of these tests' way.
        safety_sync_interval_seconds: 3600,
        lookahead_days: 14,
        provider_timeout_seconds: 5,
        stream_capacity: 100,
    }
}

fn subscription(api: &Arc<MockCalendarApi>) -> Arc<ManagedSubscription> {
    ManagedSubscription::new(
        Arc::clone(api) as Arc<dyn meetings_core::CalendarApi>,
        "provider-token",
        "primary",
        ADDRESS,
        test_config(),
    )
}

fn push_for(api: &MockCalendarApi) -> PushNotice {
    PushNotice {
        channel_id: api.current_channel_id().expect("a channel was created"),
        resource_id: "res-0".into(),
        resource_state: "exists".into(),
        message_number: Some("1".into()),
        channel_expiration: None,
        resource_uri: None,
        token: None,
    }
}

#[tokio::test]
async fn start_creates_a_channel_and_opens_the_stream() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);

    let _stream = sub.start().await.expect("start succeeds");

    assert!(sub.is_running().await);
    let watches = api.watch_calls();
    assert_eq!(watches.len(), 1);
    match &watches[0] {
        ApiCall::Watch { calendar, address, channel_id } => {
            assert_eq!(calendar, "primary");
            assert_eq!(address, ADDRESS);
            assert!(!channel_id.is_empty());
        }
        other => panic!("unexpected call: {other:?}"),
    }
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);

    let _stream = sub.start().await.expect("first start");
    let err = sub.start().await.expect_err("second start fails");
    assert!(matches!(err, MeetingsError::SubscribeFailed(_)));
}

#[tokio::test]
async fn provider_rejection_surfaces_as_subscribe_failed() {
    let api = Arc::new(MockCalendarApi::new());
    api.fail_next_watch();
    let sub = subscription(&api);

    let err = sub.start().await.expect_err("start fails");
    assert!(matches!(err, MeetingsError::SubscribeFailed(_)));
    assert!(!sub.is_running().await);
}

#[tokio::test]
async fn pushes_thread_the_sync_token_through_fetches() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let mut stream = sub.start().await.unwrap();

    api.push_fetch_result(Ok(delta(vec![snapshot("e1", 300, 1800)], Some("tok-1"))));
    sub.handle_push(push_for(&api)).await.unwrap();

    let event = timeout(Duration::from_secs(1), stream.recv())
        .await
        .expect("event forwarded")
        .expect("stream open");
    assert_eq!(event.id, "e1");

    api.push_fetch_result(Ok(delta(vec![snapshot("e2", 600, 2400)], Some("tok-2"))));
    sub.handle_push(push_for(&api)).await.unwrap();
    let event = timeout(Duration::from_secs(1), stream.recv()).await.unwrap().unwrap();
    assert_eq!(event.id, "e2");

    // First fetch is a full range, the second presents the token.
    assert_eq!(api.fetch_tokens(), vec![None, Some("tok-1".into())]);
}

#[tokio::test]
async fn sync_push_clears_the_stored_token() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let _stream = sub.start().await.unwrap();

    api.push_fetch_result(Ok(delta(vec![], Some("tok-1"))));
    sub.handle_push(push_for(&api)).await.unwrap();

    let mut sync = push_for(&api);
    sync.resource_state = "sync".into();
    sub.handle_push(sync).await.unwrap();

    // The sync push forgot the token and fetched the full range again.
    assert_eq!(api.fetch_tokens(), vec![None, None]);
}

#[tokio::test]
async fn stray_channel_is_stopped_and_its_push_discarded() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let mut stream = sub.start().await.unwrap();

    let stray = PushNotice {
        channel_id: "zzz".into(),
        resource_id: "rzzz".into(),
        resource_state: "exists".into(),
        message_number: None,
        channel_expiration: None,
        resource_uri: None,
        token: None,
    };
    sub.handle_push(stray).await.unwrap();

    assert_eq!(api.stopped_channels(), vec![("zzz".into(), "rzzz".into())]);
    // No delta fetch and nothing on the stream.
    assert!(api.fetch_tokens().is_empty());
    assert!(timeout(Duration::from_millis(200), stream.recv()).await.is_err());
}

#[tokio::test]
async fn expired_token_triggers_a_full_refetch_in_the_same_handler() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let mut stream = sub.start().await.unwrap();

    api.push_fetch_result(Ok(delta(vec![], Some("tok-1"))));
    sub.handle_push(push_for(&api)).await.unwrap();

    api.push_fetch_result(Err(MeetingsError::TokenExpired));
    api.push_fetch_result(Ok(delta(vec![snapshot("e1", 300, 1800)], Some("tok-2"))));
    sub.handle_push(push_for(&api)).await.unwrap();

    let event = timeout(Duration::from_secs(1), stream.recv()).await.unwrap().unwrap();
    assert_eq!(event.id, "e1");
    assert_eq!(
        api.fetch_tokens(),
        vec![None, Some("tok-1".into()), None],
        "expired token fetch is retried without a token"
    );
}

#[tokio::test]
async fn transient_delta_failure_keeps_the_token() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let _stream = sub.start().await.unwrap();

    api.push_fetch_result(Ok(delta(vec![], Some("tok-1"))));
    sub.handle_push(push_for(&api)).await.unwrap();

    api.push_fetch_result(Err(MeetingsError::Network("flaky".into())));
    sub.handle_push(push_for(&api)).await.unwrap();

    sub.handle_push(push_for(&api)).await.unwrap();

    // The failed fetch and the retry both presented the retained token.
    assert_eq!(
        api.fetch_tokens(),
        vec![None, Some("tok-1".into()), Some("tok-1".into())]
    );
}

#[tokio::test]
async fn stop_tears_down_and_closes_the_stream() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let mut stream = sub.start().await.unwrap();
    let channel_id = api.current_channel_id().unwrap();

    sub.stop().await.expect("stop succeeds");

    assert!(!sub.is_running().await);
    assert_eq!(api.stopped_channels(), vec![(channel_id, "res-0".into())]);
    assert!(
        timeout(Duration::from_secs(1), stream.recv()).await.unwrap().is_none(),
        "stream closes on stop"
    );

    let err = sub.stop().await.expect_err("second stop fails");
    assert!(matches!(err, MeetingsError::AlreadyStopped));
}

#[tokio::test]
async fn push_after_stop_is_an_error() {
    let api = Arc::new(MockCalendarApi::new());
    let sub = subscription(&api);
    let _stream = sub.start().await.unwrap();
    let notice = push_for(&api);
    sub.stop().await.unwrap();

    assert!(sub.handle_push(notice).await.is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn channel_is_renewed_at_expiration_without_resubscribing() {
    let api = Arc::new(MockCalendarApi::with_channel_ttl(chrono::Duration::milliseconds(150)));
    let sub = subscription(&api);
    let mut stream = sub.start().await.unwrap();
    let first_channel = api.current_channel_id().unwrap();

    tokio::time::sleep(Duration::from_millis(500)).await;

    let watches = api.watch_calls();
    assert!(watches.len() >= 2, "expected a renewal, saw {} watch calls", watches.len());
    assert!(
        api.stopped_channels().iter().any(|(id, _)| *id == first_channel),
        "the expiring channel was stopped"
    );
    assert!(sub.is_running().await);

    // The stream survived the renewal: a push on the current channel flows.
    // A renewal may land between reading the channel id and the push, which
    // makes that push a stray; strays do not consume the queued delta, so
    // retrying is safe.
    api.push_fetch_result(Ok(delta(vec![snapshot("e1", 300, 1800)], Some("tok"))));
    let mut delivered = None;
    for _ in 0..5 {
        sub.handle_push(push_for(&api)).await.unwrap();
        if let Ok(Some(event)) = timeout(Duration::from_millis(300), stream.recv()).await {
            delivered = Some(event);
            break;
        }
    }
    assert_eq!(delivered.expect("push delivered after renewal").id, "e1");
}
