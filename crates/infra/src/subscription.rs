//! Managed push subscription
//!
//! Keeps one provider push channel alive for a single (user, calendar)
//! pair. Channels expire on a provider-chosen schedule, so a renewal task
//! recreates the channel at expiration while the output stream identity is
//! preserved; callers never re-subscribe. A periodic safety tick issues a
//! self-directed sync push so staleness stays bounded even when upstream
//! pushes are lost.
//!
//! All state lives behind one lock and every transition out of `Running`
//! cancels the renewal and safety tasks of the current channel generation.

use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use meetings_core::{CalendarApi, EventDelta, WatchedChannel};
use meetings_domain::{
    EventSnapshot, MeetingsError, PushNotice, Result, SubscriptionConfig,
};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Stopping,
}

struct ChannelState {
    channel_id: String,
    resource_id: String,
}

struct SubState {
    phase: Phase,
    channel: Option<ChannelState>,
    sync_token: Option<String>,
    output: Option<mpsc::Sender<EventSnapshot>>,
    /// Cancels the renewal and safety tasks of the current generation.
    tasks: CancellationToken,
}

/// One managed provider push channel with an event snapshot output stream.
pub struct ManagedSubscription {
    api: Arc<dyn CalendarApi>,
    access_token: String,
    calendar: String,
    /// Receive endpoint the provider posts to; embeds the fan-out key.
    address: String,
    config: SubscriptionConfig,
    state: Mutex<SubState>,
    /// Handed to the renewal and safety tasks; a dropped subscription stops
    /// spawning work.
    weak_self: Weak<Self>,
}

impl ManagedSubscription {
    pub fn new(
        api: Arc<dyn CalendarApi>,
        access_token: impl Into<String>,
        calendar: impl Into<String>,
        address: impl Into<String>,
        config: SubscriptionConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            api,
            access_token: access_token.into(),
            calendar: calendar.into(),
            address: address.into(),
            config,
            state: Mutex::new(SubState {
                phase: Phase::Idle,
                channel: None,
                sync_token: None,
                output: None,
                tasks: CancellationToken::new(),
            }),
            weak_self: weak_self.clone(),
        })
    }

    /// Obtain a provider channel and return the event output stream.
    ///
    /// Fails with `SubscribeFailed` when the provider rejects the request
    /// or the subscription is already running.
    pub async fn start(&self) -> Result<mpsc::Receiver<EventSnapshot>> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Idle {
            return Err(MeetingsError::SubscribeFailed(
                "subscription already running".into(),
            ));
        }

        let channel = self.create_channel().await?;
        info!(
            channel_id = %channel.channel_id,
            expires = %channel.expiration,
            url = %self.address,
            "started push channel"
        );

        let (tx, rx) = mpsc::channel(self.config.stream_capacity);
        let tasks = CancellationToken::new();

        state.phase = Phase::Running;
        state.channel = Some(ChannelState {
            channel_id: channel.channel_id,
            resource_id: channel.resource_id,
        });
        state.sync_token = None;
        state.output = Some(tx);
        state.tasks = tasks.clone();
        drop(state);

        self.spawn_renewal(channel.expiration, tasks.clone());
        self.spawn_safety_tick(tasks);

        Ok(rx)
    }

    /// Cancel renewal, request provider teardown, close the output stream.
    ///
    /// Provider teardown failures are logged; only a second call errors,
    /// with `AlreadyStopped`.
    pub async fn stop(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Running {
            return Err(MeetingsError::AlreadyStopped);
        }

        state.phase = Phase::Stopping;
        state.tasks.cancel();

        if let Some(channel) = state.channel.take() {
            match self.stop_provider_channel(&channel).await {
                Ok(()) => info!(channel_id = %channel.channel_id, "stopped push channel"),
                Err(e) => warn!(
                    channel_id = %channel.channel_id,
                    error = %e,
                    "provider teardown failed"
                ),
            }
        }

        state.output = None;
        state.sync_token = None;
        state.phase = Phase::Idle;
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.phase == Phase::Running
    }

    /// Apply one push notice: reject strays, honor sync resets, then pull
    /// the delta and emit the resulting snapshots on the output stream.
    ///
    /// Delta failures are swallowed after logging; the stored token is kept
    /// so the next push or safety tick retries.
    pub async fn handle_push(&self, notice: PushNotice) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Running {
            return Err(MeetingsError::Internal(
                "push received while subscription is stopped".into(),
            ));
        }

        let owns_channel = state
            .channel
            .as_ref()
            .is_some_and(|c| c.channel_id == notice.channel_id);
        if !owns_channel {
            drop(state);
            self.close_stray_channel(&notice).await;
            return Ok(());
        }

        if notice.is_sync() {
            state.sync_token = None;
        }

        let until = Utc::now() + self.config.lookahead();
        let delta = match self.fetch(until, state.sync_token.as_deref()).await {
            Ok(delta) => delta,
            Err(MeetingsError::TokenExpired) => {
                warn!(calendar = %self.calendar, "sync token expired, refetching full range");
                state.sync_token = None;
                match self.fetch(until, None).await {
                    Ok(delta) => delta,
                    Err(e) => {
                        warn!(error = %e, "unable to retrieve events delta");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "unable to retrieve events delta");
                return Ok(());
            }
        };

        if let Some(token) = delta.next_sync_token {
            state.sync_token = Some(token);
        } else {
            debug!("provider returned no sync token, keeping the current one");
        }

        let Some(output) = state.output.clone() else {
            return Ok(());
        };
        for event in delta.events {
            if output.send(event).await.is_err() {
                warn!("event stream consumer went away mid-delta");
                break;
            }
        }
        Ok(())
    }

    async fn create_channel(&self) -> Result<WatchedChannel> {
        let channel_id = Uuid::new_v4().to_string();
        let watch = timeout(
            self.config.provider_timeout(),
            self.api
                .watch(&self.access_token, &self.calendar, &channel_id, &self.address),
        )
        .await
        .map_err(|_| MeetingsError::SubscribeFailed("provider watch timed out".into()))?
        .map_err(|e| MeetingsError::SubscribeFailed(e.to_string()))?;
        Ok(watch)
    }

    async fn stop_provider_channel(&self, channel: &ChannelState) -> Result<()> {
        timeout(
            self.config.provider_timeout(),
            self.api
                .stop_channel(&self.access_token, &channel.channel_id, &channel.resource_id),
        )
        .await
        .map_err(|_| MeetingsError::Network("provider stop timed out".into()))?
    }

    /// A push whose channel id is not ours belongs to a previous
    /// incarnation; ask the provider to stop it, then drop the notice.
    async fn close_stray_channel(&self, notice: &PushNotice) {
        warn!(channel = %notice.channel_id, "push from a channel we do not own");
        let stop = timeout(
            self.config.provider_timeout(),
            self.api
                .stop_channel(&self.access_token, &notice.channel_id, &notice.resource_id),
        )
        .await;
        match stop {
            Ok(Ok(())) => info!(channel = %notice.channel_id, "closed lingering channel"),
            Ok(Err(e)) => warn!(channel = %notice.channel_id, error = %e, "could not close lingering channel"),
            Err(_) => warn!(channel = %notice.channel_id, "timed out closing lingering channel"),
        }
    }

    async fn fetch(&self, until: DateTime<Utc>, sync_token: Option<&str>) -> Result<EventDelta> {
        timeout(
            self.config.provider_timeout(),
            self.api
                .fetch_delta(&self.access_token, &self.calendar, until, sync_token),
        )
        .await
        .map_err(|_| MeetingsError::Network("delta fetch timed out".into()))?
    }

    /// Recreate the channel at expiration, keeping the output stream.
    fn spawn_renewal(&self, first_expiration: DateTime<Utc>, cancel: CancellationToken) {
        let Some(sub) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let mut expiration = first_expiration;
            loop {
                let wait = (expiration - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("renewal task cancelled");
                        return;
                    }
                    _ = tokio::time::sleep(wait) => {}
                }
                match sub.renew().await {
                    Ok(next_expiration) => expiration = next_expiration,
                    Err(e) => {
                        error!(error = %e, "channel renewal failed, closing subscription");
                        sub.fail().await;
                        return;
                    }
                }
            }
        });
    }

    async fn renew(&self) -> Result<DateTime<Utc>> {
        let mut state = self.state.lock().await;
        if state.phase != Phase::Running {
            return Err(MeetingsError::AlreadyStopped);
        }

        if let Some(old) = state.channel.take() {
            if let Err(e) = self.stop_provider_channel(&old).await {
                warn!(
                    channel_id = %old.channel_id,
                    error = %e,
                    "could not stop expiring channel"
                );
            }
        }

        let channel = self.create_channel().await?;
        info!(
            channel_id = %channel.channel_id,
            expires = %channel.expiration,
            "renewed push channel"
        );
        let expiration = channel.expiration;
        state.channel = Some(ChannelState {
            channel_id: channel.channel_id,
            resource_id: channel.resource_id,
        });
        Ok(expiration)
    }

    /// Renewal failure: the stream closes, which the hub treats as fatal.
    async fn fail(&self) {
        let mut state = self.state.lock().await;
        state.tasks.cancel();
        state.phase = Phase::Idle;
        state.channel = None;
        state.sync_token = None;
        state.output = None;
    }

    /// Self-directed sync push against the current channel; forces a full
    /// refresh even when no upstream pushes arrive.
    fn spawn_safety_tick(&self, cancel: CancellationToken) {
        let Some(sub) = self.weak_self.upgrade() else {
            return;
        };
        let period = self.config.safety_sync_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // interval fires immediately; the first refresh is the caller's
            // initial fetch, so skip it.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let notice = {
                    let state = sub.state.lock().await;
                    match (&state.phase, &state.channel) {
                        (Phase::Running, Some(channel)) => PushNotice::sync_for_channel(
                            channel.channel_id.clone(),
                            channel.resource_id.clone(),
                        ),
                        _ => return,
                    }
                };
                debug!(calendar = %sub.calendar, "issuing safety sync");
                if let Err(e) = sub.handle_push(notice).await {
                    debug!(error = %e, "safety sync skipped");
                }
            }
        });
    }
}
