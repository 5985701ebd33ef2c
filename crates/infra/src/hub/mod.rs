//! Fan-out hub
//!
//! Central index keyed by [`FanoutKey`], mapping to one managed
//! subscription plus the set of client sessions attached to it. All index
//! mutation happens on a single serialized loop; register, unregister and
//! push routing are commands applied in arrival order. Provider calls never
//! run inline on the loop, they are spawned and report back through the
//! same command channel.
//!
//! Each subscription's output stream is drained by one forwarder task that
//! hands every snapshot back to the loop, which distributes it to the
//! current client set with non-blocking sends. A slow client is closed
//! rather than allowed to stall the others.

pub mod error;
pub mod session;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meetings_core::CalendarApi;
use meetings_domain::{Config, EventSnapshot, FanoutKey, MeetingsError, PushNotice};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::redact::redact_email;
use crate::subscription::ManagedSubscription;

pub use error::{HubError, HubResult};
pub use session::ClientSession;

const COMMAND_QUEUE_CAPACITY: usize = 64;

/// Non-blocking send outcome for a session queue.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("client outbound queue full")]
    TooSlow,
    #[error("client queue closed")]
    Closed,
}

/// Hub-facing view of one client session: its id, key, bounded outbound
/// queue and cancellation handle. The socket itself stays with the session
/// task; the hub never owns it.
#[derive(Clone)]
pub struct SessionHandle {
    id: Uuid,
    key: FanoutKey,
    outbound: mpsc::Sender<EventSnapshot>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Create a handle plus the receiving half of its outbound queue.
    pub fn new(key: FanoutKey, queue_capacity: usize) -> (Self, mpsc::Receiver<EventSnapshot>) {
        let (outbound, queue) = mpsc::channel(queue_capacity);
        let handle = Self {
            id: Uuid::new_v4(),
            key,
            outbound,
            cancel: CancellationToken::new(),
        };
        (handle, queue)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &FanoutKey {
        &self.key
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Enqueue without blocking. A full queue means the client is too slow
    /// and must be closed by the caller.
    pub fn send(&self, event: EventSnapshot) -> std::result::Result<(), SendError> {
        self.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendError::TooSlow,
            mpsc::error::TrySendError::Closed(_) => SendError::Closed,
        })
    }

    /// Idempotent; wakes the session task so it tears down and unregisters.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

enum HubCommand {
    Register { session: SessionHandle, access_token: String },
    Unregister { session_id: Uuid },
    Route { key: FanoutKey, notice: PushNotice },
    Fanout { key: FanoutKey, event: EventSnapshot },
    StreamClosed { key: FanoutKey },
}

/// Cloneable handle onto the hub loop.
#[derive(Clone)]
pub struct Hub {
    tx: mpsc::Sender<HubCommand>,
}

impl Hub {
    /// Spawn the hub loop. Cancelling `shutdown` stops every subscription
    /// and closes every session.
    pub fn spawn(
        api: Arc<dyn CalendarApi>,
        config: Arc<Config>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(COMMAND_QUEUE_CAPACITY);
        let hub = Self { tx };
        let loop_hub = hub.clone();
        tokio::spawn(async move {
            HubLoop::new(api, config, loop_hub).run(rx, shutdown).await;
        });
        hub
    }

    /// Attach a session; the first session for a key creates and starts the
    /// key's subscription, and every new session gets an independent
    /// backfill of upcoming events.
    pub async fn register(&self, session: SessionHandle, access_token: String) -> HubResult<()> {
        self.send(HubCommand::Register { session, access_token }).await
    }

    pub async fn unregister(&self, session_id: Uuid) -> HubResult<()> {
        self.send(HubCommand::Unregister { session_id }).await
    }

    /// Deliver a provider push to the subscription owning `key`. Unknown
    /// keys are discarded; the HTTP boundary has already acked them.
    pub async fn route(&self, key: FanoutKey, notice: PushNotice) -> HubResult<()> {
        self.send(HubCommand::Route { key, notice }).await
    }

    async fn send(&self, command: HubCommand) -> HubResult<()> {
        self.tx.send(command).await.map_err(|_| HubError::LoopGone)
    }
}

struct Entry {
    subscription: Arc<ManagedSubscription>,
    clients: HashMap<Uuid, SessionHandle>,
}

struct HubLoop {
    api: Arc<dyn CalendarApi>,
    config: Arc<Config>,
    hub: Hub,
    index: HashMap<FanoutKey, Entry>,
}

impl HubLoop {
    fn new(api: Arc<dyn CalendarApi>, config: Arc<Config>, hub: Hub) -> Self {
        Self { api, config, hub, index: HashMap::new() }
    }

    async fn run(mut self, mut rx: mpsc::Receiver<HubCommand>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                command = rx.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }
        self.teardown().await;
    }

    async fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { session, access_token } => {
                self.register(session, access_token);
                self.log_counters();
            }
            HubCommand::Unregister { session_id } => {
                self.unregister(session_id);
                self.log_counters();
            }
            HubCommand::Route { key, notice } => self.route(key, notice),
            HubCommand::Fanout { key, event } => self.fanout(key, event),
            HubCommand::StreamClosed { key } => self.stream_closed(key).await,
        }
    }

    fn register(&mut self, session: SessionHandle, access_token: String) {
        let key = session.key().clone();
        info!(
            session = %session.id(),
            user = %redact_email(&key.email),
            calendar = %key.calendar,
            "registering new client"
        );

        // First client for this key: install the subscription and hand its
        // stream to a forwarder. Later clients reuse it.
        if !self.index.contains_key(&key) {
            let address = format!(
                "{}/{}/{}",
                self.config.server.host_url.trim_end_matches('/'),
                self.config.server.push_prefix,
                key.suffix()
            );
            let subscription = ManagedSubscription::new(
                Arc::clone(&self.api),
                access_token.clone(),
                key.calendar.clone(),
                address,
                self.config.subscription.clone(),
            );
            spawn_forwarder(Arc::clone(&subscription), key.clone(), self.hub.clone());
            self.index.insert(key.clone(), Entry { subscription, clients: HashMap::new() });
        }

        self.spawn_backfill(&session, access_token);
        if let Some(entry) = self.index.get_mut(&key) {
            entry.clients.insert(session.id(), session);
        }
    }

    /// Bounded initial fetch onto the new session only; shared state is not
    /// touched, so a failing backfill affects one client.
    fn spawn_backfill(&self, session: &SessionHandle, access_token: String) {
        let api = Arc::clone(&self.api);
        let session = session.clone();
        let calendar = session.key().calendar.clone();
        let lookahead = self.config.subscription.lookahead();
        tokio::spawn(async move {
            let until = Utc::now() + lookahead;
            match api.fetch_delta(&access_token, &calendar, until, None).await {
                Ok(delta) => {
                    debug!(session = %session.id(), events = delta.events.len(), "backfilling new client");
                    for event in delta.events {
                        match session.send(event) {
                            Ok(()) => {}
                            Err(SendError::TooSlow) => {
                                warn!(session = %session.id(), "client too slow during backfill, closing");
                                session.close();
                                break;
                            }
                            Err(SendError::Closed) => break,
                        }
                    }
                }
                Err(e) => {
                    error!(session = %session.id(), error = %e, "error backfilling new client");
                }
            }
        });
    }

    fn unregister(&mut self, session_id: Uuid) {
        let found = self.index.iter_mut().find_map(|(key, entry)| {
            entry.clients.remove(&session_id).map(|handle| (key.clone(), handle))
        });

        let Some((key, handle)) = found else {
            debug!(session = %session_id, "unregister for a session we do not know");
            return;
        };

        handle.close();
        info!(
            session = %session_id,
            user = %redact_email(&key.email),
            calendar = %key.calendar,
            "unregistered client"
        );

        let now_empty = self.index.get(&key).is_some_and(|entry| entry.clients.is_empty());
        if now_empty {
            if let Some(entry) = self.index.remove(&key) {
                let subscription = entry.subscription;
                tokio::spawn(async move {
                    match subscription.stop().await {
                        Ok(()) | Err(MeetingsError::AlreadyStopped) => {}
                        Err(e) => warn!(error = %e, "failed to stop idle subscription"),
                    }
                });
            }
        }
    }

    fn route(&mut self, key: FanoutKey, notice: PushNotice) {
        match self.index.get(&key) {
            Some(entry) => {
                let subscription = Arc::clone(&entry.subscription);
                tokio::spawn(async move {
                    if let Err(e) = subscription.handle_push(notice).await {
                        warn!(error = %e, "push handling failed");
                    }
                });
            }
            None => {
                // Defunct channel; stray-channel policy rejects any later
                // delivery once a subscription owns this key again.
                debug!(
                    user = %redact_email(&key.email),
                    calendar = %key.calendar,
                    "push for an unknown key, discarding"
                );
            }
        }
    }

    fn fanout(&mut self, key: FanoutKey, event: EventSnapshot) {
        let Some(entry) = self.index.get(&key) else {
            return;
        };
        for handle in entry.clients.values() {
            match handle.send(event.clone()) {
                Ok(()) => {}
                Err(SendError::TooSlow) => {
                    warn!(session = %handle.id(), "client too slow, closing");
                    handle.close();
                }
                Err(SendError::Closed) => {}
            }
        }
    }

    /// The subscription's stream ended: renewal failure, lost
    /// authorization, or a stop we issued ourselves. Attached sessions are
    /// closed so their clients can reconnect.
    async fn stream_closed(&mut self, key: FanoutKey) {
        let Some(entry) = self.index.remove(&key) else {
            return;
        };
        warn!(
            user = %redact_email(&key.email),
            calendar = %key.calendar,
            clients = entry.clients.len(),
            "subscription stream closed, dropping attached clients"
        );
        for handle in entry.clients.values() {
            handle.close();
        }
        let subscription = entry.subscription;
        tokio::spawn(async move {
            if subscription.is_running().await {
                if let Err(e) = subscription.stop().await {
                    debug!(error = %e, "stop after stream close");
                }
            }
        });
    }

    async fn teardown(&mut self) {
        info!(channels = self.index.len(), "hub shutting down");
        // The loop is no longer draining forwarder traffic here, so every
        // stop gets its own deadline instead of waiting on a wedged push.
        let stop_deadline = self.config.subscription.provider_timeout()
            + Duration::from_secs(5);
        for (_, entry) in self.index.drain() {
            for handle in entry.clients.values() {
                handle.close();
            }
            match tokio::time::timeout(stop_deadline, entry.subscription.stop()).await {
                Ok(Ok(())) | Ok(Err(MeetingsError::AlreadyStopped)) => {}
                Ok(Err(e)) => warn!(error = %e, "failed to stop subscription during shutdown"),
                Err(_) => warn!("timed out stopping a subscription during shutdown"),
            }
        }
    }

    fn log_counters(&self) {
        let clients: usize = self.index.values().map(|e| e.clients.len()).sum();
        debug!(channels = self.index.len(), clients, "hub counters");
    }
}

/// One forwarder per subscription: starts it, then tees its stream back
/// into the hub loop so fan-out happens against the current client set.
fn spawn_forwarder(subscription: Arc<ManagedSubscription>, key: FanoutKey, hub: Hub) {
    tokio::spawn(async move {
        match subscription.start().await {
            Ok(mut stream) => {
                while let Some(event) = stream.recv().await {
                    if hub.send(HubCommand::Fanout { key: key.clone(), event }).await.is_err() {
                        return;
                    }
                }
                let _ = hub.send(HubCommand::StreamClosed { key }).await;
            }
            Err(e) => {
                error!(
                    user = %redact_email(&key.email),
                    calendar = %key.calendar,
                    error = %e,
                    "error starting subscription for client"
                );
                let _ = hub.send(HubCommand::StreamClosed { key }).await;
            }
        }
    });
}
