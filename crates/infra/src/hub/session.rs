//! Websocket client sessions
//!
//! One duplex socket per client. The protocol is server-push only: the
//! write loop owns the socket's sink and services the outbound event queue
//! plus a periodic ping; the read loop drains and discards inbound frames,
//! existing to surface closure and to keep the pong-extended read deadline
//! honest. Either loop failing tears the whole session down and
//! unregisters it from the hub.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use meetings_core::UserAccount;
use meetings_domain::{EventSnapshot, FanoutKey, SessionConfig};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::{timeout, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{Hub, SessionHandle};
use crate::redact::redact_email;

/// Terminal session conditions.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no pong within the read deadline")]
    PingTimeout,
    #[error("write deadline missed")]
    WriteTimeout,
    #[error("socket error: {0}")]
    Socket(String),
}

/// Drives one upgraded websocket until it closes.
pub struct ClientSession;

impl ClientSession {
    /// Register with the hub and run the read and write loops until either
    /// fails, the peer closes, or the hub cancels the session.
    pub async fn run(
        socket: WebSocket,
        account: UserAccount,
        calendar: String,
        hub: Hub,
        config: SessionConfig,
    ) {
        let key = FanoutKey::new(&account.email, calendar);
        let (handle, queue) = SessionHandle::new(key.clone(), config.queue_capacity);

        if hub.register(handle.clone(), account.access_token).await.is_err() {
            // Hub loop gone; dropping the socket closes the connection.
            return;
        }

        let (sink, stream) = socket.split();
        let cancel = handle.cancel_token();

        let outcome = tokio::select! {
            result = write_loop(sink, queue, &config, cancel.clone()) => result,
            result = read_loop(stream, &config) => result,
        };

        match outcome {
            Ok(()) => debug!(session = %handle.id(), "session closed"),
            Err(e) => info!(
                session = %handle.id(),
                user = %redact_email(&key.email),
                reason = %e,
                "session closing"
            ),
        }

        handle.close();
        let _ = hub.unregister(handle.id()).await;
    }
}

/// Sole writer on the socket. Every write carries a deadline; missing it
/// closes the session.
async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut queue: mpsc::Receiver<EventSnapshot>,
    config: &SessionConfig,
    cancel: CancellationToken,
) -> Result<(), SessionError> {
    let mut ping = tokio::time::interval(config.ping_interval());
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ping.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                // Best-effort close frame; the peer may already be gone.
                let _ = timeout(config.write_wait(), sink.send(Message::Close(None))).await;
                return Ok(());
            }
            _ = ping.tick() => {
                write_with_deadline(&mut sink, Message::Ping(Vec::new()), config).await?;
            }
            next = queue.recv() => match next {
                None => return Ok(()),
                Some(event) => {
                    let payload = serde_json::to_string(&event)
                        .map_err(|e| SessionError::Socket(e.to_string()))?;
                    write_with_deadline(&mut sink, Message::Text(payload), config).await?;
                }
            },
        }
    }
}

async fn write_with_deadline(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    match timeout(config.write_wait(), sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SessionError::Socket(e.to_string())),
        Err(_) => Err(SessionError::WriteTimeout),
    }
}

/// Drains inbound frames. Payloads are discarded, but pongs extend the
/// read deadline; a silent client times out here.
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    config: &SessionConfig,
) -> Result<(), SessionError> {
    let mut deadline = Instant::now() + config.pong_wait();
    loop {
        match timeout_at(deadline, stream.next()).await {
            Err(_) => return Err(SessionError::PingTimeout),
            Ok(None) => return Ok(()),
            Ok(Some(Err(e))) => return Err(SessionError::Socket(e.to_string())),
            Ok(Some(Ok(Message::Pong(_)))) => {
                deadline = Instant::now() + config.pong_wait();
            }
            Ok(Some(Ok(Message::Close(_)))) => return Ok(()),
            Ok(Some(Ok(_))) => {}
        }
    }
}
