//! Google Calendar integration
//!
//! Wire-level client for the three provider operations the service needs:
//! creating a push channel, stopping a channel, and listing events with
//! sync-token deltas.

mod client;
pub(crate) mod wire;

pub use client::GoogleCalendarApi;
