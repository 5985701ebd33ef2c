//! # Meetings Core
//!
//! Runtime-facing business logic with no infrastructure dependencies.
//!
//! This crate contains:
//! - Port interfaces (traits) the infrastructure layer implements
//! - The starting-soon scheduler
//!
//! ## Architecture Principles
//! - Only depends on `meetings-domain`
//! - No HTTP or socket code; all external calls go through traits

pub mod auth_ports;
pub mod calendar_ports;
pub mod scheduler;

pub use auth_ports::{TokenStore, UserAccount};
pub use calendar_ports::{CalendarApi, EventDelta, WatchedChannel};
pub use scheduler::{SchedulerConfig, StartingSoonScheduler};
