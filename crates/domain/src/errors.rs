//! Error types used throughout the application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the meetings service
#[derive(Error, Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "message")]
pub enum MeetingsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("Subscription already stopped")]
    AlreadyStopped,

    #[error("Sync token expired")]
    TokenExpired,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for meetings operations
pub type Result<T> = std::result::Result<T, MeetingsError>;
