//! Token store port
//!
//! The registration flow and the persistent token store live outside this
//! service; the core only needs read access to authenticate an upgrade
//! request and to obtain the provider credentials of the resulting account.

use async_trait::async_trait;
use meetings_domain::Result;

/// A registered user as seen by the core.
#[derive(Debug, Clone)]
pub struct UserAccount {
    pub email: String,
    /// Bearer token for provider API calls made on this user's behalf.
    pub access_token: String,
}

/// Read-only view of the external token store.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Authenticate `email` with the service token handed out at
    /// registration.
    ///
    /// Errors with [`meetings_domain::MeetingsError::NotFound`] for an
    /// unknown user and [`meetings_domain::MeetingsError::Auth`] for a
    /// token mismatch.
    async fn authenticate(&self, email: &str, api_token: &str) -> Result<UserAccount>;
}
