//! Static token store
//!
//! Read-only stand-in for the external token store. Accounts are loaded
//! once (from a JSON file or handed in directly) and matched by lowercased
//! email plus exact service-token equality. The registration flow that
//! produces these records lives outside this service.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use meetings_core::{TokenStore, UserAccount};
use meetings_domain::{MeetingsError, Result};
use serde::Deserialize;
use tracing::info;

/// One registered account as persisted by the external store.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountRecord {
    pub email: String,
    /// Service token handed to the user at registration.
    pub api_token: String,
    /// Provider bearer token for this user's calendars.
    pub access_token: String,
}

/// In-memory [`TokenStore`] implementation.
pub struct StaticTokenStore {
    accounts: HashMap<String, AccountRecord>,
}

impl StaticTokenStore {
    pub fn new(records: Vec<AccountRecord>) -> Self {
        let accounts = records
            .into_iter()
            .map(|r| (r.email.trim().to_ascii_lowercase(), r))
            .collect();
        Self { accounts }
    }

    pub fn empty() -> Self {
        Self { accounts: HashMap::new() }
    }

    /// Load accounts from a JSON array of records.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            MeetingsError::Config(format!(
                "failed to read accounts file {}: {e}",
                path.as_ref().display()
            ))
        })?;
        let records: Vec<AccountRecord> = serde_json::from_str(&raw)
            .map_err(|e| MeetingsError::Config(format!("invalid accounts file: {e}")))?;

        info!(accounts = records.len(), "loaded account records");
        Ok(Self::new(records))
    }
}

#[async_trait]
impl TokenStore for StaticTokenStore {
    async fn authenticate(&self, email: &str, api_token: &str) -> Result<UserAccount> {
        let normalized = email.trim().to_ascii_lowercase();
        let record = self
            .accounts
            .get(&normalized)
            .ok_or_else(|| MeetingsError::NotFound(format!("unknown user: {normalized}")))?;

        if record.api_token != api_token {
            return Err(MeetingsError::Auth("token invalid for user".into()));
        }

        Ok(UserAccount {
            email: normalized,
            access_token: record.access_token.clone(),
        })
    }
}
