//! Fan-out keys
//!
//! A [`FanoutKey`] is the `(user email, calendar name)` pair that identifies
//! one upstream subscription and its attached client set. Its wire form is
//! the push URL suffix `<email>_<calendar>`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::MeetingsError;

/// Identifies one subscription and its client set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FanoutKey {
    pub email: String,
    pub calendar: String,
}

impl FanoutKey {
    /// Emails are matched case-insensitively, so the key stores them
    /// lowercased and trimmed.
    pub fn new(email: impl AsRef<str>, calendar: impl Into<String>) -> Self {
        Self {
            email: email.as_ref().trim().to_ascii_lowercase(),
            calendar: calendar.into(),
        }
    }

    /// The push URL suffix for this key.
    pub fn suffix(&self) -> String {
        format!("{}_{}", self.email, self.calendar)
    }

    /// Parse a push URL suffix.
    ///
    /// The suffix is composed as `email + "_" + calendar`, so the split is
    /// at the first underscore. An email containing an underscore cannot
    /// round-trip; pushes for such a key never match an owned channel and
    /// are handled by the stray-channel policy.
    pub fn parse_suffix(suffix: &str) -> Result<Self, MeetingsError> {
        match suffix.split_once('_') {
            Some((email, calendar)) if !email.is_empty() && !calendar.is_empty() => {
                Ok(Self::new(email, calendar))
            }
            _ => Err(MeetingsError::InvalidInput(format!(
                "malformed push suffix: {suffix}"
            ))),
        }
    }
}

impl fmt::Display for FanoutKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.email, self.calendar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suffix_round_trips() {
        let key = FanoutKey::new("user@example.com", "primary");
        let parsed = FanoutKey::parse_suffix(&key.suffix()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn email_is_normalized() {
        let key = FanoutKey::new("  User@Example.COM ", "primary");
        assert_eq!(key.email, "user@example.com");
    }

    #[test]
    fn calendar_names_keep_underscores() {
        let parsed = FanoutKey::parse_suffix("u@x.com_team_standups").unwrap();
        assert_eq!(parsed.email, "u@x.com");
        assert_eq!(parsed.calendar, "team_standups");
    }

    #[test]
    fn malformed_suffixes_are_rejected() {
        assert!(FanoutKey::parse_suffix("no-separator").is_err());
        assert!(FanoutKey::parse_suffix("_primary").is_err());
        assert!(FanoutKey::parse_suffix("u@x.com_").is_err());
    }
}
