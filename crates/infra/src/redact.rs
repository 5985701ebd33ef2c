//! Log-field redaction helpers

use sha2::{Digest, Sha256};

const EMAIL_HASH_SALT: &[u8] = b"meetings-fanout-email-salt";

/// Deterministic, salted token standing in for an email in log output.
pub fn redact_email(email: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(EMAIL_HASH_SALT);
    hasher.update(email.as_bytes());
    let digest = hasher.finalize();
    let hash = hex::encode(&digest[..8]);
    format!("email_hash={hash}")
}
