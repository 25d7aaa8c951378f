//! Single-use action tokens (password reset, email verification, email change)
//!
//! The raw token only ever leaves the server inside an emailed link. The user
//! row stores the SHA-256 hash and an expiry; consuming a token clears both.

use rand::RngCore;
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};

/// Random bytes per action token (hex encoded to 64 chars)
pub const ACTION_TOKEN_BYTES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTokenKind {
    PasswordReset,
    EmailVerification,
    EmailChange,
}

impl ActionTokenKind {
    pub fn lifetime(self) -> Duration {
        match self {
            ActionTokenKind::PasswordReset => Duration::minutes(10),
            ActionTokenKind::EmailVerification | ActionTokenKind::EmailChange => {
                Duration::minutes(60)
            }
        }
    }

    pub fn email_subject(self) -> &'static str {
        match self {
            ActionTokenKind::PasswordReset => "Your password reset token (valid for 10 min)",
            ActionTokenKind::EmailVerification => "Verify Your Email (Valid for 60 Minutes)",
            ActionTokenKind::EmailChange => "Verify Your New Email (Valid for 60 Minutes)",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ActionTokenKind::PasswordReset => "password_reset",
            ActionTokenKind::EmailVerification => "email_verification",
            ActionTokenKind::EmailChange => "email_change",
        }
    }
}

/// A freshly generated action token
#[derive(Debug, Clone)]
pub struct ActionToken {
    pub kind: ActionTokenKind,
    /// Sent to the user, never persisted
    pub raw: String,
    /// Persisted on the user row
    pub hash: String,
    pub expires_at: OffsetDateTime,
}

impl ActionToken {
    pub fn generate(kind: ActionTokenKind) -> Self {
        Self::generate_at(kind, OffsetDateTime::now_utc())
    }

    pub fn generate_at(kind: ActionTokenKind, now: OffsetDateTime) -> Self {
        let mut bytes = [0u8; ACTION_TOKEN_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let raw = hex::encode(bytes);
        let hash = hash_action_token(&raw);

        Self {
            kind,
            raw,
            hash,
            expires_at: now + kind.lifetime(),
        }
    }
}

/// Hash a raw token for storage or lookup
pub fn hash_action_token(raw: &str) -> String {
    sha256_hex(raw)
}

/// Lowercase hex SHA-256 digest
pub fn sha256_hex(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
