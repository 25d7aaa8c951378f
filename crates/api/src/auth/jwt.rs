//! Session token issuance and verification
//!
//! Every token is bound to a random fingerprint that travels in a separate
//! HttpOnly cookie (`fgp`). The token's `jti` claim is the SHA-256 of that
//! fingerprint, so a token lifted from storage or logs is useless without the
//! cookie that was set alongside it.

use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use super::tokens::sha256_hex;

/// Audience claim for all session tokens
pub const TOKEN_AUDIENCE: &str = "Authentication";

/// Random bytes per fingerprint (hex encoded to 32 chars)
pub const FINGERPRINT_BYTES: usize = 16;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("failed to sign token: {0}")]
    Signing(String),
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
    #[error("missing token fingerprint")]
    MissingFingerprint,
    #[error("token fingerprint mismatch")]
    FingerprintMismatch,
}

/// Claims carried by a session token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User id
    pub id: Uuid,
    pub sub: String,
    pub iss: String,
    pub aud: String,
    /// SHA-256 of the session fingerprint
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

/// A signed token together with the fingerprint it is bound to
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub fingerprint: String,
    pub expires_at: OffsetDateTime,
}

#[derive(Clone)]
pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    expires_in: Duration,
}

impl JwtManager {
    pub fn new(secret: &str, issuer: &str, expires_in: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            issuer: issuer.to_string(),
            expires_in,
        }
    }

    /// Issue a new token and fingerprint for a user
    pub fn issue(&self, user_id: Uuid) -> Result<IssuedToken, TokenError> {
        self.issue_at(user_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn issue_at(
        &self,
        user_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<IssuedToken, TokenError> {
        let fingerprint = generate_fingerprint();
        let expires_at = now
            .checked_add(self.expires_in)
            .ok_or_else(|| TokenError::Signing("token lifetime out of range".to_string()))?;

        let claims = Claims {
            id: user_id,
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: TOKEN_AUDIENCE.to_string(),
            jti: fingerprint_hash(&fingerprint),
            iat: now.unix_timestamp(),
            exp: expires_at.unix_timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| TokenError::Signing(e.to_string()))?;

        Ok(IssuedToken {
            token,
            fingerprint,
            expires_at,
        })
    }

    /// Verify a token against the fingerprint presented with it
    pub fn verify(&self, token: &str, fingerprint: Option<&str>) -> Result<Claims, TokenError> {
        self.verify_at(token, fingerprint, OffsetDateTime::now_utc())
    }

    pub(crate) fn verify_at(
        &self,
        token: &str,
        fingerprint: Option<&str>,
        now: OffsetDateTime,
    ) -> Result<Claims, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[TOKEN_AUDIENCE]);
        validation.set_required_spec_claims(&["exp", "iat", "iss", "aud", "sub"]);
        validation.leeway = 0;
        // exp is checked below against `now` so tests can pin the clock
        validation.validate_exp = false;

        let claims = decode::<Claims>(token, &self.decoding_key, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => TokenError::Expired,
                _ => TokenError::Invalid,
            })?
            .claims;

        let now_ts = now.unix_timestamp();
        if claims.exp <= now_ts {
            return Err(TokenError::Expired);
        }
        // Max-age: reject tokens older than the configured lifetime even if
        // they were minted with a longer exp.
        if claims.iat.saturating_add(self.expires_in.whole_seconds()) <= now_ts {
            return Err(TokenError::Expired);
        }
        if claims.sub != claims.id.to_string() {
            return Err(TokenError::Invalid);
        }

        let fingerprint = fingerprint
            .filter(|f| !f.is_empty())
            .ok_or(TokenError::MissingFingerprint)?;
        let expected = fingerprint_hash(fingerprint);
        if !bool::from(expected.as_bytes().ct_eq(claims.jti.as_bytes())) {
            return Err(TokenError::FingerprintMismatch);
        }

        Ok(claims)
    }
}

/// Generate a random session fingerprint
pub fn generate_fingerprint() -> String {
    let mut bytes = [0u8; FINGERPRINT_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// The `jti` value for a fingerprint
pub fn fingerprint_hash(fingerprint: &str) -> String {
    sha256_hex(fingerprint)
}
