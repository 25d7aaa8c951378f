//! Google OAuth2 / OpenID Connect client
//!
//! Supports both sign-in flows used by the frontend:
//! - ID token flow: the browser obtained an ID token and posts it directly
//! - Authorization code flow: the browser posts a code that is exchanged here
//!
//! ID tokens are validated locally against Google's published signing keys
//! (RS256, `aud` = our client id, `iss` = Google).

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation};
use reqwest::Client;
use serde::{Deserialize, Deserializer};
use tokio::sync::RwLock;

/// Accepted `iss` values for Google ID tokens
const GOOGLE_ISSUERS: [&str; 2] = ["accounts.google.com", "https://accounts.google.com"];

/// How long fetched signing keys are trusted before refetching
const JWKS_CACHE_TTL: Duration = Duration::from_secs(60 * 60);

/// Unknown key ids trigger at most one refetch per interval
const JWKS_MIN_REFETCH_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum GoogleError {
    #[error("Google sign-in is not configured")]
    NotConfigured,
    #[error("request to Google failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{description}: {error}")]
    Exchange {
        status: u16,
        error: String,
        description: String,
    },
    #[error("invalid ID token: {0}")]
    InvalidIdToken(String),
    #[error("no Google signing key matches the token")]
    SigningKeyNotFound,
    #[error("token carries no subject")]
    MissingSubject,
}

#[derive(Debug, Clone)]
pub struct GoogleEndpoints {
    pub token_url: String,
    pub tokeninfo_url: String,
    pub certs_url: String,
}

impl Default for GoogleEndpoints {
    fn default() -> Self {
        Self {
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            tokeninfo_url: "https://oauth2.googleapis.com/tokeninfo".to_string(),
            certs_url: "https://www.googleapis.com/oauth2/v3/certs".to_string(),
        }
    }
}

/// Identity claims from a validated Google ID token
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleIdentity {
    #[serde(default)]
    pub sub: String,
    pub email: Option<String>,
    #[serde(default, deserialize_with = "bool_or_string")]
    pub email_verified: bool,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
}

/// Tokens returned from the authorization code exchange
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleTokens {
    pub access_token: Option<String>,
    pub id_token: Option<String>,
    pub expires_in: Option<i64>,
    pub scope: Option<String>,
}

/// Response from the tokeninfo endpoint for an access token
#[derive(Debug, Clone, Deserialize)]
pub struct AccessTokenInfo {
    pub sub: Option<String>,
    pub email: Option<String>,
    pub aud: Option<String>,
    pub scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: String,
}

struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    endpoints: GoogleEndpoints,
    jwks_cache: Arc<RwLock<Option<CachedJwks>>>,
}

impl GoogleClient {
    pub fn new(http: Client, client_id: &str, client_secret: &str, redirect_uri: &str) -> Self {
        Self {
            http,
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
            redirect_uri: redirect_uri.to_string(),
            endpoints: GoogleEndpoints::default(),
            jwks_cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn with_endpoints(mut self, endpoints: GoogleEndpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }

    /// Validate a Google ID token and return its identity claims
    pub async fn verify_id_token(&self, id_token: &str) -> Result<GoogleIdentity, GoogleError> {
        if !self.is_configured() {
            return Err(GoogleError::NotConfigured);
        }

        let header =
            decode_header(id_token).map_err(|e| GoogleError::InvalidIdToken(e.to_string()))?;
        if header.alg != Algorithm::RS256 {
            return Err(GoogleError::InvalidIdToken(format!(
                "unexpected algorithm {:?}",
                header.alg
            )));
        }
        let kid = header
            .kid
            .ok_or_else(|| GoogleError::InvalidIdToken("missing key id".into()))?;
        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&self.client_id]);
        validation.set_issuer(&GOOGLE_ISSUERS);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);

        let identity = decode::<GoogleIdentity>(id_token, &key, &validation)
            .map_err(|e| GoogleError::InvalidIdToken(e.to_string()))?
            .claims;

        if identity.sub.is_empty() {
            return Err(GoogleError::MissingSubject);
        }
        Ok(identity)
    }

    /// Exchange an authorization code for tokens
    pub async fn exchange_code(&self, code: &str) -> Result<GoogleTokens, GoogleError> {
        if !self.is_configured() {
            return Err(GoogleError::NotConfigured);
        }

        let response = self
            .http
            .post(&self.endpoints.token_url)
            .form(&[
                ("code", code),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("grant_type", "authorization_code"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(exchange_error(response).await);
        }

        Ok(response.json::<GoogleTokens>().await?)
    }

    /// Look up what Google knows about an access token
    pub async fn access_token_info(
        &self,
        access_token: &str,
    ) -> Result<AccessTokenInfo, GoogleError> {
        let response = self
            .http
            .get(&self.endpoints.tokeninfo_url)
            .query(&[("access_token", access_token)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(exchange_error(response).await);
        }

        Ok(response.json::<AccessTokenInfo>().await?)
    }

    async fn signing_key(&self, kid: &str) -> Result<DecodingKey, GoogleError> {
        if let Some(found) = cached_key(self.jwks_cache.read().await.as_ref(), kid) {
            return found;
        }

        // Recheck under the write lock, another request may have refetched
        let mut cache = self.jwks_cache.write().await;
        if let Some(found) = cached_key(cache.as_ref(), kid) {
            return found;
        }

        tracing::debug!(kid = %kid, "Fetching Google signing keys");
        let keys: JwkSet = self
            .http
            .get(&self.endpoints.certs_url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let key = keys
            .find(kid)
            .map(DecodingKey::from_jwk)
            .transpose()
            .map_err(|e| GoogleError::InvalidIdToken(e.to_string()));

        *cache = Some(CachedJwks {
            keys,
            fetched_at: Instant::now(),
        });

        key?.ok_or(GoogleError::SigningKeyNotFound)
    }
}

/// Answer a key lookup from the cache: a hit on unexpired keys, or a miss
/// shortly after the last fetch. `None` means the keys must be refetched.
fn cached_key(
    cache: Option<&CachedJwks>,
    kid: &str,
) -> Option<Result<DecodingKey, GoogleError>> {
    let cached = cache?;
    let age = cached.fetched_at.elapsed();
    if age >= JWKS_CACHE_TTL {
        return None;
    }

    match cached.keys.find(kid) {
        Some(jwk) => {
            Some(DecodingKey::from_jwk(jwk).map_err(|e| GoogleError::InvalidIdToken(e.to_string())))
        }
        None if age < JWKS_MIN_REFETCH_INTERVAL => Some(Err(GoogleError::SigningKeyNotFound)),
        None => None,
    }
}

async fn exchange_error(response: reqwest::Response) -> GoogleError {
    let status = response.status().as_u16();
    let body = response
        .json::<OAuthErrorBody>()
        .await
        .unwrap_or(OAuthErrorBody {
            error: "unknown_error".to_string(),
            error_description: "Google request failed".to_string(),
        });

    tracing::warn!(status, error = %body.error, "Google OAuth request rejected");
    GoogleError::Exchange {
        status,
        error: body.error,
        description: body.error_description,
    }
}

/// Google sends `email_verified` as a JSON bool in ID tokens and as a string
/// from some endpoints.
fn bool_or_string<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum BoolOrString {
        Bool(bool),
        Str(String),
    }

    Ok(match Option::<BoolOrString>::deserialize(deserializer)? {
        Some(BoolOrString::Bool(value)) => value,
        Some(BoolOrString::Str(value)) => value.eq_ignore_ascii_case("true"),
        None => false,
    })
}
