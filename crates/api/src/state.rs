//! Application state

use reqwest::Client;
use sqlx::PgPool;

use crate::{
    auth::{AuthState, CookiePolicy, GoogleClient, JwtManager},
    config::Config,
    email::EmailService,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    pub jwt_manager: JwtManager,
    pub cookie_policy: CookiePolicy,
    pub google: GoogleClient,
    pub email: EmailService,
}

impl AppState {
    pub fn new(pool: PgPool, config: Config) -> Self {
        let jwt_manager = JwtManager::new(
            &config.jwt_secret,
            &config.jwt_issuer,
            config.jwt_expires_in,
        );
        tracing::info!(
            issuer = %config.jwt_issuer,
            expires_in_secs = config.jwt_expires_in.whole_seconds(),
            "Session tokens configured"
        );

        let cookie_policy = CookiePolicy::from_config(&config);
        if !cookie_policy.secure {
            tracing::warn!("Session cookies are not marked Secure (APP_ENV is not production)");
        }

        // Shared HTTP client for Google and Resend
        let http_client = Client::new();

        let google = GoogleClient::new(
            http_client.clone(),
            &config.google_client_id,
            &config.google_client_secret,
            &config.google_redirect_uri,
        );
        if config.google_enabled() {
            tracing::info!("Google sign-in enabled");
        } else {
            tracing::warn!("Google sign-in not configured (missing GOOGLE_CLIENT_ID)");
        }

        let email = EmailService::from_config(http_client, &config);
        if email.is_enabled() {
            tracing::info!("Email delivery enabled");
        } else {
            tracing::warn!("Email delivery not configured (missing RESEND_API_KEY)");
        }

        Self {
            pool,
            config,
            jwt_manager,
            cookie_policy,
            google,
            email,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            jwt_manager: self.jwt_manager.clone(),
            pool: self.pool.clone(),
        }
    }
}

#[cfg(test)]
impl AppState {
    fn test_config() -> Config {
        Config::from_lookup(|key| match key {
            "DATABASE_URL" => Some("postgres://postgres@localhost/storefront_test".to_string()),
            "JWT_SECRET" => Some("test-jwt-secret-key-for-testing-only!!".to_string()),
            _ => None,
        })
        .unwrap()
    }

    /// State over a lazy pool; handlers under test must not reach the database
    pub(crate) fn for_tests() -> Self {
        use sqlx::postgres::PgPoolOptions;

        let config = Self::test_config();
        let pool = PgPoolOptions::new()
            .connect_lazy(&config.database_url)
            .unwrap();
        Self::new(pool, config)
    }

    /// State over a migrated test database
    pub(crate) fn for_pool(pool: PgPool) -> Self {
        Self::new(pool, Self::test_config())
    }
}
