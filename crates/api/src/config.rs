//! Server configuration loaded from the environment

use time::Duration;

/// Minimum accepted length for the HS256 signing secret
const MIN_JWT_SECRET_LEN: usize = 32;

/// Upper bound for token and cookie lifetimes (ten years)
const MAX_LIFETIME_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Deployment environment, controls cookie hardening
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl AppEnv {
    fn parse(value: &str) -> Result<Self, ConfigError> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" | "test" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => Err(ConfigError::Invalid {
                key: "APP_ENV",
                reason: format!("unknown environment '{other}'"),
            }),
        }
    }

    pub fn is_production(self) -> bool {
        self == Self::Production
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: String,
    pub app_env: AppEnv,
    pub run_migrations: bool,

    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_expires_in: Duration,
    /// Lifetime of the `jwt` and `fgp` cookies
    pub jwt_cookie_expires_in: Duration,
    pub cookie_domain: Option<String>,

    /// Public base of this API for emailed links; `Host` is used when unset
    pub api_url: Option<String>,
    /// Base for emailed frontend links when the Origin is not allow-listed
    pub frontend_url: String,
    pub allowed_origins: Vec<String>,

    pub google_client_id: String,
    pub google_client_secret: String,
    pub google_redirect_uri: String,

    pub resend_api_key: String,
    pub email_from: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or_default = |key: &str, default: &str| get(key).unwrap_or_else(|| default.to_string());

        let database_url = get("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;
        let jwt_secret = get("JWT_SECRET").ok_or(ConfigError::Missing("JWT_SECRET"))?;
        if jwt_secret.len() < MIN_JWT_SECRET_LEN {
            return Err(ConfigError::Invalid {
                key: "JWT_SECRET",
                reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
            });
        }

        let app_env = AppEnv::parse(&or_default("APP_ENV", "development"))?;

        let jwt_expires_in =
            parse_duration(&or_default("JWT_EXPIRES_IN", "90d")).ok_or_else(|| {
                ConfigError::Invalid {
                    key: "JWT_EXPIRES_IN",
                    reason: format!(
                        "expected a number with optional s/m/h/d suffix, at most {MAX_LIFETIME_DAYS} days"
                    ),
                }
            })?;

        let cookie_days: i64 = or_default("JWT_COOKIE_EXPIRES_IN", "90")
            .trim()
            .parse()
            .ok()
            .filter(|days| (1..=MAX_LIFETIME_DAYS).contains(days))
            .ok_or_else(|| ConfigError::Invalid {
                key: "JWT_COOKIE_EXPIRES_IN",
                reason: format!("expected between 1 and {MAX_LIFETIME_DAYS} days"),
            })?;

        let run_migrations = match or_default("RUN_MIGRATIONS", "true")
            .to_ascii_lowercase()
            .as_str()
        {
            "true" | "1" | "yes" => true,
            "false" | "0" | "no" => false,
            other => {
                return Err(ConfigError::Invalid {
                    key: "RUN_MIGRATIONS",
                    reason: format!("expected a boolean, got '{other}'"),
                })
            }
        };

        let allowed_origins = or_default(
            "ALLOWED_ORIGINS",
            "http://localhost:3000,http://127.0.0.1:3000",
        )
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

        Ok(Self {
            database_url,
            bind_address: or_default("BIND_ADDRESS", "0.0.0.0:8000"),
            app_env,
            run_migrations,
            jwt_secret,
            jwt_issuer: or_default("JWT_ISSUER", "storefront"),
            jwt_expires_in,
            jwt_cookie_expires_in: Duration::days(cookie_days),
            cookie_domain: get("COOKIE_DOMAIN"),
            api_url: get("PUBLIC_API_URL").map(|url| url.trim_end_matches('/').to_string()),
            frontend_url: or_default("FRONTEND_URL", "http://localhost:3000"),
            allowed_origins,
            google_client_id: or_default("GOOGLE_CLIENT_ID", ""),
            google_client_secret: or_default("GOOGLE_CLIENT_SECRET", ""),
            google_redirect_uri: or_default("GOOGLE_REDIRECT_URI", "http://localhost:3000"),
            resend_api_key: or_default("RESEND_API_KEY", ""),
            email_from: or_default("EMAIL_FROM", "Storefront <no-reply@storefront.local>"),
        })
    }

    pub fn google_enabled(&self) -> bool {
        !self.google_client_id.is_empty()
    }
}

/// Parse durations like `90d`, `12h`, `30m`, `45s` or a bare number of
/// seconds. Lifetimes over ten years are rejected.
pub fn parse_duration(value: &str) -> Option<Duration> {
    let value = value.trim();
    let (digits, unit) = match value.char_indices().last()? {
        (idx, c) if c.is_ascii_alphabetic() => (&value[..idx], c.to_ascii_lowercase()),
        _ => (value, 's'),
    };
    let amount: i64 = digits.trim().parse().ok()?;
    if amount <= 0 {
        return None;
    }
    let unit_seconds = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3_600,
        'd' => 86_400,
        _ => return None,
    };
    let seconds = amount.checked_mul(unit_seconds)?;
    (seconds <= MAX_LIFETIME_DAYS * 86_400).then(|| Duration::seconds(seconds))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90d"), Some(Duration::days(90)));
        assert_eq!(parse_duration("12h"), Some(Duration::hours(12)));
        assert_eq!(parse_duration("30m"), Some(Duration::minutes(30)));
        assert_eq!(parse_duration("45"), Some(Duration::seconds(45)));
        assert_eq!(parse_duration("45S"), Some(Duration::seconds(45)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("d"), None);
        assert_eq!(parse_duration("0d"), None);
        assert_eq!(parse_duration("-5h"), None);
        assert_eq!(parse_duration("10w"), None);
    }

    #[test]
    fn test_parse_duration_rejects_huge_values() {
        assert_eq!(parse_duration("3650d"), Some(Duration::days(3650)));
        assert_eq!(parse_duration("3651d"), None);
        assert_eq!(parse_duration("99999999999d"), None);
        assert_eq!(parse_duration("999999999999999999d"), None);
        assert_eq!(parse_duration("9223372036854775807h"), None);

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", SECRET),
            ("JWT_EXPIRES_IN", "999999999999999999d"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_EXPIRES_IN", .. }));

        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", SECRET),
            ("JWT_COOKIE_EXPIRES_IN", "999999999999999"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_COOKIE_EXPIRES_IN", .. }));
    }

    #[test]
    fn test_defaults_applied() {
        let config =
            Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x"), ("JWT_SECRET", SECRET)]))
                .unwrap();

        assert_eq!(config.bind_address, "0.0.0.0:8000");
        assert_eq!(config.app_env, AppEnv::Development);
        assert_eq!(config.jwt_issuer, "storefront");
        assert_eq!(config.jwt_expires_in, Duration::days(90));
        assert_eq!(config.jwt_cookie_expires_in, Duration::days(90));
        assert!(config.run_migrations);
        assert!(!config.google_enabled());
        assert_eq!(config.allowed_origins.len(), 2);
        assert_eq!(config.api_url, None);
    }

    #[test]
    fn test_missing_required_keys() {
        let err = Config::from_lookup(lookup(&[("JWT_SECRET", SECRET)])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));

        let err = Config::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("JWT_SECRET")));
    }

    #[test]
    fn test_short_secret_rejected() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", "short"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "JWT_SECRET", .. }));
    }

    #[test]
    fn test_production_and_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", SECRET),
            ("APP_ENV", "production"),
            ("JWT_EXPIRES_IN", "1h"),
            ("JWT_COOKIE_EXPIRES_IN", "7"),
            ("COOKIE_DOMAIN", "shop.example.com"),
            ("RUN_MIGRATIONS", "false"),
            ("GOOGLE_CLIENT_ID", "client-id"),
            ("PUBLIC_API_URL", "https://api.shop.example.com/"),
        ]))
        .unwrap();

        assert!(config.app_env.is_production());
        assert_eq!(config.jwt_expires_in, Duration::hours(1));
        assert_eq!(config.jwt_cookie_expires_in, Duration::days(7));
        assert_eq!(config.cookie_domain.as_deref(), Some("shop.example.com"));
        assert!(!config.run_migrations);
        assert!(config.google_enabled());
        assert_eq!(config.api_url.as_deref(), Some("https://api.shop.example.com"));
    }

    #[test]
    fn test_invalid_cookie_days() {
        let err = Config::from_lookup(lookup(&[
            ("DATABASE_URL", "postgres://x"),
            ("JWT_SECRET", SECRET),
            ("JWT_COOKIE_EXPIRES_IN", "soon"),
        ]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "JWT_COOKIE_EXPIRES_IN",
                ..
            }
        ));
    }

    #[test]
    #[serial]
    fn test_from_env_reads_process_environment() {
        std::env::set_var("DATABASE_URL", "postgres://env/test");
        std::env::set_var("JWT_SECRET", SECRET);
        std::env::set_var("JWT_ISSUER", "env-issuer");

        let config = Config::from_env().unwrap();
        assert_eq!(config.database_url, "postgres://env/test");
        assert_eq!(config.jwt_issuer, "env-issuer");

        std::env::remove_var("JWT_ISSUER");
    }
}
