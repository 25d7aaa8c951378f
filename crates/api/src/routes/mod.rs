//! HTTP routes
//!
//! ```text
//! /api/v1/users     account, session, and Google sign-in
//! /api/v1/products  catalog (and nested product reviews)
//! /api/v1/reviews   reviews
//! ```

pub mod auth;
pub mod products;
pub mod reviews;

use axum::{
    http::{HeaderMap, Uri},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;
use uuid::Uuid;

use crate::{config::Config, error::ApiError, state::AppState};

/// Build the application router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1/users", auth::router(&state))
        .nest("/api/v1/products", products::router(&state))
        .nest("/api/v1/reviews", reviews::router(&state))
        .fallback(not_found)
        .with_state(state)
}

async fn not_found(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("Can't find {uri} on this server!"))
}

/// `{status, results, data: {data}}` envelope used by catalog listings
pub(crate) fn success_list<T: Serialize>(items: &[T]) -> Json<Value> {
    Json(json!({
        "status": "success",
        "results": items.len(),
        "data": { "data": items }
    }))
}

pub(crate) fn success_one<T: Serialize>(item: &T) -> Json<Value> {
    Json(json!({
        "status": "success",
        "data": { "data": item }
    }))
}

/// Base URL of this API for emailed links. `PUBLIC_API_URL` wins; without
/// it the `Host` header is used. Forwarded headers are never trusted.
pub(crate) fn request_base_url(headers: &HeaderMap, config: &Config) -> String {
    if let Some(api_url) = &config.api_url {
        return api_url.clone();
    }

    let proto = if config.app_env.is_production() { "https" } else { "http" };
    let host = header_str(headers, "host")
        .map(str::trim)
        .filter(|h| !h.is_empty() && !h.contains(['/', '@', '\\']))
        .unwrap_or("localhost");

    format!("{proto}://{host}")
}

/// Frontend origin for emailed links: the request's `Origin` when it is on
/// the CORS allow-list, else the configured frontend URL.
pub(crate) fn request_origin(headers: &HeaderMap, config: &Config) -> String {
    header_str(headers, "origin")
        .and_then(normalize_origin)
        .filter(|origin| {
            config
                .allowed_origins
                .iter()
                .filter_map(|allowed| normalize_origin(allowed))
                .any(|allowed| &allowed == origin)
        })
        .unwrap_or_else(|| config.frontend_url.trim_end_matches('/').to_string())
}

fn normalize_origin(raw: &str) -> Option<String> {
    Url::parse(raw.trim())
        .ok()
        .filter(|url| matches!(url.scheme(), "http" | "https"))
        .map(|url| url.origin().ascii_serialization())
}

/// Parse a path id, reporting malformed ids as a 400
pub(crate) fn parse_id(raw: &str) -> Result<Uuid, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("Invalid id: {raw}")))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    fn config(pairs: &[(&str, &str)]) -> Config {
        Config::from_lookup(|key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
                .or_else(|| match key {
                    "DATABASE_URL" => Some("postgres://localhost/storefront_test".into()),
                    "JWT_SECRET" => Some("0123456789abcdef0123456789abcdef".into()),
                    _ => None,
                })
        })
        .unwrap()
    }

    #[test]
    fn test_base_url_uses_host() {
        let h = headers(&[("host", "api.shop.test:8000")]);
        assert_eq!(request_base_url(&h, &config(&[])), "http://api.shop.test:8000");

        let prod = config(&[("APP_ENV", "production")]);
        assert_eq!(request_base_url(&h, &prod), "https://api.shop.test:8000");
    }

    #[test]
    fn test_base_url_ignores_forwarded_headers() {
        let h = headers(&[
            ("host", "api.shop.test"),
            ("x-forwarded-proto", "https"),
            ("x-forwarded-host", "evil.example"),
        ]);
        assert_eq!(request_base_url(&h, &config(&[])), "http://api.shop.test");
    }

    #[test]
    fn test_configured_api_url_wins() {
        let h = headers(&[("host", "evil.example")]);
        let cfg = config(&[("PUBLIC_API_URL", "https://api.shop.test/")]);
        assert_eq!(request_base_url(&h, &cfg), "https://api.shop.test");
    }

    #[test]
    fn test_malformed_host_falls_back() {
        let h = headers(&[("host", "evil.example/path")]);
        assert_eq!(request_base_url(&h, &config(&[])), "http://localhost");
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string()).unwrap(), id);
        let err = parse_id("5c88fa8cf4afda39709c2955").unwrap_err();
        assert_eq!(err.to_string(), "Validation error: Invalid id: 5c88fa8cf4afda39709c2955");
    }

    #[test]
    fn test_allowed_origin_is_used() {
        let cfg = config(&[("ALLOWED_ORIGINS", "https://shop.test,http://localhost:3000")]);
        let h = headers(&[("origin", "https://shop.test/")]);
        assert_eq!(request_origin(&h, &cfg), "https://shop.test");
    }

    #[test]
    fn test_unlisted_origin_falls_back() {
        let cfg = config(&[
            ("ALLOWED_ORIGINS", "https://shop.test"),
            ("FRONTEND_URL", "https://shop.test/"),
        ]);
        for origin in ["https://evil.example", "null", "javascript:alert(1)"] {
            let h = headers(&[("origin", origin)]);
            assert_eq!(request_origin(&h, &cfg), "https://shop.test", "{origin}");
        }
        assert_eq!(request_origin(&HeaderMap::new(), &cfg), "https://shop.test");
    }
}
