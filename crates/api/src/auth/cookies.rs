//! Session cookie handling for the `jwt` and `fgp` cookies

use axum::http::{
    header::{InvalidHeaderValue, COOKIE},
    HeaderMap, HeaderValue,
};
use time::{format_description::FormatItem, macros::format_description, Duration, OffsetDateTime, UtcOffset};

use super::jwt::IssuedToken;
use crate::config::Config;

pub const TOKEN_COOKIE: &str = "jwt";
pub const FINGERPRINT_COOKIE: &str = "fgp";

/// RFC 7231 IMF-fixdate, always rendered in GMT
const HTTP_DATE: &[FormatItem<'static>] = format_description!(
    "[weekday repr:short], [day] [month repr:short] [year] [hour]:[minute]:[second] GMT"
);

/// Attributes applied to both session cookies
#[derive(Debug, Clone)]
pub struct CookiePolicy {
    pub max_age: Duration,
    pub secure: bool,
    /// Only applied to the token cookie
    pub domain: Option<String>,
}

impl CookiePolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_age: config.jwt_cookie_expires_in,
            secure: config.app_env.is_production(),
            domain: if config.app_env.is_production() {
                config.cookie_domain.clone()
            } else {
                None
            },
        }
    }

    fn common_attributes(&self) -> String {
        let mut attrs = String::from("; Path=/; HttpOnly; SameSite=Strict");
        if self.secure {
            attrs.push_str("; Secure");
        }
        attrs
    }

    fn domain_attribute(&self) -> String {
        self.domain
            .as_deref()
            .map(|d| format!("; Domain={d}"))
            .unwrap_or_default()
    }
}

fn http_date(at: OffsetDateTime) -> String {
    at.to_offset(UtcOffset::UTC)
        .format(HTTP_DATE)
        .unwrap_or_else(|_| "Thu, 01 Jan 1970 00:00:00 GMT".to_string())
}

/// Build the `Set-Cookie` values for a freshly issued session
pub fn session_cookies(
    issued: &IssuedToken,
    policy: &CookiePolicy,
    now: OffsetDateTime,
) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    let fingerprint = format!(
        "{FINGERPRINT_COOKIE}={}; Max-Age={}{}",
        issued.fingerprint,
        policy.max_age.whole_seconds(),
        policy.common_attributes()
    );
    let token = format!(
        "{TOKEN_COOKIE}={}; Expires={}{}{}",
        issued.token,
        http_date(now + policy.max_age),
        policy.common_attributes(),
        policy.domain_attribute()
    );

    Ok([
        HeaderValue::from_str(&fingerprint)?,
        HeaderValue::from_str(&token)?,
    ])
}

/// Build `Set-Cookie` values that expire both session cookies
pub fn clear_session_cookies(policy: &CookiePolicy) -> Result<[HeaderValue; 2], InvalidHeaderValue> {
    let expired = "Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT";
    let fingerprint = format!(
        "{FINGERPRINT_COOKIE}=; {expired}{}",
        policy.common_attributes()
    );
    let token = format!(
        "{TOKEN_COOKIE}=; {expired}{}{}",
        policy.common_attributes(),
        policy.domain_attribute()
    );

    Ok([
        HeaderValue::from_str(&fingerprint)?,
        HeaderValue::from_str(&token)?,
    ])
}

/// Read a cookie value from the request headers
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn issued() -> IssuedToken {
        IssuedToken {
            token: "header.payload.signature".into(),
            fingerprint: "00112233445566778899aabbccddeeff".into(),
            expires_at: datetime!(2025-01-02 00:00 UTC),
        }
    }

    fn dev_policy() -> CookiePolicy {
        CookiePolicy {
            max_age: Duration::days(90),
            secure: false,
            domain: None,
        }
    }

    #[test]
    fn test_session_cookie_attributes() {
        let now = datetime!(2025-01-01 12:00 UTC);
        let [fgp, jwt] = session_cookies(&issued(), &dev_policy(), now).unwrap();
        let fgp = fgp.to_str().unwrap();
        let jwt = jwt.to_str().unwrap();

        assert!(fgp.starts_with("fgp=00112233445566778899aabbccddeeff;"));
        assert!(fgp.contains("Max-Age=7776000"));
        assert!(fgp.contains("HttpOnly"));
        assert!(fgp.contains("SameSite=Strict"));
        assert!(!fgp.contains("Secure"));

        assert!(jwt.starts_with("jwt=header.payload.signature;"));
        assert!(jwt.contains("Expires=Tue, 01 Apr 2025 12:00:00 GMT"));
        assert!(jwt.contains("HttpOnly"));
        assert!(!jwt.contains("Domain="));
    }

    #[test]
    fn test_production_policy_adds_secure_and_domain() {
        let policy = CookiePolicy {
            max_age: Duration::days(1),
            secure: true,
            domain: Some("shop.example.com".into()),
        };
        let [fgp, jwt] = session_cookies(&issued(), &policy, OffsetDateTime::now_utc()).unwrap();

        assert!(fgp.to_str().unwrap().contains("; Secure"));
        assert!(!fgp.to_str().unwrap().contains("Domain="));
        assert!(jwt.to_str().unwrap().contains("; Secure"));
        assert!(jwt.to_str().unwrap().contains("Domain=shop.example.com"));
    }

    #[test]
    fn test_clear_cookies_expire_immediately() {
        let [fgp, jwt] = clear_session_cookies(&dev_policy()).unwrap();
        assert!(fgp.to_str().unwrap().starts_with("fgp=;"));
        assert!(jwt.to_str().unwrap().starts_with("jwt=;"));
        assert!(fgp.to_str().unwrap().contains("Max-Age=0"));
        assert!(jwt.to_str().unwrap().contains("Max-Age=0"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; jwt=abc.def.ghi; fgp=1234"),
        );

        assert_eq!(read_cookie(&headers, "jwt").as_deref(), Some("abc.def.ghi"));
        assert_eq!(read_cookie(&headers, "fgp").as_deref(), Some("1234"));
        assert_eq!(read_cookie(&headers, "missing"), None);
    }

    #[test]
    fn test_read_cookie_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("jwt=token"));
        headers.append(COOKIE, HeaderValue::from_static("fgp=print"));

        assert_eq!(read_cookie(&headers, "fgp").as_deref(), Some("print"));
    }

    #[test]
    fn test_read_cookie_ignores_empty_and_prefix_matches() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("jwt=; xjwt=nope"));

        assert_eq!(read_cookie(&headers, "jwt"), None);
    }
}
