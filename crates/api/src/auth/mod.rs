//! Authentication: session tokens, action tokens, passwords and Google sign-in

pub mod cookies;
pub mod google;
pub mod jwt;
pub mod middleware;
#[cfg(test)]
mod middleware_tests;
pub mod password;
pub mod tokens;

pub use cookies::{clear_session_cookies, read_cookie, session_cookies, CookiePolicy};
pub use google::{GoogleClient, GoogleError, GoogleIdentity};
pub use jwt::{Claims, IssuedToken, JwtManager, TokenError};
pub use middleware::{optional_auth, require_auth, restrict_to, AuthError, AuthState, AuthUser};
pub use password::{hash_password, validate_new_password, verify_password};
pub use tokens::{hash_action_token, ActionToken, ActionTokenKind};
