//! Authentication middleware for Axum

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use sqlx::PgPool;
use uuid::Uuid;

use super::cookies::{read_cookie, FINGERPRINT_COOKIE, TOKEN_COOKIE};
use super::jwt::{JwtManager, TokenError};
use crate::users::{self, Role, User};

/// Authenticated user attached to request extensions
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: Role,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub photo: Option<String>,
    pub is_email_verified: bool,
}

impl From<&User> for AuthUser {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            role: user.role,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            photo: user.photo.clone(),
            is_email_verified: user.is_email_verified,
        }
    }
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub jwt_manager: JwtManager,
    pub pool: PgPool,
}

/// Token from `Authorization: Bearer`, falling back to the `jwt` cookie
fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    if let Some(header) = headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok()) {
        if let Some(token) = header.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    read_cookie(headers, TOKEN_COOKIE)
}

/// Middleware that requires authentication
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let Some(token) = extract_bearer_token(request.headers()) else {
        tracing::debug!(path = %path, "require_auth: no token in header or cookie");
        return AuthError::NotLoggedIn.into_response();
    };
    let fingerprint = read_cookie(request.headers(), FINGERPRINT_COOKIE);

    match authenticate(&auth_state, &token, fingerprint.as_deref()).await {
        Ok(auth_user) => {
            tracing::debug!(
                path = %path,
                user_id = %auth_user.user_id,
                role = %auth_user.role,
                "require_auth: authentication successful"
            );
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Err(err) => {
            tracing::warn!(path = %path, error = ?err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that attaches the user when a valid session cookie is present.
/// Never rejects the request.
pub async fn optional_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = read_cookie(request.headers(), TOKEN_COOKIE);
    let fingerprint = read_cookie(request.headers(), FINGERPRINT_COOKIE);

    if let Some(token) = token {
        match authenticate(&auth_state, &token, fingerprint.as_deref()).await {
            Ok(auth_user) => {
                request.extensions_mut().insert(auth_user);
            }
            Err(err) => {
                tracing::debug!(error = ?err, "optional_auth: ignoring invalid session");
            }
        }
    }

    next.run(request).await
}

/// Role gate. Layer it inside `require_auth`:
///
/// ```ignore
/// .route_layer(middleware::from_fn_with_state(ADMIN_ROLES, restrict_to))
/// .route_layer(middleware::from_fn_with_state(auth_state, require_auth))
/// ```
pub async fn restrict_to(
    State(roles): State<&'static [Role]>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth_user) = request.extensions().get::<AuthUser>() else {
        return AuthError::NotLoggedIn.into_response();
    };

    if !roles.contains(&auth_user.role) {
        tracing::warn!(
            user_id = %auth_user.user_id,
            role = %auth_user.role,
            path = %request.uri().path(),
            "restrict_to: role not permitted"
        );
        return AuthError::Forbidden.into_response();
    }

    next.run(request).await
}

async fn authenticate(
    auth_state: &AuthState,
    token: &str,
    fingerprint: Option<&str>,
) -> Result<AuthUser, AuthError> {
    let claims = auth_state.jwt_manager.verify(token, fingerprint)?;

    let user = users::find_by_id(&auth_state.pool, claims.id)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, user_id = %claims.id, "Failed to load user for token");
            AuthError::Database
        })?
        .ok_or(AuthError::UserNoLongerExists)?;

    if user.changed_password_after(claims.iat) {
        return Err(AuthError::PasswordChanged);
    }

    Ok(AuthUser::from(&user))
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("You are not logged in! Please log in to get access.")]
    NotLoggedIn,
    #[error("Invalid token. Please log in again!")]
    InvalidToken,
    #[error("Your token has expired! Please log in again.")]
    Expired,
    #[error("The user belonging to this token does no longer exist.")]
    UserNoLongerExists,
    #[error("User recently changed password! Please log in again.")]
    PasswordChanged,
    #[error("You do not have permission to perform this action")]
    Forbidden,
    #[error("Database error")]
    Database,
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Forbidden => StatusCode::FORBIDDEN,
            AuthError::Database => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::UNAUTHORIZED,
        }
    }
}

impl From<TokenError> for AuthError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Expired => AuthError::Expired,
            _ => AuthError::InvalidToken,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AuthError::Database => "Something went wrong. Please try again later.".to_string(),
            other => other.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": message,
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}
