//! Account routes under `/api/v1/users`
//!
//! Password signup/login, the three emailed action-token flows, and Google
//! sign-in (ID token and authorization code). Every successful sign-in
//! responds with `{success, token, user}` plus the `fgp` and `jwt` cookies.

use axum::{
    extract::{Extension, Path, State},
    http::{header::SET_COOKIE, HeaderMap, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{
        clear_session_cookies, hash_action_token, hash_password, require_auth, session_cookies,
        validate_new_password, verify_password, ActionToken, ActionTokenKind, AuthUser,
        GoogleError, GoogleIdentity,
    },
    email::EmailMessage,
    error::{ApiError, ApiResult},
    routes::{request_base_url, request_origin},
    state::AppState,
    users::{self, NewUser, User, UserProfile},
};

const AUTH_FAILED: &str = "Authentication failed. Please try again.";
const VERIFICATION_FAILED: &str = "verification failed. Please try again.";
const INCORRECT_CREDENTIALS: &str = "Incorrect email or password";
const EMAIL_NOT_SPECIFIED: &str = "Email address was not specified.";
const TOKEN_SENT: &str = "Token sent to email!";
const INVALID_ACTION_TOKEN: &str = "User was not found or token is invalid";

pub fn router(state: &AppState) -> Router<AppState> {
    let protected = Router::new()
        .route("/me", get(me))
        .route("/updateMyPassword", patch(update_password))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    Router::new()
        .route("/signup", post(signup))
        .route("/login", post(login))
        .route("/logout", get(logout))
        .route("/forgotPassword", post(forgot_password))
        .route("/resetPassword/{token}", patch(reset_password))
        .route("/verifyEmail/{token}", patch(verify_email))
        .route("/sendVerificationEmail", post(send_verification_email))
        .route("/sendNewAddressEmail", post(send_new_address_email))
        .route("/changeEmail/{token}", patch(change_email))
        .route("/google", post(google_login))
        .route("/google/code", post(google_login_code))
        .merge(protected)
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub success: bool,
    pub token: String,
    pub user: UserProfile,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: &'static str,
}

impl MessageResponse {
    fn ok(message: &'static str) -> Json<Self> {
        Json(Self {
            success: true,
            message,
        })
    }
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: UserProfile,
}

/// Issue a session for `user`: token in the body, `fgp` and `jwt` cookies
fn token_response(state: &AppState, user: &User, status: StatusCode) -> ApiResult<Response> {
    let issued = state
        .jwt_manager
        .issue(user.id)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    let cookies = session_cookies(&issued, &state.cookie_policy, OffsetDateTime::now_utc())
        .map_err(|e| ApiError::Internal(format!("invalid session cookie: {e}")))?;

    let mut response = (
        status,
        Json(TokenResponse {
            success: true,
            token: issued.token,
            user: user.profile(),
        }),
    )
        .into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }

    tracing::debug!(user_id = %user.id, "Session issued");
    Ok(response)
}

// =============================================================================
// Password accounts
// =============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

fn required<'a>(value: &'a Option<String>, message: &str) -> ApiResult<&'a str> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(message.to_string()))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(req): Json<SignupRequest>,
) -> ApiResult<Response> {
    let first_name = required(&req.first_name, "Please tell us your first name!")?;
    let last_name = required(&req.last_name, "Please tell us your last name!")?;
    let email = users::normalize_email(required(&req.email, "Please provide your email")?);
    if !users::valid_email(&email) {
        return Err(ApiError::Validation("Please provide a valid email".into()));
    }
    let password = req.password.as_deref().unwrap_or_default();
    validate_new_password(password, req.password_confirm.as_deref().unwrap_or_default())
        .map_err(ApiError::Validation)?;

    if users::email_in_use(&state.pool, &email).await? {
        return Err(ApiError::Conflict(format!(
            "Email address is already used ({email})"
        )));
    }

    let password_hash = hash_password(password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let user = users::insert_password_user(
        &state.pool,
        &NewUser {
            first_name,
            last_name,
            email: &email,
            password_hash: &password_hash,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User signed up");
    token_response(&state, &user, StatusCode::CREATED)
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Response> {
    let (Some(email), Some(password)) = (
        req.email.as_deref().filter(|e| !e.trim().is_empty()),
        req.password.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(ApiError::Validation(
            "Please provide email and password!".into(),
        ));
    };

    let user = users::find_by_email(&state.pool, email).await?;
    // Google-only accounts have no password hash and cannot log in this way
    let user = user
        .filter(|u| {
            u.password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash))
        })
        .ok_or_else(|| ApiError::Unauthorized(INCORRECT_CREDENTIALS.into()))?;

    tracing::info!(user_id = %user.id, "User logged in");
    token_response(&state, &user, StatusCode::OK)
}

pub async fn logout(State(state): State<AppState>) -> ApiResult<Response> {
    let cookies = clear_session_cookies(&state.cookie_policy)
        .map_err(|e| ApiError::Internal(format!("invalid session cookie: {e}")))?;

    let mut response = Json(serde_json::json!({ "success": true })).into_response();
    for cookie in cookies {
        response.headers_mut().append(SET_COOKIE, cookie);
    }
    Ok(response)
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Json<MeResponse>> {
    let user = users::find_by_id(&state.pool, auth_user.user_id)
        .await?
        .ok_or_else(|| {
            ApiError::Unauthorized("The user belonging to this token does no longer exist.".into())
        })?;

    Ok(Json(MeResponse {
        success: true,
        user: user.profile(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
    pub new_password_confirm: Option<String>,
}

pub async fn update_password(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<UpdatePasswordRequest>,
) -> ApiResult<Response> {
    let user = users::find_by_id(&state.pool, auth_user.user_id)
        .await?
        .ok_or_else(|| {
            ApiError::Unauthorized("The user belonging to this token does no longer exist.".into())
        })?;

    let current = req.current_password.as_deref().unwrap_or_default();
    let current_ok = user
        .password_hash
        .as_deref()
        .is_some_and(|hash| verify_password(current, hash));
    if !current_ok {
        return Err(ApiError::Unauthorized(
            "Your current password is wrong.".into(),
        ));
    }

    let new_password = req.new_password.as_deref().unwrap_or_default();
    validate_new_password(
        new_password,
        req.new_password_confirm.as_deref().unwrap_or_default(),
    )
    .map_err(ApiError::Validation)?;

    let password_hash =
        hash_password(new_password).map_err(|e| ApiError::Internal(e.to_string()))?;
    let user = users::set_password(&state.pool, user.id, &password_hash).await?;

    tracing::info!(user_id = %user.id, "Password updated");
    token_response(&state, &user, StatusCode::OK)
}

// =============================================================================
// Emailed action tokens
// =============================================================================

/// Email a freshly stored action token. When delivery fails the token (and
/// any candidate address) is cleared again.
async fn deliver_action_token(
    state: &AppState,
    user_id: Uuid,
    token: &ActionToken,
    message: EmailMessage,
    failure: &str,
) -> ApiResult<Json<MessageResponse>> {
    if let Err(e) = state.email.send(&message).await {
        tracing::error!(
            user_id = %user_id,
            kind = token.kind.as_str(),
            error = %e,
            "Failed to send action token email"
        );
        users::clear_action_token(&state.pool, user_id, token.kind).await?;
        return Err(ApiError::EmailDelivery(failure.to_string()));
    }

    Ok(MessageResponse::ok(TOKEN_SENT))
}

#[derive(Debug, Deserialize)]
pub struct EmailRequest {
    pub email: Option<String>,
}

pub async fn forgot_password(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = required(&req.email, EMAIL_NOT_SPECIFIED)?;
    let user = users::find_by_email(&state.pool, email)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("There is no user with that email address ({email})"))
        })?;

    let token = ActionToken::generate(ActionTokenKind::PasswordReset);
    users::store_action_token(&state.pool, user.id, &token, None).await?;

    let reset_url = format!(
        "{}/api/v1/users/resetPassword/{}",
        request_base_url(&headers, &state.config),
        token.raw
    );
    let message = EmailMessage {
        to: user.email.clone(),
        subject: token.kind.email_subject().to_string(),
        text: format!(
            "Forgot your password? Submit a PATCH request with your new password and passwordConfirm to: {reset_url}.\nIf you didn't forget your password, please ignore this email!"
        ),
    };

    deliver_action_token(
        &state,
        user.id,
        &token,
        message,
        "There was an error sending the email. Try again later!",
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub password: Option<String>,
    pub password_confirm: Option<String>,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(req): Json<ResetPasswordRequest>,
) -> ApiResult<Response> {
    let token_hash = hash_action_token(&token);
    let invalid = || ApiError::Validation("Token is invalid or has expired".into());

    // Token errors take precedence over password validation errors
    users::find_by_action_token(&state.pool, ActionTokenKind::PasswordReset, &token_hash)
        .await?
        .ok_or_else(invalid)?;

    let password = req.password.as_deref().unwrap_or_default();
    validate_new_password(password, req.password_confirm.as_deref().unwrap_or_default())
        .map_err(ApiError::Validation)?;
    let password_hash = hash_password(password).map_err(|e| ApiError::Internal(e.to_string()))?;

    let user = users::consume_password_reset(&state.pool, &token_hash, &password_hash)
        .await?
        .ok_or_else(invalid)?;

    tracing::info!(user_id = %user.id, "Password reset");
    token_response(&state, &user, StatusCode::OK)
}

pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user = users::consume_email_verification(&state.pool, &hash_action_token(&token))
        .await?
        .ok_or_else(|| ApiError::Validation(INVALID_ACTION_TOKEN.into()))?;

    tracing::info!(user_id = %user.id, "Email verified");
    Ok(MessageResponse::ok("Email verified successfully"))
}

pub async fn send_verification_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let email = required(&req.email, EMAIL_NOT_SPECIFIED)?;
    let user = users::find_by_email(&state.pool, email)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("There is no user with that email address ({email})"))
        })?;

    if user.is_email_verified {
        return Err(ApiError::Validation(
            "Email address is already verified".into(),
        ));
    }

    let token = ActionToken::generate(ActionTokenKind::EmailVerification);
    users::store_action_token(&state.pool, user.id, &token, None).await?;

    let verification_url = format!(
        "{}/profile/verify-email/{}",
        request_origin(&headers, &state.config),
        token.raw
    );
    let message = EmailMessage {
        to: user.email.clone(),
        subject: token.kind.email_subject().to_string(),
        text: format!(
            "Click on the link to verify your email address: {verification_url}.\nIf you didn't ask to verify, please ignore this email!"
        ),
    };

    deliver_action_token(
        &state,
        user.id,
        &token,
        message,
        "There was an error sending the verification email. Try again later!",
    )
    .await
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAddressRequest {
    pub current_email: Option<String>,
    pub new_email: Option<String>,
    pub password: Option<String>,
}

pub async fn send_new_address_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<NewAddressRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let (Some(current_email), Some(new_email)) = (
        req.current_email.as_deref().filter(|e| !e.trim().is_empty()),
        req.new_email.as_deref().filter(|e| !e.trim().is_empty()),
    ) else {
        return Err(ApiError::Validation(
            "Current email address or new email address were not specified.".into(),
        ));
    };
    let current_email = users::normalize_email(current_email);
    let new_email = users::normalize_email(new_email);

    if current_email == new_email {
        return Err(ApiError::Validation(
            "Current email address and the new email address are the same.".into(),
        ));
    }
    let password = req
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ApiError::Validation("Password was not provided.".into()))?;
    if !users::valid_email(&new_email) {
        return Err(ApiError::Validation("Please provide a valid email".into()));
    }

    if users::email_in_use(&state.pool, &new_email).await? {
        return Err(ApiError::Conflict(format!(
            "Email address is already used ({new_email})"
        )));
    }

    let user = users::find_by_email(&state.pool, &current_email)
        .await?
        .filter(|u| {
            u.password_hash
                .as_deref()
                .is_some_and(|hash| verify_password(password, hash))
        })
        .ok_or_else(|| ApiError::Unauthorized(INCORRECT_CREDENTIALS.into()))?;

    if !user.is_email_verified {
        return Err(ApiError::Validation(
            "Verify your current email address before changing it to other one".into(),
        ));
    }

    let token = ActionToken::generate(ActionTokenKind::EmailChange);
    users::store_action_token(&state.pool, user.id, &token, Some(&new_email)).await?;

    let email_url = format!(
        "{}/profile/new-email/{}",
        request_origin(&headers, &state.config),
        token.raw
    );
    let message = EmailMessage {
        to: new_email,
        subject: token.kind.email_subject().to_string(),
        text: format!(
            "Click on the link to verify your email address: {email_url}.\nIf you didn't ask to change your email, please ignore this email!"
        ),
    };

    deliver_action_token(
        &state,
        user.id,
        &token,
        message,
        "There was an error sending the verification of new email. Try again later!",
    )
    .await
}

pub async fn change_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user = users::consume_email_change(&state.pool, &hash_action_token(&token))
        .await?
        .ok_or_else(|| ApiError::Validation(INVALID_ACTION_TOKEN.into()))?;

    tracing::info!(user_id = %user.id, "Email address changed");
    Ok(MessageResponse::ok("Email was changed successfully"))
}

// =============================================================================
// Google sign-in
// =============================================================================

fn google_error(err: GoogleError) -> ApiError {
    match err {
        GoogleError::Exchange { status, .. } => ApiError::Upstream {
            status: StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
            message: err.to_string(),
        },
        GoogleError::MissingSubject => ApiError::Unauthorized(VERIFICATION_FAILED.into()),
        GoogleError::InvalidIdToken(_) | GoogleError::SigningKeyNotFound => {
            tracing::debug!(error = %err, "Google ID token rejected");
            ApiError::Unauthorized(AUTH_FAILED.into())
        }
        GoogleError::NotConfigured => ApiError::Internal(err.to_string()),
        GoogleError::Http(e) => ApiError::Upstream {
            status: StatusCode::BAD_GATEWAY,
            message: format!("Google request failed: {e}"),
        },
    }
}

/// Resolve a verified Google identity to a local account: by Google id, then
/// by email (linking only when Google verified the address), else a new user.
pub(crate) async fn link_google_identity(state: &AppState, identity: &GoogleIdentity) -> ApiResult<User> {
    if let Some(user) = users::find_by_google_id(&state.pool, &identity.sub).await? {
        return Ok(user);
    }

    let email = identity
        .email
        .as_deref()
        .map(users::normalize_email)
        .filter(|e| users::valid_email(e))
        .ok_or_else(|| ApiError::Unauthorized(AUTH_FAILED.into()))?;

    if let Some(existing) = users::find_by_email(&state.pool, &email).await? {
        if !identity.email_verified {
            tracing::warn!(user_id = %existing.id, "Refusing to link unverified Google email");
            return Err(ApiError::Unauthorized(AUTH_FAILED.into()));
        }
        let user = users::link_google_id(&state.pool, existing.id, &identity.sub).await?;
        tracing::info!(user_id = %user.id, "Google identity linked to existing account");
        return Ok(user);
    }

    let user = users::insert_google_user(&state.pool, identity, &email).await?;
    tracing::info!(user_id = %user.id, "User signed up with Google");
    Ok(user)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleLoginRequest {
    pub id_token: Option<String>,
}

pub async fn google_login(
    State(state): State<AppState>,
    Json(req): Json<GoogleLoginRequest>,
) -> ApiResult<Response> {
    let id_token = req
        .id_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Unauthorized(AUTH_FAILED.into()))?;

    let identity = state
        .google
        .verify_id_token(id_token)
        .await
        .map_err(google_error)?;
    let user = link_google_identity(&state, &identity).await?;
    token_response(&state, &user, StatusCode::OK)
}

#[derive(Debug, Deserialize)]
pub struct GoogleCodeRequest {
    pub code: Option<String>,
}

/// The frontend sends the authorization code URI-encoded, then base64-encoded
pub(crate) fn decode_auth_code(encoded: &str) -> Option<String> {
    let bytes = STANDARD.decode(encoded.trim()).ok()?;
    let uri_encoded = String::from_utf8(bytes).ok()?;
    let code = urlencoding::decode(&uri_encoded).ok()?.into_owned();
    (!code.is_empty()).then_some(code)
}

pub async fn google_login_code(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<GoogleCodeRequest>,
) -> ApiResult<Response> {
    let requested_with = headers
        .get("x-requested-with")
        .and_then(|v| v.to_str().ok());
    if requested_with != Some("XmlHttpRequest") {
        return Err(ApiError::Validation(
            "This route is not available for this request type. Please use XmlHttpRequest"
                .into(),
        ));
    }

    let code = req
        .code
        .as_deref()
        .and_then(decode_auth_code)
        .ok_or_else(|| ApiError::Unauthorized(AUTH_FAILED.into()))?;

    let tokens = state.google.exchange_code(&code).await.map_err(google_error)?;

    let access_info = match tokens.access_token.as_deref() {
        Some(access_token) => Some(
            state
                .google
                .access_token_info(access_token)
                .await
                .map_err(google_error)?,
        ),
        None => None,
    };

    let id_token = tokens
        .id_token
        .as_deref()
        .ok_or_else(|| ApiError::Unauthorized(AUTH_FAILED.into()))?;
    let identity = state
        .google
        .verify_id_token(id_token)
        .await
        .map_err(google_error)?;

    if access_info.and_then(|info| info.sub).is_none() {
        return Err(ApiError::Unauthorized(VERIFICATION_FAILED.into()));
    }

    let user = link_google_identity(&state, &identity).await?;
    token_response(&state, &user, StatusCode::OK)
}
