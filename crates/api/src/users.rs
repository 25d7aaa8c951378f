//! User accounts: model, roles, and persistence
//!
//! Action token hashes never leave this module; `User` rows are loaded with
//! an explicit column list that excludes them.

use std::fmt;
use std::str::FromStr;

use email_address::EmailAddress;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::auth::google::GoogleIdentity;
use crate::auth::tokens::{ActionToken, ActionTokenKind};

/// Columns selected for every `User` load
const USER_COLUMNS: &str = r#"
    id, first_name, last_name, email, photo, locale, role,
    password_hash, password_changed_at, google_id, is_email_verified,
    candidate_email, created_at, updated_at
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    User,
    Guide,
    LeadGuide,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Guide => "guide",
            Role::LeadGuide => "lead-guide",
            Role::Admin => "admin",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "guide" => Ok(Role::Guide),
            "lead-guide" => Ok(Role::LeadGuide),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = UnknownRole;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub photo: Option<String>,
    pub locale: Option<String>,
    #[sqlx(try_from = "String")]
    pub role: Role,
    pub password_hash: Option<String>,
    pub password_changed_at: Option<OffsetDateTime>,
    pub google_id: Option<String>,
    pub is_email_verified: bool,
    pub candidate_email: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    /// True when the password changed after a token issued at `iat` (unix seconds)
    pub fn changed_password_after(&self, iat: i64) -> bool {
        self.password_changed_at
            .is_some_and(|changed| changed.unix_timestamp() > iat)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile::from(self)
    }
}

/// Client-facing view of a user
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: String,
    pub photo: Option<String>,
    pub locale: Option<String>,
    pub role: Role,
    pub is_email_verified: bool,
    pub has_password: bool,
    pub google_linked: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<&User> for UserProfile {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            email: user.email.clone(),
            photo: user.photo.clone(),
            locale: user.locale.clone(),
            role: user.role,
            is_email_verified: user.is_email_verified,
            has_password: user.password_hash.is_some(),
            google_linked: user.google_id.is_some(),
            created_at: user.created_at,
        }
    }
}

/// Fields for a password signup
#[derive(Debug, Clone)]
pub struct NewUser<'a> {
    pub first_name: &'a str,
    pub last_name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
}

/// Normalize an email for lookup and uniqueness
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// RFC 5322 check on an already-normalized email. Dotless domains such as
/// `localhost` are refused.
pub fn valid_email(email: &str) -> bool {
    email
        .parse::<EmailAddress>()
        .is_ok_and(|address| address.domain().contains('.'))
}

/// `password_changed_at` is backdated one second so a token issued in the
/// same second as the change still verifies.
fn password_changed_now() -> OffsetDateTime {
    OffsetDateTime::now_utc() - Duration::seconds(1)
}

pub async fn find_by_id(pool: &PgPool, id: Uuid) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1"))
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await
}

pub async fn find_by_google_id(
    pool: &PgPool,
    google_id: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE google_id = $1"
    ))
    .bind(google_id)
    .fetch_optional(pool)
    .await
}

pub async fn email_in_use(pool: &PgPool, email: &str) -> Result<bool, sqlx::Error> {
    let found: Option<(bool,)> = sqlx::query_as("SELECT TRUE FROM users WHERE email = $1")
        .bind(normalize_email(email))
        .fetch_optional(pool)
        .await?;
    Ok(found.is_some())
}

pub async fn insert_password_user(pool: &PgPool, new_user: &NewUser<'_>) -> Result<User, sqlx::Error> {
    let now = OffsetDateTime::now_utc();
    sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (id, first_name, last_name, email, password_hash, role, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, 'user', $6, $6)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(new_user.first_name.trim())
    .bind(new_user.last_name.trim())
    .bind(normalize_email(new_user.email))
    .bind(new_user.password_hash)
    .bind(now)
    .fetch_one(pool)
    .await
}

/// Create an account from a Google identity (no password)
pub async fn insert_google_user(
    pool: &PgPool,
    identity: &GoogleIdentity,
    email: &str,
) -> Result<User, sqlx::Error> {
    let now = OffsetDateTime::now_utc();
    sqlx::query_as::<_, User>(&format!(
        r#"
        INSERT INTO users (
            id, first_name, last_name, email, photo, locale, role,
            google_id, is_email_verified, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, 'user', $7, $8, $9, $9)
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(identity.given_name.as_deref())
    .bind(identity.family_name.as_deref())
    .bind(normalize_email(email))
    .bind(identity.picture.as_deref())
    .bind(identity.locale.as_deref())
    .bind(&identity.sub)
    .bind(identity.email_verified)
    .bind(now)
    .fetch_one(pool)
    .await
}

pub async fn link_google_id(
    pool: &PgPool,
    user_id: Uuid,
    google_id: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET google_id = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(google_id)
    .fetch_one(pool)
    .await
}

/// Replace the password and clear any outstanding reset token
pub async fn set_password(
    pool: &PgPool,
    user_id: Uuid,
    password_hash: &str,
) -> Result<User, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET password_hash = $2,
            password_changed_at = $3,
            password_reset_token = NULL,
            password_reset_expires = NULL,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(password_hash)
    .bind(password_changed_now())
    .fetch_one(pool)
    .await
}

/// Column pair holding the hash and expiry for each action token kind
fn token_columns(kind: ActionTokenKind) -> (&'static str, &'static str) {
    match kind {
        ActionTokenKind::PasswordReset => ("password_reset_token", "password_reset_expires"),
        ActionTokenKind::EmailVerification => {
            ("email_verification_token", "email_verification_expires")
        }
        ActionTokenKind::EmailChange => ("new_email_token", "new_email_expires"),
    }
}

/// Persist an action token hash (and the candidate address for email changes)
pub async fn store_action_token(
    pool: &PgPool,
    user_id: Uuid,
    token: &ActionToken,
    candidate_email: Option<&str>,
) -> Result<(), sqlx::Error> {
    let (hash_col, expires_col) = token_columns(token.kind);
    let candidate = candidate_email.map(normalize_email);

    sqlx::query(&format!(
        r#"
        UPDATE users
        SET {hash_col} = $2,
            {expires_col} = $3,
            candidate_email = CASE WHEN $4::TEXT IS NULL THEN candidate_email ELSE $4 END,
            updated_at = NOW()
        WHERE id = $1
        "#
    ))
    .bind(user_id)
    .bind(&token.hash)
    .bind(token.expires_at)
    .bind(candidate)
    .execute(pool)
    .await?;

    tracing::debug!(user_id = %user_id, kind = token.kind.as_str(), "Action token stored");
    Ok(())
}

/// Drop an outstanding action token (e.g. after the email failed to send)
pub async fn clear_action_token(
    pool: &PgPool,
    user_id: Uuid,
    kind: ActionTokenKind,
) -> Result<(), sqlx::Error> {
    let (hash_col, expires_col) = token_columns(kind);
    let clear_candidate = if kind == ActionTokenKind::EmailChange {
        ", candidate_email = NULL"
    } else {
        ""
    };

    sqlx::query(&format!(
        r#"
        UPDATE users
        SET {hash_col} = NULL, {expires_col} = NULL{clear_candidate}, updated_at = NOW()
        WHERE id = $1
        "#
    ))
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Find the user holding an unexpired action token
pub async fn find_by_action_token(
    pool: &PgPool,
    kind: ActionTokenKind,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    let (hash_col, expires_col) = token_columns(kind);
    sqlx::query_as::<_, User>(&format!(
        "SELECT {USER_COLUMNS} FROM users WHERE {hash_col} = $1 AND {expires_col} > NOW()"
    ))
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Consume an email verification token. Returns the user when the token was
/// valid; the token is cleared in the same statement.
pub async fn consume_email_verification(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET is_email_verified = TRUE,
            email_verification_token = NULL,
            email_verification_expires = NULL,
            updated_at = NOW()
        WHERE email_verification_token = $1
          AND email_verification_expires > NOW()
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Consume an email change token, promoting the candidate address
pub async fn consume_email_change(
    pool: &PgPool,
    token_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET email = COALESCE(candidate_email, email),
            candidate_email = NULL,
            new_email_token = NULL,
            new_email_expires = NULL,
            updated_at = NOW()
        WHERE new_email_token = $1
          AND new_email_expires > NOW()
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(token_hash)
    .fetch_optional(pool)
    .await
}

/// Consume a password reset token and set the new password in one statement
pub async fn consume_password_reset(
    pool: &PgPool,
    token_hash: &str,
    password_hash: &str,
) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>(&format!(
        r#"
        UPDATE users
        SET password_hash = $2,
            password_changed_at = $3,
            password_reset_token = NULL,
            password_reset_expires = NULL,
            updated_at = NOW()
        WHERE password_reset_token = $1
          AND password_reset_expires > NOW()
        RETURNING {USER_COLUMNS}
        "#
    ))
    .bind(token_hash)
    .bind(password_hash)
    .bind(password_changed_now())
    .fetch_optional(pool)
    .await
}
