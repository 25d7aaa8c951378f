//! Unit tests for authentication middleware
//!
//! Tests cover:
//! - Token extraction (header, cookie, missing)
//! - Rejection before any database lookup (bad signature, fingerprint)
//! - Role gating with `restrict_to`
//! - Optional authentication never rejecting

#[cfg(test)]
mod tests {
    use super::super::jwt::JwtManager;
    use super::super::middleware::*;
    use crate::users::Role;
    use axum::{
        body::{to_bytes, Body},
        http::{header::AUTHORIZATION, header::COOKIE, Request, StatusCode},
        middleware::{self, Next},
        response::Response,
        routing::get,
        Extension, Router,
    };
    use sqlx::postgres::PgPoolOptions;
    use time::Duration;
    use tower::ServiceExt;
    use uuid::Uuid;

    const SECRET: &str = "test-jwt-secret-key-for-testing-only!!";

    fn auth_state() -> AuthState {
        // Lazy pool: none of these tests reach the database
        let pool = PgPoolOptions::new()
            .connect_lazy("postgres://postgres@localhost/storefront_test")
            .unwrap();
        AuthState {
            jwt_manager: JwtManager::new(SECRET, "storefront-test", Duration::hours(1)),
            pool,
        }
    }

    fn protected_app() -> Router {
        Router::new()
            .route("/me", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(auth_state(), require_auth))
    }

    async fn error_message(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["success"], false);
        body["error"].as_str().unwrap_or_default().to_string()
    }

    fn test_user(role: Role) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: "gate@example.com".to_string(),
            role,
            first_name: Some("Gate".to_string()),
            last_name: None,
            photo: None,
            is_email_verified: true,
        }
    }

    // =========================================================================
    // require_auth
    // =========================================================================

    #[tokio::test]
    async fn test_missing_token_is_rejected() {
        let response = protected_app()
            .oneshot(Request::builder().uri("/me").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_message(response).await,
            "You are not logged in! Please log in to get access."
        );
    }

    #[tokio::test]
    async fn test_non_bearer_header_is_treated_as_missing() {
        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, "Basic dXNlcjpwYXNz")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(error_message(response).await.starts_with("You are not logged in"));
    }

    #[tokio::test]
    async fn test_garbage_bearer_token_is_rejected() {
        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, "Bearer not.a.token")
                    .header(COOKIE, "fgp=abcdef")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_message(response).await,
            "Invalid token. Please log in again!"
        );
    }

    #[tokio::test]
    async fn test_valid_token_without_fingerprint_cookie_is_rejected() {
        let state = auth_state();
        let issued = state.jwt_manager.issue(Uuid::new_v4()).unwrap();

        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(AUTHORIZATION, format!("Bearer {}", issued.token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_cookie_token_with_foreign_fingerprint_is_rejected() {
        let state = auth_state();
        let issued = state.jwt_manager.issue(Uuid::new_v4()).unwrap();
        let other = state.jwt_manager.issue(Uuid::new_v4()).unwrap();

        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(
                        COOKIE,
                        format!("jwt={}; fgp={}", issued.token, other.fingerprint),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_expired_token_reports_expiry() {
        let expired = JwtManager::new(SECRET, "storefront-test", Duration::seconds(-10))
            .issue(Uuid::new_v4())
            .unwrap();

        let response = protected_app()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(
                        COOKIE,
                        format!("jwt={}; fgp={}", expired.token, expired.fingerprint),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            error_message(response).await,
            "Your token has expired! Please log in again."
        );
    }

    // =========================================================================
    // optional_auth
    // =========================================================================

    #[tokio::test]
    async fn test_optional_auth_passes_through_without_user() {
        let app = Router::new()
            .route(
                "/",
                get(|user: Option<Extension<AuthUser>>| async move {
                    if user.is_some() {
                        "user"
                    } else {
                        "anonymous"
                    }
                }),
            )
            .layer(middleware::from_fn_with_state(auth_state(), optional_auth));

        for cookie in ["", "jwt=garbage; fgp=123"] {
            let mut builder = Request::builder().uri("/");
            if !cookie.is_empty() {
                builder = builder.header(COOKIE, cookie);
            }
            let response = app
                .clone()
                .oneshot(builder.body(Body::empty()).unwrap())
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::OK);
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            assert_eq!(&bytes[..], b"anonymous");
        }
    }

    // =========================================================================
    // restrict_to
    // =========================================================================

    const STAFF: &[Role] = &[Role::Admin, Role::LeadGuide];

    fn gated_app(user: Option<AuthUser>) -> Router {
        Router::new()
            .route("/staff", get(|| async { "staff only" }))
            .route_layer(middleware::from_fn_with_state(STAFF, restrict_to))
            .route_layer(middleware::from_fn(
                move |mut request: Request<Body>, next: Next| {
                    let user = user.clone();
                    async move {
                        if let Some(user) = user {
                            request.extensions_mut().insert(user);
                        }
                        next.run(request).await
                    }
                },
            ))
    }

    async fn gated_status(user: Option<AuthUser>) -> StatusCode {
        gated_app(user)
            .oneshot(Request::builder().uri("/staff").body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn test_restrict_to_allows_listed_roles() {
        assert_eq!(gated_status(Some(test_user(Role::Admin))).await, StatusCode::OK);
        assert_eq!(
            gated_status(Some(test_user(Role::LeadGuide))).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_restrict_to_forbids_other_roles() {
        let response = gated_app(Some(test_user(Role::Guide)))
            .oneshot(Request::builder().uri("/staff").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            error_message(response).await,
            "You do not have permission to perform this action"
        );
        assert_eq!(
            gated_status(Some(test_user(Role::User))).await,
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_restrict_to_without_auth_user_is_unauthorized() {
        assert_eq!(gated_status(None).await, StatusCode::UNAUTHORIZED);
    }
}
