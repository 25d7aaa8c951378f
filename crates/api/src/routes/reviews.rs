//! Review routes: `/api/v1/reviews` and `/api/v1/products/{id}/reviews`
//!
//! All review routes require a session. Only `user` accounts write reviews;
//! a user may change or remove their own review, admins any review.

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::{
    auth::{require_auth, restrict_to, AuthUser},
    catalog::reviews::{self, NewReview, Review, ReviewPatch},
    error::{ApiError, ApiResult},
    routes::{parse_id, success_list, success_one},
    state::AppState,
    users::Role,
};

const REVIEWERS: &[Role] = &[Role::User];
const REVIEW_MODERATORS: &[Role] = &[Role::User, Role::Admin];

pub fn router(state: &AppState) -> Router<AppState> {
    let writers = Router::new()
        .route("/", post(create_review))
        .route_layer(middleware::from_fn_with_state(REVIEWERS, restrict_to));

    let moderators = Router::new()
        .route("/{id}", patch(update_review).delete(delete_review))
        .route_layer(middleware::from_fn_with_state(REVIEW_MODERATORS, restrict_to));

    Router::new()
        .route("/", get(list_reviews))
        .route("/{id}", get(get_review))
        .merge(writers)
        .merge(moderators)
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ))
}

/// `GET`/`POST /{id}/reviews`, merged into the products router
pub fn product_reviews_router(state: &AppState) -> Router<AppState> {
    let writers = Router::new()
        .route("/{id}/reviews", post(create_product_review))
        .route_layer(middleware::from_fn_with_state(REVIEWERS, restrict_to));

    Router::new()
        .route("/{id}/reviews", get(list_product_reviews))
        .merge(writers)
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ))
}

#[derive(Debug, Deserialize)]
pub struct ReviewFilter {
    pub product: Option<String>,
}

pub async fn list_reviews(
    State(state): State<AppState>,
    Query(filter): Query<ReviewFilter>,
) -> ApiResult<Json<Value>> {
    let product = filter.product.as_deref().map(parse_id).transpose()?;
    let reviews = reviews::list(&state.pool, product).await?;
    Ok(success_list(&reviews))
}

pub async fn list_product_reviews(
    State(state): State<AppState>,
    Path(product_id): Path<String>,
) -> ApiResult<Json<Value>> {
    let product_id = parse_id(&product_id)?;
    let reviews = reviews::list(&state.pool, Some(product_id)).await?;
    Ok(success_list(&reviews))
}

pub async fn get_review(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let review = reviews::find(&state.pool, parse_id(&id)?)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    Ok(success_one(&review))
}

async fn insert_review(
    state: &AppState,
    product_id: Uuid,
    author: &AuthUser,
    input: NewReview,
) -> ApiResult<impl IntoResponse> {
    let (text, rating) = input.validate().map_err(ApiError::Validation)?;

    let review = reviews::create(&state.pool, product_id, author.user_id, &text, rating)
        .await
        .map_err(|e| match ApiError::from(e) {
            ApiError::Conflict(_) => {
                ApiError::Conflict("You have already reviewed this product".into())
            }
            other => other,
        })?
        .ok_or(sqlx::Error::RowNotFound)?;

    Ok((StatusCode::CREATED, success_one(&review)))
}

pub async fn create_product_review(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(product_id): Path<String>,
    Json(input): Json<NewReview>,
) -> ApiResult<impl IntoResponse> {
    let product_id = parse_id(&product_id)?;
    insert_review(&state, product_id, &auth_user, input).await
}

#[derive(Debug, Deserialize)]
pub struct CreateReviewRequest {
    pub product: Option<String>,
    #[serde(flatten)]
    pub review: NewReview,
}

pub async fn create_review(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(req): Json<CreateReviewRequest>,
) -> ApiResult<impl IntoResponse> {
    let product_id = req
        .product
        .as_deref()
        .ok_or_else(|| ApiError::Validation("Review must belong to a product".into()))
        .and_then(parse_id)?;
    insert_review(&state, product_id, &auth_user, req.review).await
}

/// Admins may modify any review, everyone else only their own
fn ensure_can_modify(review: &Review, user: &AuthUser) -> ApiResult<()> {
    if user.role == Role::Admin || review.user.id == user.user_id {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

pub async fn update_review(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
    Json(patch): Json<ReviewPatch>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let (text, rating) = patch.validate().map_err(ApiError::Validation)?;

    let existing = reviews::find(&state.pool, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    ensure_can_modify(&existing, &auth_user)?;

    let review = reviews::update(&state.pool, id, text.as_deref(), rating)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    tracing::info!(review_id = %id, user_id = %auth_user.user_id, "Review updated");
    Ok(success_one(&review))
}

pub async fn delete_review(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    let existing = reviews::find(&state.pool, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    ensure_can_modify(&existing, &auth_user)?;

    if !reviews::delete(&state.pool, id).await? {
        return Err(sqlx::Error::RowNotFound.into());
    }

    tracing::info!(review_id = %id, user_id = %auth_user.user_id, "Review deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::reviews::ReviewAuthor;
    use axum::{body::Body, http::Request};
    use time::OffsetDateTime;
    use tower::ServiceExt;

    fn auth_user(role: Role) -> AuthUser {
        AuthUser {
            user_id: Uuid::new_v4(),
            email: "reviewer@example.com".into(),
            role,
            first_name: None,
            last_name: None,
            photo: None,
            is_email_verified: true,
        }
    }

    fn review_by(author: Uuid) -> Review {
        Review {
            id: Uuid::new_v4(),
            review: "Solid".into(),
            rating: 4,
            product: Uuid::new_v4(),
            user: ReviewAuthor {
                id: author,
                first_name: None,
                photo: None,
            },
            created_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn test_authors_can_modify_their_review() {
        let user = auth_user(Role::User);
        assert!(ensure_can_modify(&review_by(user.user_id), &user).is_ok());
    }

    #[test]
    fn test_other_users_cannot_modify() {
        let user = auth_user(Role::User);
        let err = ensure_can_modify(&review_by(Uuid::new_v4()), &user).unwrap_err();
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn test_admins_can_modify_any_review() {
        let admin = auth_user(Role::Admin);
        assert!(ensure_can_modify(&review_by(Uuid::new_v4()), &admin).is_ok());
    }

    #[tokio::test]
    async fn test_review_routes_require_session() {
        let state = AppState::for_tests();
        let app = router(&state).with_state(state);

        for (method, uri) in [
            ("GET", "/".to_string()),
            ("GET", format!("/{}", Uuid::new_v4())),
            ("DELETE", format!("/{}", Uuid::new_v4())),
        ] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method(method)
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
    }
}
