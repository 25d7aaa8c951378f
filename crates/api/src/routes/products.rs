//! Catalog routes under `/api/v1/products`

use std::collections::HashMap;

use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};

use crate::{
    auth::{optional_auth, require_auth, restrict_to, AuthUser},
    catalog::{
        geo::{radius_radians, LATLNG_FORMAT_ERROR},
        products::{self, NewProduct, Product, ProductPatch, ProductQuery},
        reviews::{self, Review},
        DistanceUnit, LatLng,
    },
    error::{ApiError, ApiResult},
    routes::{parse_id, reviews::product_reviews_router, success_list, success_one},
    state::AppState,
    users::Role,
};

const PRODUCT_EDITORS: &[Role] = &[Role::Admin, Role::LeadGuide];
const RELEASE_PLANNERS: &[Role] = &[Role::Admin, Role::LeadGuide, Role::Guide];

pub fn router(state: &AppState) -> Router<AppState> {
    let editors = Router::new()
        .route("/", post(create_product))
        .route("/{id}", patch(update_product).delete(delete_product))
        .route_layer(middleware::from_fn_with_state(PRODUCT_EDITORS, restrict_to))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    let planners = Router::new()
        .route("/monthly-plan/{year}", get(monthly_plan))
        .route_layer(middleware::from_fn_with_state(RELEASE_PLANNERS, restrict_to))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            require_auth,
        ));

    // Listings attach the viewer when a session cookie is present
    let listings = Router::new()
        .route("/", get(list_products))
        .route("/top-5-cheap", get(top_cheap_products))
        .route_layer(middleware::from_fn_with_state(
            state.auth_state(),
            optional_auth,
        ));

    Router::new()
        .route("/product-stats", get(product_stats))
        .route(
            "/products-within/{distance}/center/{latlng}/unit/{unit}",
            get(products_within),
        )
        .route("/distances/{latlng}/unit/{unit}", get(distances))
        .route("/{id}", get(get_product))
        .merge(listings)
        .merge(editors)
        .merge(planners)
        .merge(product_reviews_router(state))
}

fn is_catalog_staff(viewer: &Option<Extension<AuthUser>>) -> bool {
    viewer
        .as_ref()
        .is_some_and(|Extension(user)| PRODUCT_EDITORS.contains(&user.role))
}

pub async fn list_products(
    State(state): State<AppState>,
    viewer: Option<Extension<AuthUser>>,
    Query(params): Query<HashMap<String, String>>,
) -> ApiResult<Json<Value>> {
    let mut query = ProductQuery::from_params(&params).map_err(ApiError::Validation)?;
    query.include_secret = is_catalog_staff(&viewer);

    let products = products::list(&state.pool, &query).await?;
    Ok(success_list(&products))
}

pub async fn top_cheap_products(
    State(state): State<AppState>,
    viewer: Option<Extension<AuthUser>>,
) -> ApiResult<Json<Value>> {
    let query = ProductQuery {
        include_secret: is_catalog_staff(&viewer),
        ..ProductQuery::top_cheap()
    };
    let products = products::list(&state.pool, &query).await?;
    Ok(success_list(&products))
}

#[derive(Debug, Serialize)]
struct ProductWithReviews {
    #[serde(flatten)]
    product: Product,
    reviews: Vec<Review>,
}

pub async fn get_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let product = products::find(&state.pool, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;
    let reviews = reviews::list(&state.pool, Some(id)).await?;

    Ok(success_one(&ProductWithReviews { product, reviews }))
}

pub async fn create_product(
    State(state): State<AppState>,
    Json(input): Json<NewProduct>,
) -> ApiResult<impl IntoResponse> {
    let fields = input.into_fields().map_err(ApiError::Validation)?;
    let product = products::insert(&state.pool, &fields).await?;
    Ok((StatusCode::CREATED, success_one(&product)))
}

pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<ProductPatch>,
) -> ApiResult<Json<Value>> {
    let id = parse_id(&id)?;
    let current = products::find(&state.pool, id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    let fields = patch.apply(&current).map_err(ApiError::Validation)?;
    let product = products::update(&state.pool, id, &fields)
        .await?
        .ok_or(sqlx::Error::RowNotFound)?;

    tracing::info!(product_id = %id, "Product updated");
    Ok(success_one(&product))
}

pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let id = parse_id(&id)?;
    if !products::delete(&state.pool, id).await? {
        return Err(sqlx::Error::RowNotFound.into());
    }

    tracing::info!(product_id = %id, "Product deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn product_stats(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let stats = products::stats(&state.pool).await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "stats": stats }
    })))
}

pub async fn monthly_plan(
    State(state): State<AppState>,
    Path(year): Path<String>,
) -> ApiResult<Json<Value>> {
    let (from, to) = year
        .trim()
        .parse::<i32>()
        .ok()
        .and_then(products::year_bounds)
        .ok_or_else(|| ApiError::Validation(format!("Invalid year: {year}")))?;

    let plan = products::monthly_plan(&state.pool, from, to).await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "plan": plan }
    })))
}

fn parse_center(latlng: &str) -> ApiResult<LatLng> {
    latlng
        .parse()
        .map_err(|_| ApiError::Validation(LATLNG_FORMAT_ERROR.to_string()))
}

pub async fn products_within(
    State(state): State<AppState>,
    Path((distance, latlng, unit)): Path<(String, String, String)>,
) -> ApiResult<Json<Value>> {
    let center = parse_center(&latlng)?;
    let distance = distance
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| ApiError::Validation(format!("Invalid distance: {distance}")))?;

    let radius = radius_radians(distance, DistanceUnit::from_path(&unit));
    let products = products::within(&state.pool, center, radius).await?;
    Ok(success_list(&products))
}

pub async fn distances(
    State(state): State<AppState>,
    Path((latlng, unit)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    let center = parse_center(&latlng)?;
    let multiplier = DistanceUnit::from_path(&unit).meters_multiplier();

    let distances = products::distances(&state.pool, center, multiplier).await?;
    Ok(Json(json!({
        "status": "success",
        "data": { "data": distances }
    })))
}
