//! Product model, validation, and queries

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgArguments, query::QueryAs, FromRow, PgPool, Postgres, QueryBuilder};
use time::{Date, Month, OffsetDateTime};
use uuid::Uuid;

use super::geo::{LatLng, CENTRAL_ANGLE_SQL, EARTH_RADIUS_METERS};

pub const NAME_MIN_CHARS: usize = 3;
pub const NAME_MAX_CHARS: usize = 40;
pub const DEFAULT_RATINGS_AVERAGE: f64 = 4.5;
pub const DEFAULT_PAGE: i64 = 1;
pub const DEFAULT_LIMIT: i64 = 100;

const PRODUCT_COLUMNS: &str = r#"
    id, name, slug, product_type, ratings_average, ratings_quantity,
    price_usd, price_eur, price_nis, discount_usd, discount_eur, discount_nis,
    description, image_cover, images, secret_product, developer, publisher,
    release_date, start_lat, start_lng, guides, created_at, updated_at
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Franchise,
    Game,
    Dlc,
    Company,
}

impl ProductType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductType::Franchise => "franchise",
            ProductType::Game => "game",
            ProductType::Dlc => "dlc",
            ProductType::Company => "company",
        }
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Type is either: franchise, game, dlc or company")]
pub struct UnknownProductType;

impl FromStr for ProductType {
    type Err = UnknownProductType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "franchise" => Ok(ProductType::Franchise),
            "game" => Ok(ProductType::Game),
            "dlc" => Ok(ProductType::Dlc),
            "company" => Ok(ProductType::Company),
            _ => Err(UnknownProductType),
        }
    }
}

impl TryFrom<String> for ProductType {
    type Error = UnknownProductType;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Price in each supported currency
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Price {
    pub usd: f64,
    pub eur: f64,
    pub nis: f64,
}

impl Price {
    fn all_positive(&self) -> bool {
        self.usd > 0.0 && self.eur > 0.0 && self.nis > 0.0
    }

    fn all_below(&self, regular: &Price) -> bool {
        self.usd < regular.usd && self.eur < regular.eur && self.nis < regular.nis
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub slug: String,
    #[serde(rename = "type")]
    pub product_type: ProductType,
    pub ratings_average: f64,
    pub ratings_quantity: i32,
    pub price: Price,
    pub price_discount: Option<Price>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Vec<String>,
    pub secret_product: bool,
    pub developer: Vec<String>,
    pub publisher: Vec<String>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub release_date: Option<OffsetDateTime>,
    pub start_location: Option<LatLng>,
    pub guides: Vec<Uuid>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

#[derive(Debug, FromRow)]
struct ProductRow {
    id: Uuid,
    name: String,
    slug: String,
    #[sqlx(try_from = "String")]
    product_type: ProductType,
    ratings_average: f64,
    ratings_quantity: i32,
    price_usd: f64,
    price_eur: f64,
    price_nis: f64,
    discount_usd: Option<f64>,
    discount_eur: Option<f64>,
    discount_nis: Option<f64>,
    description: Option<String>,
    image_cover: Option<String>,
    images: Vec<String>,
    secret_product: bool,
    developer: Vec<String>,
    publisher: Vec<String>,
    release_date: Option<OffsetDateTime>,
    start_lat: Option<f64>,
    start_lng: Option<f64>,
    guides: Vec<Uuid>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<ProductRow> for Product {
    fn from(row: ProductRow) -> Self {
        let price_discount = match (row.discount_usd, row.discount_eur, row.discount_nis) {
            (Some(usd), Some(eur), Some(nis)) => Some(Price { usd, eur, nis }),
            _ => None,
        };
        let start_location = match (row.start_lat, row.start_lng) {
            (Some(lat), Some(lng)) => Some(LatLng { lat, lng }),
            _ => None,
        };

        Self {
            id: row.id,
            name: row.name,
            slug: row.slug,
            product_type: row.product_type,
            ratings_average: row.ratings_average,
            ratings_quantity: row.ratings_quantity,
            price: Price {
                usd: row.price_usd,
                eur: row.price_eur,
                nis: row.price_nis,
            },
            price_discount,
            description: row.description,
            image_cover: row.image_cover,
            images: row.images,
            secret_product: row.secret_product,
            developer: row.developer,
            publisher: row.publisher,
            release_date: row.release_date,
            start_location,
            guides: row.guides,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Validated, writable product fields
#[derive(Debug, Clone, PartialEq)]
pub struct ProductFields {
    pub name: String,
    pub product_type: ProductType,
    pub ratings_average: f64,
    pub price: Price,
    pub price_discount: Option<Price>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Vec<String>,
    pub secret_product: bool,
    pub developer: Vec<String>,
    pub publisher: Vec<String>,
    pub release_date: Option<OffsetDateTime>,
    pub start_location: Option<LatLng>,
    pub guides: Vec<Uuid>,
}

impl ProductFields {
    pub fn slug(&self) -> String {
        slugify(&self.name)
    }

    /// Normalize (trim, round) and check every field
    pub fn validate(&mut self) -> Result<(), String> {
        self.name = self.name.trim().to_string();
        let name_len = self.name.chars().count();
        if name_len > NAME_MAX_CHARS {
            return Err(format!(
                "A product name must have less or equal then {NAME_MAX_CHARS} characters"
            ));
        }
        if name_len < NAME_MIN_CHARS {
            return Err(format!(
                "A product name must have more or equal then {NAME_MIN_CHARS} characters"
            ));
        }
        if !self.price.all_positive() {
            return Err("A product must have a price".to_string());
        }
        if let Some(discount) = &self.price_discount {
            if !discount.all_positive() || !discount.all_below(&self.price) {
                return Err("Discount price should be below regular price".to_string());
            }
        }

        self.ratings_average = round_rating(self.ratings_average);
        if self.ratings_average < 1.0 {
            return Err("Rating must be above 1.0".to_string());
        }
        if self.ratings_average > 5.0 {
            return Err("Rating must be below 5.0".to_string());
        }

        if let Some(location) = &self.start_location {
            if !location.is_valid() {
                return Err("Start location must be a valid lat,lng pair".to_string());
            }
        }
        self.description = self
            .description
            .take()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        Ok(())
    }
}

impl From<&Product> for ProductFields {
    fn from(product: &Product) -> Self {
        Self {
            name: product.name.clone(),
            product_type: product.product_type,
            ratings_average: product.ratings_average,
            price: product.price,
            price_discount: product.price_discount,
            description: product.description.clone(),
            image_cover: product.image_cover.clone(),
            images: product.images.clone(),
            secret_product: product.secret_product,
            developer: product.developer.clone(),
            publisher: product.publisher.clone(),
            release_date: product.release_date,
            start_location: product.start_location,
            guides: product.guides.clone(),
        }
    }
}

/// Request body for creating a product
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProduct {
    pub name: String,
    #[serde(rename = "type")]
    pub product_type: String,
    pub price: Price,
    pub price_discount: Option<Price>,
    pub ratings_average: Option<f64>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub secret_product: bool,
    #[serde(default)]
    pub developer: Vec<String>,
    #[serde(default)]
    pub publisher: Vec<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub release_date: Option<OffsetDateTime>,
    pub start_location: Option<LatLng>,
    #[serde(default)]
    pub guides: Vec<Uuid>,
}

impl NewProduct {
    pub fn into_fields(self) -> Result<ProductFields, String> {
        let product_type = self
            .product_type
            .parse::<ProductType>()
            .map_err(|e| e.to_string())?;

        let mut fields = ProductFields {
            name: self.name,
            product_type,
            ratings_average: self.ratings_average.unwrap_or(DEFAULT_RATINGS_AVERAGE),
            price: self.price,
            price_discount: self.price_discount,
            description: self.description,
            image_cover: self.image_cover,
            images: self.images,
            secret_product: self.secret_product,
            developer: self.developer,
            publisher: self.publisher,
            release_date: self.release_date,
            start_location: self.start_location,
            guides: self.guides,
        };
        fields.validate()?;
        Ok(fields)
    }
}

/// Request body for updating a product; absent fields are left unchanged
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductPatch {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub product_type: Option<String>,
    pub price: Option<Price>,
    pub price_discount: Option<Price>,
    pub ratings_average: Option<f64>,
    pub description: Option<String>,
    pub image_cover: Option<String>,
    pub images: Option<Vec<String>>,
    pub secret_product: Option<bool>,
    pub developer: Option<Vec<String>>,
    pub publisher: Option<Vec<String>>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub release_date: Option<OffsetDateTime>,
    pub start_location: Option<LatLng>,
    pub guides: Option<Vec<Uuid>>,
}

impl ProductPatch {
    /// Apply onto the current fields and re-validate the result
    pub fn apply(self, current: &Product) -> Result<ProductFields, String> {
        let mut fields = ProductFields::from(current);

        if let Some(name) = self.name {
            fields.name = name;
        }
        if let Some(product_type) = self.product_type {
            fields.product_type = product_type.parse().map_err(|e: UnknownProductType| e.to_string())?;
        }
        if let Some(price) = self.price {
            fields.price = price;
        }
        if self.price_discount.is_some() {
            fields.price_discount = self.price_discount;
        }
        if let Some(rating) = self.ratings_average {
            fields.ratings_average = rating;
        }
        if self.description.is_some() {
            fields.description = self.description;
        }
        if self.image_cover.is_some() {
            fields.image_cover = self.image_cover;
        }
        if let Some(images) = self.images {
            fields.images = images;
        }
        if let Some(secret) = self.secret_product {
            fields.secret_product = secret;
        }
        if let Some(developer) = self.developer {
            fields.developer = developer;
        }
        if let Some(publisher) = self.publisher {
            fields.publisher = publisher;
        }
        if self.release_date.is_some() {
            fields.release_date = self.release_date;
        }
        if self.start_location.is_some() {
            fields.start_location = self.start_location;
        }
        if let Some(guides) = self.guides {
            fields.guides = guides;
        }

        fields.validate()?;
        Ok(fields)
    }
}

/// `4.666` becomes `4.7`
pub fn round_rating(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Lowercase, hyphen-separated form of a name
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;

    for c in name.chars() {
        if c.is_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.extend(c.to_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

// ============================================================================
// Listing
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl Comparison {
    fn parse(op: &str) -> Option<Self> {
        match op {
            "gt" => Some(Comparison::Gt),
            "gte" => Some(Comparison::Gte),
            "lt" => Some(Comparison::Lt),
            "lte" => Some(Comparison::Lte),
            _ => None,
        }
    }

    fn sql(self) -> &'static str {
        match self {
            Comparison::Eq => " = ",
            Comparison::Gt => " > ",
            Comparison::Gte => " >= ",
            Comparison::Lt => " < ",
            Comparison::Lte => " <= ",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NumericFilter {
    pub column: &'static str,
    pub comparison: Comparison,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortKey {
    pub column: &'static str,
    pub descending: bool,
}

/// Parsed `GET /products` query string
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuery {
    pub product_type: Option<ProductType>,
    pub filters: Vec<NumericFilter>,
    pub sort: Vec<SortKey>,
    pub page: i64,
    pub limit: i64,
    /// Secret products are listed only for catalog staff
    pub include_secret: bool,
}

impl Default for ProductQuery {
    fn default() -> Self {
        Self {
            product_type: None,
            include_secret: false,
            filters: Vec::new(),
            sort: vec![SortKey {
                column: "created_at",
                descending: true,
            }],
            page: DEFAULT_PAGE,
            limit: DEFAULT_LIMIT,
        }
    }
}

fn numeric_column(field: &str) -> Option<&'static str> {
    match field {
        "price" => Some("price_usd"),
        "ratingsAverage" => Some("ratings_average"),
        "ratingsQuantity" => Some("ratings_quantity"),
        _ => None,
    }
}

fn sort_column(field: &str) -> Option<&'static str> {
    match field {
        "name" => Some("name"),
        "price" => Some("price_usd"),
        "ratingsAverage" => Some("ratings_average"),
        "ratingsQuantity" => Some("ratings_quantity"),
        "releaseDate" => Some("release_date"),
        "createdAt" => Some("created_at"),
        _ => None,
    }
}

fn parse_sort(value: &str) -> Result<Vec<SortKey>, String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(|field| {
            let (descending, name) = match field.strip_prefix('-') {
                Some(name) => (true, name),
                None => (false, field),
            };
            sort_column(name)
                .map(|column| SortKey { column, descending })
                .ok_or_else(|| format!("Invalid sort field: {name}"))
        })
        .collect()
}

fn parse_positive(key: &str, value: &str) -> Result<i64, String> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .filter(|n| *n > 0)
        .ok_or_else(|| format!("Invalid {key}: must be a positive integer"))
}

impl ProductQuery {
    /// Build from raw query parameters such as `price[lte]=50&sort=-ratingsAverage`
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, String> {
        let mut query = ProductQuery::default();

        // Sorted for deterministic filter order
        let mut keys: Vec<&String> = params.keys().collect();
        keys.sort();

        for key in keys {
            let value = &params[key];
            match key.as_str() {
                "page" => query.page = parse_positive("page", value)?,
                "limit" => query.limit = parse_positive("limit", value)?,
                "sort" => {
                    let sort = parse_sort(value)?;
                    if !sort.is_empty() {
                        query.sort = sort;
                    }
                }
                "fields" => {}
                "type" => {
                    query.product_type = Some(value.parse().map_err(|e: UnknownProductType| e.to_string())?);
                }
                other => query.filters.push(parse_filter(other, value)?),
            }
        }
        Ok(query)
    }

    /// Five best rated, cheapest first among equals
    pub fn top_cheap() -> Self {
        Self {
            sort: vec![
                SortKey {
                    column: "ratings_average",
                    descending: true,
                },
                SortKey {
                    column: "price_usd",
                    descending: false,
                },
            ],
            limit: 5,
            ..Self::default()
        }
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.limit)
    }
}

fn parse_filter(key: &str, value: &str) -> Result<NumericFilter, String> {
    let (field, comparison) = match key.split_once('[') {
        Some((field, rest)) => {
            let op = rest
                .strip_suffix(']')
                .and_then(Comparison::parse)
                .ok_or_else(|| format!("Invalid filter operator in '{key}'"))?;
            (field, op)
        }
        None => (key, Comparison::Eq),
    };
    let column = numeric_column(field).ok_or_else(|| format!("Invalid filter field: {field}"))?;
    let value = value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| format!("Invalid value for {field}: {value}"))?;

    Ok(NumericFilter {
        column,
        comparison,
        value,
    })
}

fn build_list_query(query: &ProductQuery) -> QueryBuilder<'_, Postgres> {
    let mut builder = QueryBuilder::new(format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE TRUE"));

    if !query.include_secret {
        builder.push(" AND NOT secret_product");
    }
    if let Some(product_type) = query.product_type {
        builder.push(" AND product_type = ");
        builder.push_bind(product_type.as_str());
    }
    for filter in &query.filters {
        builder.push(" AND ");
        builder.push(filter.column);
        builder.push(filter.comparison.sql());
        builder.push_bind(filter.value);
    }

    builder.push(" ORDER BY ");
    for key in &query.sort {
        builder.push(key.column);
        builder.push(if key.descending { " DESC, " } else { " ASC, " });
    }
    builder.push("id ASC LIMIT ");
    builder.push_bind(query.limit);
    builder.push(" OFFSET ");
    builder.push_bind(query.offset());
    builder
}

pub async fn list(pool: &PgPool, query: &ProductQuery) -> Result<Vec<Product>, sqlx::Error> {
    let rows = build_list_query(query)
        .build_query_as::<ProductRow>()
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(Product::from).collect())
}

// ============================================================================
// CRUD
// ============================================================================

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Product>, sqlx::Error> {
    let row = sqlx::query_as::<_, ProductRow>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Product::from))
}

/// Bind `$2..=$21` in column order
fn bind_fields<'q>(
    query: QueryAs<'q, Postgres, ProductRow, PgArguments>,
    fields: &'q ProductFields,
) -> QueryAs<'q, Postgres, ProductRow, PgArguments> {
    query
        .bind(&fields.name)
        .bind(fields.slug())
        .bind(fields.product_type.as_str())
        .bind(fields.ratings_average)
        .bind(fields.price.usd)
        .bind(fields.price.eur)
        .bind(fields.price.nis)
        .bind(fields.price_discount.map(|p| p.usd))
        .bind(fields.price_discount.map(|p| p.eur))
        .bind(fields.price_discount.map(|p| p.nis))
        .bind(&fields.description)
        .bind(&fields.image_cover)
        .bind(&fields.images)
        .bind(fields.secret_product)
        .bind(&fields.developer)
        .bind(&fields.publisher)
        .bind(fields.release_date)
        .bind(fields.start_location.map(|l| l.lat))
        .bind(fields.start_location.map(|l| l.lng))
        .bind(&fields.guides)
}

pub async fn insert(pool: &PgPool, fields: &ProductFields) -> Result<Product, sqlx::Error> {
    let sql = format!(
        r#"
        INSERT INTO products (
            id, name, slug, product_type, ratings_average,
            price_usd, price_eur, price_nis, discount_usd, discount_eur, discount_nis,
            description, image_cover, images, secret_product, developer, publisher,
            release_date, start_lat, start_lng, guides
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11,
                $12, $13, $14, $15, $16, $17, $18, $19, $20, $21)
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let row = bind_fields(
        sqlx::query_as::<_, ProductRow>(&sql).bind(Uuid::new_v4()),
        fields,
    )
    .fetch_one(pool)
    .await?;

    tracing::info!(product_id = %row.id, name = %row.name, "Product created");
    Ok(row.into())
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    fields: &ProductFields,
) -> Result<Option<Product>, sqlx::Error> {
    let sql = format!(
        r#"
        UPDATE products SET
            name = $2, slug = $3, product_type = $4, ratings_average = $5,
            price_usd = $6, price_eur = $7, price_nis = $8,
            discount_usd = $9, discount_eur = $10, discount_nis = $11,
            description = $12, image_cover = $13, images = $14, secret_product = $15,
            developer = $16, publisher = $17, release_date = $18,
            start_lat = $19, start_lng = $20, guides = $21,
            updated_at = NOW()
        WHERE id = $1
        RETURNING {PRODUCT_COLUMNS}
        "#
    );
    let row = bind_fields(sqlx::query_as::<_, ProductRow>(&sql).bind(id), fields)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(Product::from))
}

/// Returns false when no product had that id
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("DELETE FROM products WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

// ============================================================================
// Aggregates
// ============================================================================

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct TypeStats {
    #[serde(rename = "type")]
    pub product_type: String,
    pub num_products: i64,
    pub num_ratings: i64,
    pub avg_rating: f64,
    pub avg_price: f64,
    pub min_price: f64,
    pub max_price: f64,
}

/// Highly rated products (>= 4.5) grouped by type, cheapest group first
pub async fn stats(pool: &PgPool) -> Result<Vec<TypeStats>, sqlx::Error> {
    sqlx::query_as::<_, TypeStats>(
        r#"
        SELECT
            UPPER(product_type) AS product_type,
            COUNT(*)::BIGINT AS num_products,
            COALESCE(SUM(ratings_quantity), 0)::BIGINT AS num_ratings,
            AVG(ratings_average) AS avg_rating,
            AVG(price_usd) AS avg_price,
            MIN(price_usd) AS min_price,
            MAX(price_usd) AS max_price
        FROM products
        WHERE ratings_average >= 4.5
        GROUP BY UPPER(product_type)
        ORDER BY avg_price ASC
        "#,
    )
    .fetch_all(pool)
    .await
}

#[derive(Debug, Clone, Serialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPlan {
    pub month: i32,
    pub num_product_starts: i64,
    pub products: Vec<String>,
}

/// First and last instant (microsecond precision) of `year`, in UTC
pub fn year_bounds(year: i32) -> Option<(OffsetDateTime, OffsetDateTime)> {
    let start = Date::from_calendar_date(year, Month::January, 1).ok()?;
    let end = Date::from_calendar_date(year, Month::December, 31)
        .ok()?
        .with_hms_micro(23, 59, 59, 999_999)
        .ok()?;
    Some((start.midnight().assume_utc(), end.assume_utc()))
}

/// Products released in `year`, grouped by month, busiest month first
pub async fn monthly_plan(
    pool: &PgPool,
    from: OffsetDateTime,
    to: OffsetDateTime,
) -> Result<Vec<MonthlyPlan>, sqlx::Error> {
    sqlx::query_as::<_, MonthlyPlan>(
        r#"
        SELECT
            EXTRACT(MONTH FROM release_date AT TIME ZONE 'UTC')::INT AS month,
            COUNT(*)::BIGINT AS num_product_starts,
            ARRAY_AGG(name ORDER BY name) AS products
        FROM products
        WHERE release_date >= $1 AND release_date <= $2
        GROUP BY 1
        ORDER BY num_product_starts DESC, month ASC
        LIMIT 12
        "#,
    )
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
}

// ============================================================================
// Geo
// ============================================================================

/// Products whose start location lies within `radius` radians of `center`
pub async fn within(
    pool: &PgPool,
    center: LatLng,
    radius: f64,
) -> Result<Vec<Product>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ProductRow>(&format!(
        r#"
        SELECT {PRODUCT_COLUMNS} FROM products
        WHERE start_lat IS NOT NULL AND start_lng IS NOT NULL
          AND {CENTRAL_ANGLE_SQL} <= $3
        "#
    ))
    .bind(center.lat)
    .bind(center.lng)
    .bind(radius)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Product::from).collect())
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ProductDistance {
    pub id: Uuid,
    pub name: String,
    pub distance: f64,
}

/// Distance from `center` to every located product, nearest first.
/// `multiplier` converts meters into the requested unit.
pub async fn distances(
    pool: &PgPool,
    center: LatLng,
    multiplier: f64,
) -> Result<Vec<ProductDistance>, sqlx::Error> {
    sqlx::query_as::<_, ProductDistance>(&format!(
        r#"
        SELECT id, name, ({CENTRAL_ANGLE_SQL}) * $3 AS distance
        FROM products
        WHERE start_lat IS NOT NULL AND start_lng IS NOT NULL
        ORDER BY distance ASC
        "#
    ))
    .bind(center.lat)
    .bind(center.lng)
    .bind(EARTH_RADIUS_METERS * multiplier)
    .fetch_all(pool)
    .await
}
