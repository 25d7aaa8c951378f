//! Product reviews
//!
//! Every write recomputes the reviewed product's `ratings_average` and
//! `ratings_quantity` in the same transaction.

use serde::{Deserialize, Serialize};
use sqlx::{FromRow, PgPool, Postgres, Transaction};
use time::OffsetDateTime;
use uuid::Uuid;

use super::products::DEFAULT_RATINGS_AVERAGE;

const REVIEW_COLUMNS: &str = r#"
    r.id, r.review, r.rating, r.product_id, r.user_id, r.created_at,
    u.first_name AS author_first_name, u.photo AS author_photo
"#;

#[derive(Debug, Clone, FromRow)]
struct ReviewRow {
    id: Uuid,
    review: String,
    rating: i32,
    product_id: Uuid,
    user_id: Uuid,
    created_at: OffsetDateTime,
    author_first_name: Option<String>,
    author_photo: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewAuthor {
    pub id: Uuid,
    #[serde(rename = "firstName")]
    pub first_name: Option<String>,
    pub photo: Option<String>,
}

/// A review as returned by the API, with its author populated
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Review {
    pub id: Uuid,
    pub review: String,
    pub rating: i32,
    pub product: Uuid,
    pub user: ReviewAuthor,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl From<ReviewRow> for Review {
    fn from(row: ReviewRow) -> Self {
        Self {
            id: row.id,
            review: row.review,
            rating: row.rating,
            product: row.product_id,
            user: ReviewAuthor {
                id: row.user_id,
                first_name: row.author_first_name,
                photo: row.author_photo,
            },
            created_at: row.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct NewReview {
    pub review: Option<String>,
    pub rating: Option<i32>,
}

impl NewReview {
    /// Trimmed text and rating, or the first validation failure
    pub fn validate(self) -> Result<(String, i32), String> {
        let review = validate_text(self.review.as_deref().unwrap_or_default())?;
        let rating = self.rating.ok_or_else(|| "Review must have a rating".to_string())?;
        validate_rating(rating)?;
        Ok((review, rating))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ReviewPatch {
    pub review: Option<String>,
    pub rating: Option<i32>,
}

impl ReviewPatch {
    pub fn validate(self) -> Result<(Option<String>, Option<i32>), String> {
        let review = self.review.as_deref().map(validate_text).transpose()?;
        if let Some(rating) = self.rating {
            validate_rating(rating)?;
        }
        Ok((review, self.rating))
    }
}

fn validate_text(text: &str) -> Result<String, String> {
    let text = text.trim();
    if text.is_empty() {
        return Err("Review can not be empty!".to_string());
    }
    Ok(text.to_string())
}

fn validate_rating(rating: i32) -> Result<(), String> {
    if (1..=5).contains(&rating) {
        Ok(())
    } else {
        Err("Rating must be between 1 and 5".to_string())
    }
}

// ============================================================================
// Queries
// ============================================================================

/// All reviews, or only those for `product`
pub async fn list(pool: &PgPool, product: Option<Uuid>) -> Result<Vec<Review>, sqlx::Error> {
    let rows = sqlx::query_as::<_, ReviewRow>(&format!(
        r#"
        SELECT {REVIEW_COLUMNS}
        FROM reviews r JOIN users u ON u.id = r.user_id
        WHERE ($1::UUID IS NULL OR r.product_id = $1)
        ORDER BY r.created_at DESC
        "#
    ))
    .bind(product)
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(Review::from).collect())
}

pub async fn find(pool: &PgPool, id: Uuid) -> Result<Option<Review>, sqlx::Error> {
    let row = sqlx::query_as::<_, ReviewRow>(&format!(
        r#"
        SELECT {REVIEW_COLUMNS}
        FROM reviews r JOIN users u ON u.id = r.user_id
        WHERE r.id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(Review::from))
}

/// Returns `None` when the product does not exist
pub async fn create(
    pool: &PgPool,
    product_id: Uuid,
    user_id: Uuid,
    review: &str,
    rating: i32,
) -> Result<Option<Review>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    if !lock_product(&mut tx, product_id).await? {
        return Ok(None);
    }

    let id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO reviews (id, review, rating, product_id, user_id)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(review)
    .bind(rating)
    .bind(product_id)
    .bind(user_id)
    .fetch_one(&mut *tx)
    .await?;

    recompute_ratings(&mut tx, product_id).await?;
    let created = fetch_in_tx(&mut tx, id).await?;
    tx.commit().await?;

    tracing::info!(review_id = %id, product_id = %product_id, user_id = %user_id, "Review created");
    Ok(created)
}

pub async fn update(
    pool: &PgPool,
    id: Uuid,
    review: Option<&str>,
    rating: Option<i32>,
) -> Result<Option<Review>, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(product_id) = lock_reviewed_product(&mut tx, id).await? else {
        return Ok(None);
    };

    let updated = sqlx::query(
        r#"
        UPDATE reviews
        SET review = COALESCE($2, review), rating = COALESCE($3, rating)
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(review)
    .bind(rating)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() == 0 {
        return Ok(None);
    }

    recompute_ratings(&mut tx, product_id).await?;
    let updated = fetch_in_tx(&mut tx, id).await?;
    tx.commit().await?;
    Ok(updated)
}

/// Returns false when no review had that id
pub async fn delete(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let Some(product_id) = lock_reviewed_product(&mut tx, id).await? else {
        return Ok(false);
    };

    let deleted = sqlx::query("DELETE FROM reviews WHERE id = $1")
        .bind(id)
        .execute(&mut *tx)
        .await?;
    if deleted.rows_affected() == 0 {
        return Ok(false);
    }

    recompute_ratings(&mut tx, product_id).await?;
    tx.commit().await?;
    Ok(true)
}

/// Row-lock the product so concurrent review writes recompute its ratings
/// one after another. Returns false when the product does not exist.
async fn lock_product(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
) -> Result<bool, sqlx::Error> {
    let locked: Option<i32> = sqlx::query_scalar("SELECT 1 FROM products WHERE id = $1 FOR UPDATE")
        .bind(product_id)
        .fetch_optional(&mut **tx)
        .await?;
    Ok(locked.is_some())
}

/// Lock the product a review belongs to, `None` when the review is gone
async fn lock_reviewed_product(
    tx: &mut Transaction<'_, Postgres>,
    review_id: Uuid,
) -> Result<Option<Uuid>, sqlx::Error> {
    let product_id: Option<Uuid> =
        sqlx::query_scalar("SELECT product_id FROM reviews WHERE id = $1")
            .bind(review_id)
            .fetch_optional(&mut **tx)
            .await?;

    let Some(product_id) = product_id else {
        return Ok(None);
    };
    Ok(lock_product(tx, product_id).await?.then_some(product_id))
}

async fn fetch_in_tx(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
) -> Result<Option<Review>, sqlx::Error> {
    let row = sqlx::query_as::<_, ReviewRow>(&format!(
        r#"
        SELECT {REVIEW_COLUMNS}
        FROM reviews r JOIN users u ON u.id = r.user_id
        WHERE r.id = $1
        "#
    ))
    .bind(id)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(Review::from))
}

/// Average rounded to one decimal; no reviews resets to the default
async fn recompute_ratings(
    tx: &mut Transaction<'_, Postgres>,
    product_id: Uuid,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE products p SET
            ratings_quantity = s.quantity,
            ratings_average = CASE
                WHEN s.quantity = 0 THEN $2
                ELSE ROUND(s.average::NUMERIC, 1)::DOUBLE PRECISION
            END
        FROM (
            SELECT COUNT(*)::INT AS quantity, AVG(rating) AS average
            FROM reviews WHERE product_id = $1
        ) s
        WHERE p.id = $1
        "#,
    )
    .bind(product_id)
    .bind(DEFAULT_RATINGS_AVERAGE)
    .execute(&mut **tx)
    .await?;
    Ok(())
}
