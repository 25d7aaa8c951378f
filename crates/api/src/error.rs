//! API error type and its HTTP mapping

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    #[error("Forbidden")]
    Forbidden,
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Error reported by a third-party identity provider, status passed through
    #[error("Upstream error ({status}): {message}")]
    Upstream { status: StatusCode, message: String },
    /// Outbound email could not be delivered; message is shown to the client
    #[error("Email delivery failed: {0}")]
    EmailDelivery(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Upstream { status, .. } => *status,
            ApiError::EmailDelivery(_) | ApiError::Database(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message safe to return to the client
    fn public_message(&self) -> String {
        match self {
            ApiError::Validation(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::EmailDelivery(msg) => msg.clone(),
            ApiError::Upstream { message, .. } => message.clone(),
            ApiError::Forbidden => "You do not have permission to perform this action".to_string(),
            ApiError::Database(_) | ApiError::Internal(_) => {
                "Something went wrong. Please try again later.".to_string()
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::RowNotFound => ApiError::NotFound("No document found with that ID".into()),
            sqlx::Error::Database(db) if db.code().is_some_and(|c| c.as_ref() == "23505") => {
                tracing::debug!(constraint = ?db.constraint(), "Unique constraint violated");
                ApiError::Conflict("Duplicate field value. Please use another value!".into())
            }
            sqlx::Error::Database(db) if db.code().is_some_and(|c| c.as_ref() == "23514") => {
                ApiError::Validation(format!(
                    "Invalid input data ({})",
                    db.constraint().unwrap_or("check constraint")
                ))
            }
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "Request rejected");
        }

        let body = Json(json!({
            "success": false,
            "error": self.public_message(),
            "code": status.as_u16()
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(err: ApiError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_validation_message_is_public() {
        let (status, body) = body_json(ApiError::Validation("Bad input".into())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad input");
        assert_eq!(body["success"], false);
        assert_eq!(body["code"], 400);
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) =
            body_json(ApiError::Database("relation \"users\" does not exist".into())).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body["error"].as_str().unwrap().contains("relation"));
    }

    #[tokio::test]
    async fn test_upstream_status_passes_through() {
        let (status, body) = body_json(ApiError::Upstream {
            status: StatusCode::BAD_REQUEST,
            message: "Bad Request: invalid_grant".into(),
        })
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Bad Request: invalid_grant");
    }

    #[test]
    fn test_row_not_found_maps_to_404() {
        let err: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_email_delivery_is_500_with_message() {
        let err = ApiError::EmailDelivery("try later".into());
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "try later");
    }
}
