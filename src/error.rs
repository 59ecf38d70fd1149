use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::db::StoreError;
use crate::services::rate_limit::RateLimitDecision;
use crate::services::storage::StorageError;

/// One rejected request field.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    error: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    details: Vec<FieldError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_ms: Option<u64>,
}

/// Errors surfaced to HTTP callers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Request validation failed")]
    Validation(Vec<FieldError>),

    #[error("Malformed request: {0}")]
    MalformedBody(String),

    #[error("Invalid job id")]
    InvalidJobId,

    #[error("Submission rejected")]
    BotDetected,

    #[error("Too many submissions, try again later")]
    RateLimited(RateLimitDecision),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Actor id is required")]
    Unauthorized,

    #[error("Job belongs to another actor")]
    Forbidden,

    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Photo storage error: {0}")]
    Storage(#[from] StorageError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) | ApiError::MalformedBody(_) | ApiError::InvalidJobId => {
                StatusCode::BAD_REQUEST
            }
            ApiError::BotDetected | ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Store(_) | ApiError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_failed",
            ApiError::MalformedBody(_) => "malformed_body",
            ApiError::InvalidJobId => "invalid_job_id",
            ApiError::BotDetected => "bot_detected",
            ApiError::RateLimited(_) => "rate_limited",
            ApiError::NotFound(_) => "not_found",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden => "forbidden",
            ApiError::Unavailable(_) => "unavailable",
            ApiError::Store(_) | ApiError::Storage(_) => "internal",
        }
    }
}

impl From<garde::Report> for ApiError {
    fn from(report: garde::Report) -> Self {
        let details = report
            .iter()
            .map(|(path, error)| FieldError {
                field: path.to_string(),
                message: error.to_string(),
            })
            .collect();
        ApiError::Validation(details)
    }
}

/// `X-RateLimit-*` headers describing the caller's current window.
pub fn rate_limit_headers(decision: &RateLimitDecision) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    headers.insert(
        "x-ratelimit-reset",
        HeaderValue::from(decision.reset_at.timestamp().max(0)),
    );
    headers
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal failures are logged here and reported generically.
        let message = match &self {
            ApiError::Store(e) => {
                tracing::error!(error = %e, "Store failure while handling request");
                "Internal server error".to_string()
            }
            ApiError::Storage(e) => {
                tracing::error!(error = %e, "Photo storage failure while handling request");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut headers = HeaderMap::new();
        let mut retry_after_ms = None;
        if let ApiError::RateLimited(decision) = &self {
            let wait_ms = decision.retry_after_ms(Utc::now());
            headers = rate_limit_headers(decision);
            headers.insert(header::RETRY_AFTER, HeaderValue::from(wait_ms.div_ceil(1000)));
            retry_after_ms = Some(wait_ms);
        }

        let body = ErrorBody {
            error: self.code(),
            message,
            details: match self {
                ApiError::Validation(details) => details,
                _ => Vec::new(),
            },
            retry_after_ms,
        };

        (status, headers, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use chrono::Duration;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_rate_limited_response_carries_headers() {
        let decision = RateLimitDecision {
            allowed: false,
            limit: 10,
            remaining: 0,
            reset_at: Utc::now() + Duration::seconds(30),
        };
        let response = ApiError::RateLimited(decision).into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["x-ratelimit-limit"], "10");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "0");
        let retry: u64 = response.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=30).contains(&retry));

        let body = body_json(response).await;
        assert_eq!(body["error"], "rate_limited");
        assert!(body["retryAfterMs"].as_u64().unwrap() <= 30_000);
    }

    #[tokio::test]
    async fn test_validation_details_are_listed() {
        let response = ApiError::Validation(vec![FieldError {
            field: "actorId".to_string(),
            message: "not set".to_string(),
        }])
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["details"][0]["field"], "actorId");
    }

    #[tokio::test]
    async fn test_store_errors_do_not_leak_detail() {
        let response =
            ApiError::Store(StoreError::Corrupt("secret table state".to_string())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
    }
}
