//! API error type — every failure surfaces as `{"detail": "..."}` with
//! the right status. Internal details stay in the server logs.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};

#[derive(Debug)]
pub enum ApiError {
    /// 401 — missing or malformed credentials.
    Unauthorized(String),
    /// 403 — valid credentials, but no (active) tenant behind them.
    Forbidden(String),
    /// 404
    NotFound(String),
    /// 409
    Conflict(String),
    /// 422
    Validation(String),
    /// 429 — no retry guidance by design.
    RateLimited,
    /// 500 — generic body; detail logged server-side only.
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn detail(&self) -> &str {
        match self {
            ApiError::Unauthorized(d)
            | ApiError::Forbidden(d)
            | ApiError::NotFound(d)
            | ApiError::Conflict(d)
            | ApiError::Validation(d) => d,
            ApiError::RateLimited => "Rate limit exceeded",
            ApiError::Internal(_) => "Internal error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            tracing::error!(detail = %detail, "internal error");
        }
        (
            self.status(),
            Json(serde_json::json!({ "detail": self.detail() })),
        )
            .into_response()
    }
}

impl From<spark_domain::Error> for ApiError {
    fn from(e: spark_domain::Error) -> Self {
        use spark_domain::Error as E;
        match e {
            E::Duplicate(_) => {
                ApiError::Conflict("A knowledge item with this exact content already exists.".into())
            }
            E::NotFound(d) => ApiError::NotFound(d),
            E::Validation(d) => ApiError::Validation(d),
            E::Auth(d) => ApiError::Unauthorized(d),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping() {
        assert_eq!(ApiError::Unauthorized("x".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::Forbidden("x".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(ApiError::NotFound("x".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::Validation("x".into()).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(ApiError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        assert_eq!(ApiError::Internal("secret sql".into()).detail(), "Internal error");
    }

    #[test]
    fn duplicate_store_error_maps_to_conflict() {
        let api: ApiError = spark_domain::Error::Duplicate("23505".into()).into();
        assert!(matches!(api, ApiError::Conflict(_)));
    }

    #[test]
    fn validation_error_maps_to_422() {
        let api: ApiError = spark_domain::Error::Validation("bad".into()).into();
        assert!(matches!(api, ApiError::Validation(_)));
    }
}
