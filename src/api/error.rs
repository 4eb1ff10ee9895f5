use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use thiserror::Error;

use crate::errors::SearchError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Search(#[from] SearchError),
    /// Body or query string that could not be decoded.
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    PayloadTooLarge(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Search(e) => match e {
                SearchError::Validation(_) | SearchError::DimensionMismatch { .. } => {
                    StatusCode::BAD_REQUEST
                }
                SearchError::NotFound(_) => StatusCode::NOT_FOUND,
                SearchError::Conflict(_) => StatusCode::CONFLICT,
                SearchError::Embedding(_) => StatusCode::BAD_GATEWAY,
                SearchError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "validation_error",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::Search(e) => match e {
                SearchError::Validation(_) | SearchError::DimensionMismatch { .. } => {
                    "validation_error"
                }
                SearchError::NotFound(_) => "not_found",
                SearchError::Conflict(_) => "conflict",
                SearchError::Embedding(_) => "embedding_failed",
                SearchError::Storage(_) => "storage_error",
            },
        }
    }

    /// Storage details stay in the logs.
    fn public_message(&self) -> String {
        match self {
            ApiError::Search(SearchError::Storage(_)) => "internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge(rejection.body_text())
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        let code = self.code();

        if status.is_server_error() {
            tracing::error!(code, status = %status, error = %self, "api_error");
        } else {
            tracing::debug!(code, status = %status, error = %self, "api_error");
        }

        let body = Json(ErrorResponse {
            code,
            message: self.public_message(),
        });
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_kinds_to_statuses() {
        let cases = [
            (SearchError::validation("x"), StatusCode::BAD_REQUEST, "validation_error"),
            (
                SearchError::DimensionMismatch { expected: 3, actual: 2 },
                StatusCode::BAD_REQUEST,
                "validation_error",
            ),
            (SearchError::not_found("x"), StatusCode::NOT_FOUND, "not_found"),
            (SearchError::conflict("x"), StatusCode::CONFLICT, "conflict"),
            (SearchError::Embedding("x".into()), StatusCode::BAD_GATEWAY, "embedding_failed"),
            (SearchError::Storage("x".into()), StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
        ];
        for (err, status, code) in cases {
            let api = ApiError::from(err);
            assert_eq!(api.status_code(), status);
            assert_eq!(api.code(), code);
        }
    }

    #[test]
    fn storage_details_are_hidden() {
        let api = ApiError::from(SearchError::Storage("password=hunter2".into()));
        assert_eq!(api.public_message(), "internal storage error");
        let api = ApiError::from(SearchError::validation("k must be positive"));
        assert_eq!(api.public_message(), "k must be positive");
    }
}
