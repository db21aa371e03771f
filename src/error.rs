//! Error taxonomy shared by every endpoint.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    /// Caller input failed shape or value checks.
    #[error("{0}")]
    Validation(String),

    /// Body extractor rejected the request before it reached a handler.
    #[error("{0}")]
    Unprocessable(String),

    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    /// The generation call itself failed or timed out.
    #[error("generation service failed: {0}")]
    UpstreamGeneration(String),

    #[error("generation output is not valid JSON: {0}")]
    BadGenerationOutput(String),

    #[error("generation output does not match the expected schema: {0}")]
    SchemaViolation(String),

    #[error("{0}")]
    EmptyOrMalformedInput(String),

    #[error("storage failure: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn unauthenticated() -> Self {
        Self::Unauthenticated("Could not validate credentials".into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::EmptyOrMalformedInput(_) => StatusCode::BAD_REQUEST,
            Self::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamGeneration(_) => StatusCode::BAD_GATEWAY,
            Self::BadGenerationOutput(_)
            | Self::SchemaViolation(_)
            | Self::Storage(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, %status, "request failed");
        }

        // storage, internal and generation details stay in the logs
        let detail = match &self {
            Self::Storage(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::UpstreamGeneration(_) => "The generation service is unavailable".to_string(),
            Self::BadGenerationOutput(_) => {
                "The generation service returned malformed output".to_string()
            }
            Self::SchemaViolation(_) => {
                "The generation service returned output in an unexpected shape".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (status, Json(json!({ "detail": detail }))).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}
