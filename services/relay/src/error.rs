use crate::generation::GenerationError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, warn};

/// Errors surfaced at the request-handler boundary
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("generation failed: {0}")]
    Generation(#[from] GenerationError),

    #[error("storage write failed: {0:#}")]
    Storage(anyhow::Error),

    #[error("wardrobe query failed: {0:#}")]
    Query(anyhow::Error),
}

/// Error envelope shared by every endpoint
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
}

pub const GENERATION_FAILED_MESSAGE: &str =
    "AI가 이미지를 생성하지 못했습니다. 다른 이미지로 다시 시도해주세요.";
pub const STORAGE_FAILED_MESSAGE: &str = "이미지 처리 중 서버 내부 오류가 발생했습니다.";
pub const QUERY_FAILED_MESSAGE: &str = "추천을 생성하는 중 서버 내부 오류가 발생했습니다.";

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message shown to the client; upstream details stay in the logs
    pub fn public_message(&self) -> String {
        match self {
            ApiError::BadRequest(message) => message.clone(),
            ApiError::Generation(_) => GENERATION_FAILED_MESSAGE.to_string(),
            ApiError::Storage(_) => STORAGE_FAILED_MESSAGE.to_string(),
            ApiError::Query(_) => QUERY_FAILED_MESSAGE.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::BadRequest(message) => warn!(message = %message, "Rejected request"),
            ApiError::Generation(e) => error!(error = %e, kind = e.kind(), "Generation error"),
            ApiError::Storage(e) => error!(error = ?e, "Storage error"),
            ApiError::Query(e) => error!(error = ?e, "Query error"),
        }

        let body = ErrorResponse {
            success: false,
            message: self.public_message(),
        };

        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            ApiError::BadRequest("missing".to_string()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Generation(GenerationError::NoCandidates).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Storage(anyhow::anyhow!("denied")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_generation_sub_cases_collapse_to_one_message() {
        let no_parts = ApiError::Generation(GenerationError::NoContentParts);
        let no_image = ApiError::Generation(GenerationError::NoInlineImage {
            model_text: Some("I cannot do that".to_string()),
        });

        assert_eq!(no_parts.public_message(), GENERATION_FAILED_MESSAGE);
        assert_eq!(no_image.public_message(), GENERATION_FAILED_MESSAGE);

        // The logged form keeps the model's own words
        assert!(no_image.to_string().contains("I cannot do that"));
        assert!(!no_image.public_message().contains("I cannot do that"));
    }

    #[test]
    fn test_upstream_details_not_exposed() {
        let err = ApiError::Query(anyhow::anyhow!("permission denied on projects/secret"));
        assert!(!err.public_message().contains("secret"));
    }
}
