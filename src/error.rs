use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

use crate::diagnosis::DiagnosisError;
use crate::media_ingestion::validation::ValidationError;
use crate::processing::{DecodeError, EncodeError};

pub const DIAGNOSIS_UNAVAILABLE: &str = "Diagnosis unavailable, please try again.";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error(transparent)]
    Diagnosis(#[from] DiagnosisError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Validation(ValidationError::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::Validation(ValidationError::UnsupportedExtension(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            ApiError::Validation(ValidationError::Empty) => StatusCode::BAD_REQUEST,
            ApiError::Decode(DecodeError::UnsupportedFormat(_)) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::Decode(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Encode(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Diagnosis(DiagnosisError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Diagnosis(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Diagnosis(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Validation(_) => "invalid_upload",
            ApiError::Decode(_) => "decode",
            ApiError::Encode(_) | ApiError::Internal(_) => "internal",
            ApiError::Diagnosis(_) => "diagnosis_unavailable",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, ApiError::Diagnosis(e) if e.is_retryable())
    }

    /// Text shown on the page. Provider details stay in the logs.
    fn user_message(&self) -> String {
        match self {
            ApiError::Diagnosis(_) => DIAGNOSIS_UNAVAILABLE.to_string(),
            ApiError::Encode(_) | ApiError::Internal(_) => {
                "Something went wrong while preparing your image. Please try again.".to_string()
            }
            ApiError::Decode(e) => format!("We couldn't read that image: {}", e),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if matches!(self, ApiError::Encode(_) | ApiError::Internal(_)) {
            tracing::error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": self.user_message(),
            "kind": self.kind(),
            "retryable": self.retryable(),
        }));
        (self.status(), body).into_response()
    }
}
