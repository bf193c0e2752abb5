use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use shared::ErrorResponse;

use crate::analysis::AnalysisError;
use crate::imaging::DecodeError;
use crate::inference::InferenceError;
use crate::storage::StoreError;

/// Every failure a request can end in, mapped onto an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Analysis(#[from] AnalysisError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("Failed to render report: {0}")]
    Render(#[from] askama::Error),
    #[error("{0}")]
    BadRequest(String),
    #[error("Upload failed: {0}")]
    Multipart(String),
    #[error("Worker pool unavailable")]
    Blocking(#[from] actix_web::error::BlockingError),
}

// Stored as text so the error can cross the blocking pool.
impl From<actix_multipart::MultipartError> for ApiError {
    fn from(err: actix_multipart::MultipartError) -> Self {
        ApiError::Multipart(err.to_string())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Analysis(err) => match err {
                AnalysisError::Validation(_) => StatusCode::BAD_REQUEST,
                AnalysisError::Decode(DecodeError::UnsupportedFormat(_)) => {
                    StatusCode::UNSUPPORTED_MEDIA_TYPE
                }
                AnalysisError::Decode(_) => StatusCode::BAD_REQUEST,
                AnalysisError::Inference(InferenceError::ModelNotLoaded(_)) => {
                    StatusCode::SERVICE_UNAVAILABLE
                }
                AnalysisError::Inference(_) | AnalysisError::Report(_) | AnalysisError::Preview(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::Store(StoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Store(_) | ApiError::Render(_) | ApiError::Blocking(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ApiError::BadRequest(_) | ApiError::Multipart(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            log::error!("Request failed: {}", self);
        } else {
            log::warn!("Request rejected: {}", self);
        }
        HttpResponse::build(status).json(ErrorResponse::new(self.to_string()))
    }
}
