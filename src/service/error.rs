//! HTTP error responses.
//!
//! Every failure is returned as a JSON body. Prediction failures never leak
//! internals to the client (they are logged in full instead); retrain failures
//! return the underlying message.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Model or scaler not loaded on the server.")]
    ModelUnavailable,

    /// Carries the internal cause for logging only.
    #[error("An internal error occurred during prediction.")]
    Prediction(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("{0}")]
    Retrain(String),

    /// The resident model could not be scored against the dataset.
    #[error("{0}")]
    Status(String),

    #[error("Not found")]
    NotFound,
}

impl ServiceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ModelUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Prediction(_) | ServiceError::Retrain(_) | ServiceError::Status(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServiceError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(rejection: JsonRejection) -> Self {
        ServiceError::InvalidRequest(rejection.body_text())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let body = match &self {
            ServiceError::Status(_) => json!({ "accuracy": "Error" }),
            other => json!({ "error": other.to_string() }),
        };
        (self.status_code(), Json(body)).into_response()
    }
}
