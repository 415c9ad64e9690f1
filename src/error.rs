use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request body: {0}")]
    Rejected(#[from] JsonRejection),
    #[error("tokenizer error: {0}")]
    Tokenizer(String),
    #[error("model execution failed: {0}")]
    Inference(String),
    #[error("model artifact missing: {0}")]
    MissingArtifact(String),
    #[error("model hub request failed: {0}")]
    Hub(String),
    #[error("no inference backend compiled in, rebuild with the `tch-backend` feature")]
    BackendUnavailable,
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServiceError::Rejected(rejection) => rejection.status(),
            ServiceError::Tokenizer(_)
            | ServiceError::Inference(_)
            | ServiceError::MissingArtifact(_)
            | ServiceError::Hub(_)
            | ServiceError::BackendUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Server-side failures stay opaque to the caller.
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
            "internal server error".to_string()
        } else {
            match &self {
                ServiceError::Rejected(rejection) => rejection.body_text(),
                other => other.to_string(),
            }
        };

        let body = serde_json::json!({
            "error": message,
        });

        (status, axum::Json(body)).into_response()
    }
}
