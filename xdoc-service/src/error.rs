use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::error;
use xdoc_core::{UpstreamError, XdocError};

pub type ApiResult<T> = Result<Json<T>, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Diagnosis(#[from] XdocError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Diagnosis(e) => match e {
                XdocError::Schema(_) | XdocError::Type { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                XdocError::UnsupportedDisease(_) => StatusCode::NOT_FOUND,
                XdocError::InvalidAudience(_) => StatusCode::BAD_REQUEST,
                XdocError::ModelNotLoaded(_) => StatusCode::SERVICE_UNAVAILABLE,
                XdocError::Upstream(UpstreamError::Timeout(_)) => StatusCode::GATEWAY_TIMEOUT,
                XdocError::Upstream(_) => StatusCode::BAD_GATEWAY,
                XdocError::Artifact { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Diagnosis(e) => e.kind(),
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Internal(_) => "internal_error",
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            ApiError::Diagnosis(XdocError::Schema(violation)) => {
                Some(json!({ "feature": violation.feature() }))
            }
            ApiError::Diagnosis(XdocError::Type { feature, .. }) => {
                Some(json!({ "feature": feature }))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        // upstream and internal details stay in the logs
        let message = match &self {
            ApiError::Diagnosis(XdocError::Upstream(e)) => {
                error!(kind = e.kind(), "explanation upstream failed: {}", e);
                match e {
                    UpstreamError::Timeout(_) => "Explanation service timed out".to_string(),
                    _ => "Explanation service failed".to_string(),
                }
            }
            ApiError::Diagnosis(XdocError::Artifact { .. }) | ApiError::Internal(_) => {
                error!("internal error: {}", self);
                "An internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        let mut body = json!({
            "error": message,
            "kind": self.kind(),
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }
        (status, Json(body)).into_response()
    }
}
