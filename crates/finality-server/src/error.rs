use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use finality_trial::TrialError;

#[derive(Debug)]
pub enum AppError {
    BadRequest(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BadRequest(m)
            | Self::ServiceUnavailable(m)
            | Self::Internal(m) => write!(f, "{m}"),
        }
    }
}

impl From<TrialError> for AppError {
    fn from(e: TrialError) -> Self {
        match e {
            TrialError::Store(_) => Self::Internal(e.to_string()),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            Self::ServiceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            Self::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}
