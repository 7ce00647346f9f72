use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use hb_lifecycle::LifecycleError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found")]
    NotFound,

    #[error("{0}")]
    BadRequest(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("hypervisor error: {0}")]
    Hypervisor(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        match e {
            LifecycleError::HostNotFound(_) => Self::NotFound,
            LifecycleError::InvalidHostName(_) => Self::BadRequest(e.to_string()),
            LifecycleError::DuplicateHostName(_) | LifecycleError::InvalidState { .. } => {
                Self::Conflict(e.to_string())
            }
            LifecycleError::Infra(_) => Self::Hypervisor(e.to_string()),
            LifecycleError::Provision(_) | LifecycleError::Store(_) | LifecycleError::Task(_) => {
                Self::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Hypervisor(_) => StatusCode::BAD_GATEWAY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %self, "request failed");
        }

        let body = serde_json::json!({ "error": self.to_string() });
        (status, axum::Json(body)).into_response()
    }
}
