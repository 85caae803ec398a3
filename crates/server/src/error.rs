use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use lexrag::CoreError;
use serde_json::json;

pub type ServerResult<T> = Result<T, ServerError>;

/// Server error wrapper mapping the core taxonomy onto HTTP.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found")]
    NotFound,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl ServerError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Core(core) => match core {
                CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
                CoreError::NotFound(_) => StatusCode::NOT_FOUND,
                CoreError::Pipeline(_) => StatusCode::INTERNAL_SERVER_ERROR,
                CoreError::ExternalDependency(_) => StatusCode::BAD_GATEWAY,
                CoreError::GateBlocked { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            },
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            ServerError::Core(core) => match core {
                CoreError::BadRequest(_) => "BAD_REQUEST",
                CoreError::NotFound(_) => "NOT_FOUND",
                CoreError::Pipeline(_) => "PIPELINE_ERROR",
                CoreError::ExternalDependency(_) => "EXTERNAL_DEPENDENCY",
                CoreError::GateBlocked { .. } => "GATE_BLOCKED",
                CoreError::Cancelled => "CANCELLED",
            },
            ServerError::BadRequest(_) => "BAD_REQUEST",
            ServerError::NotFound => "NOT_FOUND",
            ServerError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "code": self.error_code(),
                "message": self.to_string(),
            }
        }));
        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ServerError {
    fn from(err: anyhow::Error) -> Self {
        ServerError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn taxonomy_maps_to_status_codes() {
        assert_eq!(
            ServerError::Core(CoreError::BadRequest("x".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ServerError::Core(CoreError::ExternalDependency("x".into())).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ServerError::Core(CoreError::NotFound("x".into())).status_code(),
            StatusCode::NOT_FOUND
        );
    }
}
