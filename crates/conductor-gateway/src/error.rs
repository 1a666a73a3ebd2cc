use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use conductor_core::ConductorError;
use serde::Serialize;
use tracing::error;

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

/// Error returned by gateway handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Conductor(#[from] ConductorError),

    #[error("{0}")]
    BadRequest(String),

    /// A queue result arrived after its dispatcher stopped waiting.
    #[error("{0}")]
    Gone(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Conductor(e) => match e {
                ConductorError::TaskNotFound(_) | ConductorError::TemplateNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                ConductorError::InvalidStateTransition { .. } => StatusCode::CONFLICT,
                ConductorError::InvalidTemplate(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Gone(_) => StatusCode::GONE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ApiError::Conductor(e) => match e {
                ConductorError::TaskNotFound(_) => "task_not_found",
                ConductorError::TemplateNotFound(_) => "template_not_found",
                ConductorError::InvalidStateTransition { .. } => "invalid_state_transition",
                ConductorError::InvalidTemplate(_) => "invalid_template",
                _ => "internal",
            },
            ApiError::BadRequest(_) => "bad_request",
            ApiError::Gone(_) => "gone",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
            kind: self.kind(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
