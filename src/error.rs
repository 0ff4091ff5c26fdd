use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::warn;

use crate::convert::ConvertError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

/// Error returned by HTTP handlers, rendered as a JSON body.
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub code: Option<&'static str>,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    pub fn method_not_allowed() -> Self {
        Self {
            status: StatusCode::METHOD_NOT_ALLOWED,
            message: "Method not allowed".to_string(),
            code: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: Some("INTERNAL_ERROR"),
        }
    }

    fn conversion_failed(message: String, code: &'static str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message,
            code: Some(code),
        }
    }
}

impl From<ConvertError> for ApiError {
    fn from(error: ConvertError) -> Self {
        let message = error.to_string();
        match error {
            ConvertError::InvalidInput(_) => Self::bad_request(message),
            ConvertError::Timeout(_) => Self::conversion_failed(message, "DOWNLOAD_TIMEOUT"),
            ConvertError::ExternalToolFailure(_) => {
                Self::conversion_failed(message, "DOWNLOAD_FAILED")
            }
            ConvertError::OutputNotFound => Self::conversion_failed(message, "OUTPUT_NOT_FOUND"),
            ConvertError::OutputTooLarge { .. } => {
                Self::conversion_failed(message, "OUTPUT_TOO_LARGE")
            }
            ConvertError::Io { .. } => Self::internal(message),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, code = ?self.code, "{}", self.message);
        }

        // Server-side failures carry `success: false`; client errors only the message.
        let success = self.status.is_server_error().then_some(false);
        let body = Json(ErrorBody {
            error: self.message,
            success,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}
