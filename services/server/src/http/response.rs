// Shared HTTP error envelope (C7): every handler error collapses to the
// same `{code, message, details}` JSON body the gateway's wire protocol
// already defines for its own error frames.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chat_protocol::{error_codes, HttpErrorEnvelope};

use super::HttpError;

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            HttpError::BadRequest(_) => (StatusCode::BAD_REQUEST, error_codes::PARSE_ERROR),
            HttpError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, error_codes::INTERNAL_ERROR),
            HttpError::Auth(_) => (StatusCode::UNAUTHORIZED, error_codes::AUTH_FAILED),
        };
        let body = HttpErrorEnvelope {
            code: code.to_owned(),
            message: self.to_string(),
            details: None,
        };
        (status, Json(body)).into_response()
    }
}
