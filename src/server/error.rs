//! JSON error responses

use crate::error::{BgRemovalError, ErrorKind};
use axum::{
    extract::multipart::{MultipartError, MultipartRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{debug, error};

/// Error returned by HTTP handlers
///
/// Serialised as `{"status": <u16>, "code": "<code>", "message": "<text>"}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: u16,
    code: &'a str,
    message: &'a str,
}

impl ApiError {
    #[must_use]
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn missing_file(field: &str) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            "missing_file",
            format!("No '{field}' field or file part in multipart request"),
        )
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    fn from_multipart_status(status: StatusCode, message: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::new(status, "payload_too_large", message)
        } else {
            Self::new(StatusCode::BAD_REQUEST, "invalid_multipart", message)
        }
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(value: MultipartRejection) -> Self {
        Self::from_multipart_status(value.status(), value.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(value: MultipartError) -> Self {
        Self::from_multipart_status(value.status(), value.body_text())
    }
}

impl From<BgRemovalError> for ApiError {
    fn from(value: BgRemovalError) -> Self {
        let (status, code) = match value.kind() {
            ErrorKind::Decode => (StatusCode::BAD_REQUEST, "decode_error"),
            ErrorKind::Processing => (StatusCode::INTERNAL_SERVER_ERROR, "processing_error"),
            ErrorKind::Encode => (StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            ErrorKind::Configuration | ErrorKind::Internal => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error")
            },
        };
        Self::new(status, code, value.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!(status = self.status.as_u16(), code = self.code, "{}", self.message);
        } else {
            debug!(status = self.status.as_u16(), code = self.code, "{}", self.message);
        }

        let body = ErrorBody {
            status: self.status.as_u16(),
            code: self.code,
            message: &self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (BgRemovalError::decode("bad"), StatusCode::BAD_REQUEST, "decode_error"),
            (
                BgRemovalError::inference("boom"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_error",
            ),
            (
                BgRemovalError::processing("shape"),
                StatusCode::INTERNAL_SERVER_ERROR,
                "processing_error",
            ),
            (BgRemovalError::encode("png"), StatusCode::INTERNAL_SERVER_ERROR, "encode_error"),
            (BgRemovalError::internal("join"), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
            (BgRemovalError::model("gone"), StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        ];

        for (error, status, code) in cases {
            let api_error = ApiError::from(error);
            assert_eq!(api_error.status(), status);
            assert_eq!(api_error.code(), code);
        }
    }

    #[test]
    fn test_multipart_status_mapping() {
        let too_large = ApiError::from_multipart_status(StatusCode::PAYLOAD_TOO_LARGE, "big".into());
        assert_eq!(too_large.code(), "payload_too_large");

        let malformed = ApiError::from_multipart_status(StatusCode::UNSUPPORTED_MEDIA_TYPE, "x".into());
        assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
        assert_eq!(malformed.code(), "invalid_multipart");
    }

    #[test]
    fn test_response_status() {
        let response = ApiError::missing_file("file").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers()[axum::http::header::CONTENT_TYPE],
            "application/json"
        );
    }
}
