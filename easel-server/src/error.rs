//! API error handling

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use easel_core::ErrorKind;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: Option<ErrorKind>,
    pub message: String,
}

impl ApiError {
    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: None,
            message: msg.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "message": self.message,
                "type": self.kind,
                "code": self.status.as_u16(),
            }
        }));
        (self.status, body).into_response()
    }
}

impl From<easel_core::Error> for ApiError {
    fn from(err: easel_core::Error) -> Self {
        let kind = err.kind();
        let status = match kind {
            ErrorKind::Input | ErrorKind::Scheduler => StatusCode::BAD_REQUEST,
            ErrorKind::Pipeline | ErrorKind::Initialization => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: Some(kind),
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            kind: Some(ErrorKind::Input),
            message: rejection.body_text(),
        }
    }
}
