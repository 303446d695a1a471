//! Success envelope shared by every handler.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// `{ "success": true, "code": "200.000", "message": "...", "data": ... }`
#[derive(Debug)]
pub struct ApiResponse<T> {
    status: StatusCode,
    message: String,
    data: T,
}

#[derive(Serialize)]
struct Envelope<'a, T> {
    success: bool,
    code: &'static str,
    message: &'a str,
    data: &'a T,
}

impl<T: Serialize> ApiResponse<T> {
    /// 200 with `data`.
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::OK,
            message: message.into(),
            data,
        }
    }

    /// 201 with `data`.
    pub fn created(message: impl Into<String>, data: T) -> Self {
        Self {
            status: StatusCode::CREATED,
            message: message.into(),
            data,
        }
    }
}

#[cfg(test)]
impl<T> ApiResponse<T> {
    pub(crate) fn message(&self) -> &str {
        &self.message
    }

    pub(crate) fn data(&self) -> &T {
        &self.data
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        let code = if self.status == StatusCode::CREATED {
            "201.000"
        } else {
            "200.000"
        };
        let body = Envelope {
            success: true,
            code,
            message: &self.message,
            data: &self.data,
        };
        (self.status, Json(body)).into_response()
    }
}
