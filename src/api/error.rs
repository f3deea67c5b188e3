//! Error envelope.
//!
//! Every failed request is answered with
//! `{"error": {"code", "message", "details"?, "request_id"?}}` and the HTTP
//! status of the underlying [`Error`].

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::Value;

use crate::types::{Error, RequestId};

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// An [`Error`] bound to the request it failed.
#[derive(Debug)]
pub struct ApiError {
    pub error: Error,
    pub request_id: Option<RequestId>,
}

impl ApiError {
    pub fn new(error: Error, request_id: &RequestId) -> Self {
        Self {
            error,
            request_id: Some(request_id.clone()),
        }
    }

    fn details(&self) -> Option<Value> {
        match &self.error {
            Error::RateLimited {
                retry_after_seconds,
            } => Some(serde_json::json!({ "retry_after_seconds": retry_after_seconds })),
            Error::Conflict { job_group_id } => {
                Some(serde_json::json!({ "job_group_id": job_group_id }))
            }
            Error::TooManyUrls { count, max } => {
                Some(serde_json::json!({ "count": count, "max": max }))
            }
            _ => None,
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        let message = if self.error.is_client_facing() {
            self.error.to_string()
        } else {
            "internal error".to_string()
        };
        ErrorEnvelope {
            error: ErrorBody {
                code: self.error.code(),
                message,
                details: self.details(),
                request_id: self.request_id.as_ref().map(|id| id.to_string()),
            },
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        Self {
            error,
            request_id: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(
                request_id = ?self.request_id.as_ref().map(RequestId::as_str),
                error = %self.error,
                "request_failed"
            );
        }

        let mut response = (status, Json(self.envelope())).into_response();
        if let Error::RateLimited {
            retry_after_seconds,
        } = &self.error
        {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(*retry_after_seconds));
        }
        response
    }
}
