//! Domain error to HTTP response mapping
//!
//! This is the only place that knows which status code and body shape each
//! error kind gets. Handlers return [`ApiError`] built from an [`RpaasError`].

use std::any::Any;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use rpaas_models::RpaasError;
use serde_json::json;
use tracing::error;

pub const INTERNAL_SERVER_ERROR: &str = "Internal Server Error";

/// Media types the binder understands, advertised on 415 responses
pub const ACCEPTED_MEDIA_TYPES: &str =
    "application/json, application/x-www-form-urlencoded, multipart/form-data";

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub struct ApiError {
    error: RpaasError,
    accept: Option<&'static str>,
}

impl ApiError {
    /// 415 carrying an `Accept` header with what the endpoint expects.
    pub fn unsupported_media_type(expected: &'static str) -> Self {
        Self {
            error: RpaasError::unsupported(format!(
                "unsupported media type, expected {}",
                expected
            )),
            accept: Some(expected),
        }
    }

    pub fn inner(&self) -> &RpaasError {
        &self.error
    }
}

impl From<RpaasError> for ApiError {
    fn from(error: RpaasError) -> Self {
        Self {
            error,
            accept: None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        RpaasError::Internal(error).into()
    }
}

/// Status code for an error kind; shared with the streaming close codes.
pub fn status_of(error: &RpaasError) -> StatusCode {
    match error {
        RpaasError::NotFound(_) => StatusCode::NOT_FOUND,
        RpaasError::Conflict(_) => StatusCode::CONFLICT,
        RpaasError::Validation(_) => StatusCode::BAD_REQUEST,
        RpaasError::BadGateway(_) => StatusCode::BAD_GATEWAY,
        RpaasError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        RpaasError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_of(&self.error);
        let body = match &self.error {
            RpaasError::NotFound(msg) | RpaasError::Conflict(msg) | RpaasError::Validation(msg) => {
                json!({ "Msg": msg })
            }
            RpaasError::BadGateway(msg) | RpaasError::Unsupported(msg) => {
                json!({ "message": msg })
            }
            RpaasError::Internal(e) => {
                error!(error = ?e, "Request failed");
                json!({ "message": INTERNAL_SERVER_ERROR })
            }
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(accept) = self.accept {
            response
                .headers_mut()
                .insert(header::ACCEPT, HeaderValue::from_static(accept));
        }
        response
    }
}

/// Response for a handler panic caught by `CatchPanicLayer`.
pub fn handle_panic(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    };
    error!(
        panic = %detail,
        backtrace = %std::backtrace::Backtrace::force_capture(),
        "Handler panicked"
    );
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "message": INTERNAL_SERVER_ERROR })),
    )
        .into_response()
}
