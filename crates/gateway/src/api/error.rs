//! Uniform API error body: `{code, message, retryable, retry_after?}`.

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};

pub struct ApiError {
    pub status: StatusCode,
    pub code: String,
    pub message: String,
    pub retryable: bool,
    pub retry_after_secs: Option<u64>,
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            retryable: false,
            retry_after_secs: None,
        }
    }

    pub fn retryable(mut self, retry_after_secs: Option<u64>) -> Self {
        self.retryable = true;
        self.retry_after_secs = retry_after_secs;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "not_found", message)
    }
}

impl From<hs_domain::Error> for ApiError {
    fn from(e: hs_domain::Error) -> Self {
        let status =
            StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let retry_after_secs = match &e {
            hs_domain::Error::PaneUnavailable(_) => Some(5),
            hs_domain::Error::InferenceUnavailable(_) => Some(30),
            _ => None,
        };
        Self {
            status,
            code: e.code().to_owned(),
            message: e.to_string(),
            retryable: e.retryable(),
            retry_after_secs,
        }
    }
}

impl From<hs_store::Error> for ApiError {
    fn from(e: hs_store::Error) -> Self {
        hs_domain::Error::from(e).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // Idempotency replays acknowledge instead of failing.
        if self.code == "conflict" {
            return Json(serde_json::json!({ "status": "already_applied" })).into_response();
        }

        let body = serde_json::json!({
            "code": self.code,
            "message": self.message,
            "retryable": self.retryable,
            "retry_after": self.retry_after_secs,
        });

        let mut response = (self.status, Json(body)).into_response();
        if let Some(secs) = self.retry_after_secs {
            if let Ok(value) = header::HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
