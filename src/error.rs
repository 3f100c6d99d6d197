use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;
use tracing::warn;

use crate::metrics::REJECTED_TOTAL;
use crate::store::StoreError;

// Every way a proxied request can end without an upstream response
#[derive(Debug, Error)]
pub enum GateError {
    #[error("you are not allowed to request {0}")]
    ForbiddenPath(String),
    #[error("unauthenticated")]
    Unauthenticated,
    #[error("{0}")]
    Unauthorized(&'static str),
    #[error("You have reached request rate limitation")]
    RateLimited,
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("rate limit store unavailable")]
    StoreUnavailable(#[from] StoreError),
    #[error("{0}")]
    Internal(String),
}

impl GateError {
    pub fn status(&self) -> StatusCode {
        match self {
            GateError::ForbiddenPath(_) | GateError::RateLimited => StatusCode::FORBIDDEN,
            GateError::Unauthenticated | GateError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            GateError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GateError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // metric label
    pub fn reason(&self) -> &'static str {
        match self {
            GateError::ForbiddenPath(_) => "forbidden_path",
            GateError::Unauthenticated => "unauthenticated",
            GateError::Unauthorized(_) => "unauthorized",
            GateError::RateLimited => "rate_limited",
            GateError::Upstream(_) => "upstream",
            GateError::StoreUnavailable(_) => "store_unavailable",
            GateError::Internal(_) => "internal",
        }
    }
}

pub fn error_body(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(json!({ "error": true, "msg": msg.into() }))).into_response()
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        REJECTED_TOTAL.with_label_values(&[self.reason()]).inc();
        if let GateError::StoreUnavailable(err) = &self {
            warn!(error = %err, "rate limit store failed, denying request");
        }
        error_body(self.status(), self.to_string())
    }
}
