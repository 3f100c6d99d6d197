use std::any::Any;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, RawQuery, State};
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Response};
use tracing::error;

use crate::allowlist::normalize_subpath;
use crate::error::GateError;
use crate::metrics::REQUEST_TOTAL;
use crate::pipeline::ProxyRequest;
use crate::state::AppState;

// GET | POST | OPTIONS /proxy/{*path}
pub async fn proxy_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    Path(path): Path<String>,
    RawQuery(query): RawQuery,
    headers: HeaderMap,
    body: Body,
) -> Response {
    // CORS preflight, answered before any check
    if method == Method::OPTIONS {
        return Json(serde_json::json!({ "body": "OK" })).into_response();
    }
    REQUEST_TOTAL.inc();

    let request = ProxyRequest {
        method,
        subpath: normalize_subpath(&path),
        query,
        headers,
        body,
    };
    match state.pipeline.run(request).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!(panic = %detail, "handler panicked");
    GateError::Internal("internal error".to_string()).into_response()
}
