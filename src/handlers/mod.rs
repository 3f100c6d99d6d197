mod health;
mod metrics;
mod proxy;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use proxy::{panic_response, proxy_handler};

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route(
            "/proxy/{*path}",
            get(proxy_handler).post(proxy_handler).options(proxy_handler),
        )
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
