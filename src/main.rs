mod allowlist;
mod auth;
mod config;
mod error;
mod forward;
mod handlers;
mod metrics;
mod models;
mod pipeline;
mod rate_limit;
mod state;
mod store;
mod transform;

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::allowlist::PathAllowlist;
use crate::auth::{AuthGate, HttpSessionResolver};
use crate::config::Args;
use crate::forward::ProxyForwarder;
use crate::pipeline::GatingPipeline;
use crate::rate_limit::SlidingWindowLimiter;
use crate::state::AppState;
use crate::store::{MemoryStore, RateLimitStore, RedisStore};
use crate::transform::ResponseTransformer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chat_gateway=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // parse cli arguments
    let args = Args::parse();

    let store: Arc<dyn RateLimitStore> = match args.redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisStore::connect(url)
                .await
                .context("failed to connect to redis")?,
        ),
        None => {
            warn!("no redis url configured, rate windows are kept in memory");
            Arc::new(MemoryStore::new())
        }
    };

    let client = ProxyForwarder::build_client(args.upstream_timeout())
        .context("failed to build upstream client")?;
    let session_client = HttpSessionResolver::build_client(args.session_timeout())
        .context("failed to build session client")?;
    let policies = args.rate_policies();
    for (plan, policy) in &policies {
        info!(
            plan = ?plan,
            max_requests = policy.max_requests,
            window_secs = policy.window.as_secs(),
            "rate limit"
        );
    }

    let pipeline = GatingPipeline::new(
        PathAllowlist::upstream_catalog(),
        AuthGate::new(
            Arc::new(HttpSessionResolver::new(
                session_client,
                args.session_url.clone(),
            )),
            args.credential_policy(),
        ),
        SlidingWindowLimiter::new(store, policies, args.rate_limit_prefix.clone()),
        ProxyForwarder::new(
            client,
            &args.upstream_url,
            args.api_key.clone(),
            args.openai_org_id.clone(),
        ),
        ResponseTransformer::new(args.excluded_models()),
    );

    // creating shared state
    let state = Arc::new(AppState { pipeline });
    let app = handlers::router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(port = args.port, upstream = %args.upstream_url, "gateway listening");
    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
