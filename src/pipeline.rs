use axum::body::Body;
use axum::http::{HeaderMap, Method};
use axum::response::Response;
use tracing::{debug, info, trace};

use crate::allowlist::PathAllowlist;
use crate::auth::AuthGate;
use crate::error::GateError;
use crate::forward::ProxyForwarder;
use crate::rate_limit::{Admission, SlidingWindowLimiter};
use crate::transform::ResponseTransformer;

// Last stage a request got through; a rejection stops it where it is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    PathChecked,
    Authenticated,
    RateChecked,
    Proxied,
    Transformed,
    Done,
}

fn advance(stage: &mut Stage, next: Stage) {
    trace!(from = ?*stage, to = ?next, "stage");
    *stage = next;
}

// One proxied request, as extracted by the HTTP layer
pub struct ProxyRequest {
    pub method: Method,
    pub subpath: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Body,
}

pub struct GatingPipeline {
    allowlist: PathAllowlist,
    auth: AuthGate,
    limiter: SlidingWindowLimiter,
    forwarder: ProxyForwarder,
    transformer: ResponseTransformer,
}

impl GatingPipeline {
    pub fn new(
        allowlist: PathAllowlist,
        auth: AuthGate,
        limiter: SlidingWindowLimiter,
        forwarder: ProxyForwarder,
        transformer: ResponseTransformer,
    ) -> Self {
        Self {
            allowlist,
            auth,
            limiter,
            forwarder,
            transformer,
        }
    }

    pub async fn run(&self, req: ProxyRequest) -> Result<Response, GateError> {
        let (stage, result) = self.run_with_stage(req).await;
        match &result {
            Ok(_) => debug!(stage = ?stage, "request finished"),
            Err(e) => info!(last_stage = ?stage, reason = e.reason(), "request rejected"),
        }
        result
    }

    pub async fn run_with_stage(&self, req: ProxyRequest) -> (Stage, Result<Response, GateError>) {
        let mut stage = Stage::Start;
        let result = self.run_stages(req, &mut stage).await;
        if result.is_ok() {
            advance(&mut stage, Stage::Done);
        }
        (stage, result)
    }

    async fn run_stages(&self, req: ProxyRequest, stage: &mut Stage) -> Result<Response, GateError> {
        let ProxyRequest {
            method,
            subpath,
            query,
            headers,
            body,
        } = req;

        if !self.allowlist.is_allowed(&subpath) {
            return Err(GateError::ForbiddenPath(subpath));
        }
        advance(stage, Stage::PathChecked);

        let verified = self.auth.verify(&headers).await?;
        advance(stage, Stage::Authenticated);

        let now_ms = chrono::Utc::now().timestamp_millis();
        if self.limiter.admit(&verified.identity, now_ms).await? == Admission::Deny {
            return Err(GateError::RateLimited);
        }
        advance(stage, Stage::RateChecked);

        let response = self
            .forwarder
            .forward(
                method,
                &subpath,
                query.as_deref(),
                &headers,
                body,
                &verified.credential,
            )
            .await?;
        advance(stage, Stage::Proxied);

        let response = self.transformer.maybe_transform(&subpath, response).await;
        advance(stage, Stage::Transformed);
        debug!(subject = %verified.identity.subject, subpath = %subpath, "request proxied");
        Ok(response)
    }
}
