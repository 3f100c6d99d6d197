use std::time::{Duration, Instant};

use axum::body::Body;
use axum::http::header::{self, HeaderName};
use axum::http::{HeaderMap, HeaderValue, Method};
use axum::response::Response;
use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::auth::Credential;
use crate::error::GateError;
use crate::metrics::UPSTREAM_LATENCY;

const ORGANIZATION_HEADER: &str = "openai-organization";

fn is_hop_by_hop_header(name: &HeaderName) -> bool {
    name == header::CONNECTION
        || name.as_str() == "keep-alive"
        || name == header::PROXY_AUTHENTICATE
        || name == header::PROXY_AUTHORIZATION
        || name == header::TE
        || name == header::TRAILER
        || name == header::TRANSFER_ENCODING
        || name == header::UPGRADE
}

// Inbound headers minus hop-by-hop, host, length and the session cookie
fn upstream_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::new();
    for (name, value) in headers.iter() {
        if is_hop_by_hop_header(name)
            || name == header::HOST
            || name == header::CONTENT_LENGTH
            || name == header::COOKIE
        {
            continue;
        }
        out.append(name, value.clone());
    }
    out
}

fn copy_response_headers(from: &HeaderMap, to: &mut HeaderMap) {
    for (name, value) in from.iter() {
        if is_hop_by_hop_header(name) {
            continue;
        }
        to.append(name, value.clone());
    }
}

/// Forwards admitted requests to the upstream API, streaming both bodies.
pub struct ProxyForwarder {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    organization: Option<String>,
}

impl ProxyForwarder {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: Option<String>,
        organization: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            organization,
        }
    }

    /// Client with an explicit upstream timeout.
    pub fn build_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder().timeout(timeout).build()
    }

    pub fn upstream_url(&self, subpath: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}/{}?{}", self.base_url, subpath, q),
            _ => format!("{}/{}", self.base_url, subpath),
        }
    }

    fn outbound_headers(&self, headers: &HeaderMap, credential: &Credential) -> HeaderMap {
        let mut out = upstream_request_headers(headers);

        if *credential == Credential::ServerKey {
            match self.api_key.as_deref() {
                Some(key) => match HeaderValue::from_str(&format!("Bearer {key}")) {
                    Ok(value) => {
                        out.insert(header::AUTHORIZATION, value);
                    }
                    Err(_) => warn!("server api key is not a valid header value"),
                },
                None => {
                    // the access code itself must not leak upstream
                    out.remove(header::AUTHORIZATION);
                    debug!("no server api key configured");
                }
            }
        }
        if let Some(org) = self.organization.as_deref() {
            if let Ok(value) = HeaderValue::from_str(org) {
                out.insert(ORGANIZATION_HEADER, value);
            }
        }
        out
    }

    pub async fn forward(
        &self,
        method: Method,
        subpath: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        body: Body,
        credential: &Credential,
    ) -> Result<Response, GateError> {
        let url = self.upstream_url(subpath, query);
        let mut request = self
            .client
            .request(method.clone(), &url)
            .headers(self.outbound_headers(headers, credential));
        if method != Method::GET && method != Method::HEAD {
            let data_stream = body
                .into_data_stream()
                .map(|result| result.map_err(|err| std::io::Error::other(err.to_string())));
            request = request.body(reqwest::Body::wrap_stream(data_stream));
        }

        let start_time = Instant::now();
        let upstream = request.send().await?;
        UPSTREAM_LATENCY.observe(start_time.elapsed().as_secs_f64());
        debug!(url = %url, status = upstream.status().as_u16(), "upstream responded");

        let status = upstream.status();
        let upstream_headers = upstream.headers().clone();
        let mut resp = Response::new(Body::from_stream(upstream.bytes_stream()));
        *resp.status_mut() = status;
        copy_response_headers(&upstream_headers, resp.headers_mut());
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forwarder(api_key: Option<&str>) -> ProxyForwarder {
        ProxyForwarder::new(
            reqwest::Client::new(),
            "https://api.example.com/",
            api_key.map(str::to_string),
            Some("org-1".to_string()),
        )
    }

    #[test]
    fn builds_upstream_url() {
        let f = forwarder(None);
        assert_eq!(
            f.upstream_url("v1/models", None),
            "https://api.example.com/v1/models"
        );
        assert_eq!(
            f.upstream_url("dashboard/billing/usage", Some("start_date=2024-01-01")),
            "https://api.example.com/dashboard/billing/usage?start_date=2024-01-01"
        );
    }

    #[test]
    fn strips_hop_by_hop_and_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("keep-alive", HeaderValue::from_static("timeout=5"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("upgrade", HeaderValue::from_static("websocket"));
        headers.insert("host", HeaderValue::from_static("gateway.local"));
        headers.insert("content-length", HeaderValue::from_static("12"));
        headers.insert("cookie", HeaderValue::from_static("appSession=abc"));
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer sk-own"));

        let out = forwarder(Some("sk-server")).outbound_headers(&headers, &Credential::UserKey);

        for name in [
            "connection",
            "keep-alive",
            "transfer-encoding",
            "upgrade",
            "host",
            "content-length",
            "cookie",
        ] {
            assert!(out.get(name).is_none(), "{name} should be removed");
        }
        assert_eq!(out.get("content-type").unwrap(), "application/json");
        assert_eq!(out.get("authorization").unwrap(), "Bearer sk-own");
        assert_eq!(out.get("openai-organization").unwrap(), "org-1");
    }

    #[test]
    fn server_key_replaces_access_code() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer ak-letmein"));

        let out = forwarder(Some("sk-server")).outbound_headers(&headers, &Credential::ServerKey);
        assert_eq!(out.get("authorization").unwrap(), "Bearer sk-server");

        let out = forwarder(None).outbound_headers(&headers, &Credential::ServerKey);
        assert!(out.get("authorization").is_none());
    }
}
