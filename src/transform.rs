use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::Response;
use futures_util::{Stream, StreamExt, stream};
use http_body_util::BodyExt;
use thiserror::Error;
use tracing::warn;

use crate::allowlist::LIST_MODELS_PATH;
use crate::metrics::TRANSFORM_FAILURES;
use crate::models::ModelList;

// Model listings are small; anything bigger is not a listing
const MAX_MODEL_LIST_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("malformed model listing: {0}")]
    Malformed(#[from] serde_json::Error),
}

// Drops excluded model ids from a successful listing, best effort
#[derive(Debug, Clone, Default)]
pub struct ResponseTransformer {
    excluded_prefixes: Vec<String>,
}

impl ResponseTransformer {
    pub fn new(excluded_prefixes: Vec<String>) -> Self {
        Self { excluded_prefixes }
    }

    pub fn applies_to(&self, subpath: &str, status: StatusCode) -> bool {
        !self.excluded_prefixes.is_empty() && subpath == LIST_MODELS_PATH && status == StatusCode::OK
    }

    fn is_excluded(&self, model_id: &str) -> bool {
        self.excluded_prefixes
            .iter()
            .any(|prefix| model_id.starts_with(prefix.as_str()))
    }

    pub fn filter_model_list(&self, body: &[u8]) -> Result<Vec<u8>, TransformError> {
        let mut listing: ModelList = serde_json::from_slice(body)?;
        listing.data.retain(|model| !self.is_excluded(&model.id));
        Ok(serde_json::to_vec(&listing)?)
    }

    pub async fn maybe_transform(&self, subpath: &str, response: Response) -> Response {
        if !self.applies_to(subpath, response.status()) {
            return response;
        }

        let (mut parts, body) = response.into_parts();
        let original = match buffer_listing(body).await {
            Buffered::Complete(bytes) => bytes,
            Buffered::Partial(body) => {
                // too large or broken: hand back exactly what upstream sent
                TRANSFORM_FAILURES.inc();
                return Response::from_parts(parts, body);
            }
        };

        let body = match self.filter_model_list(&original) {
            Ok(filtered) => Body::from(filtered),
            Err(e) => {
                TRANSFORM_FAILURES.inc();
                warn!(error = %e, "passing model listing through unfiltered");
                Body::from(original)
            }
        };
        parts.headers.remove(header::CONTENT_LENGTH);
        Response::from_parts(parts, body)
    }
}

enum Buffered {
    Complete(Bytes),
    // already-read chunks replayed ahead of the unread rest
    Partial(Body),
}

fn replay<S>(prefix: Vec<Bytes>, rest: S) -> Body
where
    S: Stream<Item = Result<Bytes, axum::Error>> + Send + 'static,
{
    Body::from_stream(stream::iter(prefix.into_iter().map(Ok)).chain(rest))
}

async fn buffer_listing(mut body: Body) -> Buffered {
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut size = 0;

    while let Some(frame) = body.frame().await {
        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "model listing body failed");
                return Buffered::Partial(replay(chunks, stream::once(async move { Err(e) })));
            }
        };
        let Ok(data) = frame.into_data() else {
            continue;
        };
        size += data.len();
        chunks.push(data);
        if size > MAX_MODEL_LIST_BYTES {
            warn!(size, "model listing too large to filter");
            return Buffered::Partial(replay(chunks, body.into_data_stream()));
        }
    }
    Buffered::Complete(chunks.concat().into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    const LISTING: &str = r#"{"object":"list","data":[
        {"id":"gpt-4-x","object":"model","owned_by":"openai"},
        {"id":"gpt-3.5-y","object":"model","owned_by":"openai"}
    ]}"#;

    fn ids(body: &[u8]) -> Vec<String> {
        let value: Value = serde_json::from_slice(body).unwrap();
        value["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap().to_string())
            .collect()
    }

    fn upstream(status: StatusCode, body: &'static str) -> Response {
        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = status;
        resp.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        resp
    }

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[test]
    fn removes_excluded_models_and_keeps_fields() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let filtered = transformer.filter_model_list(LISTING.as_bytes()).unwrap();

        assert_eq!(ids(&filtered), vec!["gpt-3.5-y"]);
        let value: Value = serde_json::from_slice(&filtered).unwrap();
        assert_eq!(value["object"], "list");
        assert_eq!(value["data"][0]["owned_by"], "openai");
    }

    #[test]
    fn filtering_is_idempotent() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let once = transformer.filter_model_list(LISTING.as_bytes()).unwrap();
        let again = transformer.filter_model_list(LISTING.as_bytes()).unwrap();
        assert_eq!(once, again);
        assert_eq!(transformer.filter_model_list(&once).unwrap(), once);
    }

    #[tokio::test]
    async fn inactive_policy_passes_listing_through() {
        let transformer = ResponseTransformer::default();
        let resp = transformer
            .maybe_transform("v1/models", upstream(StatusCode::OK, LISTING))
            .await;
        assert_eq!(ids(&body_bytes(resp).await), vec!["gpt-4-x", "gpt-3.5-y"]);
    }

    #[tokio::test]
    async fn filters_successful_listing() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let resp = transformer
            .maybe_transform("v1/models", upstream(StatusCode::OK, LISTING))
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers().get(header::CONTENT_TYPE).unwrap(), "application/json");
        assert_eq!(ids(&body_bytes(resp).await), vec!["gpt-3.5-y"]);
    }

    #[tokio::test]
    async fn other_paths_and_errors_untouched() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);

        let resp = transformer
            .maybe_transform("v1/chat/completions", upstream(StatusCode::OK, LISTING))
            .await;
        assert_eq!(ids(&body_bytes(resp).await).len(), 2);

        let resp = transformer
            .maybe_transform("v1/models", upstream(StatusCode::UNAUTHORIZED, LISTING))
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ids(&body_bytes(resp).await).len(), 2);
    }

    #[tokio::test]
    async fn malformed_listing_is_returned_as_is() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let resp = transformer
            .maybe_transform("v1/models", upstream(StatusCode::OK, "not json"))
            .await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_bytes(resp).await, Bytes::from_static(b"not json"));
    }

    #[test]
    fn serialized_listing_shape() {
        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let filtered = transformer
            .filter_model_list(json!({"data": [{"id": "gpt-4o"}]}).to_string().as_bytes())
            .unwrap();
        assert_eq!(
            serde_json::from_slice::<Value>(&filtered).unwrap(),
            json!({"data": []})
        );
    }

    #[tokio::test]
    async fn oversized_listing_is_passed_through() {
        let filler = "x".repeat(MAX_MODEL_LIST_BYTES + 1024);
        let original = format!(
            r#"{{"object":"list","data":[{{"id":"gpt-4-x","note":"{filler}"}},{{"id":"gpt-3.5-y"}}]}}"#
        );
        let chunks: Vec<Result<Bytes, std::io::Error>> = original
            .as_bytes()
            .chunks(1024 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let mut resp = Response::new(Body::from_stream(stream::iter(chunks)));
        resp.headers_mut().insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from(original.len()),
        );

        let transformer = ResponseTransformer::new(vec!["gpt-4".to_string()]);
        let resp = transformer.maybe_transform("v1/models", resp).await;

        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(header::CONTENT_LENGTH).unwrap(),
            &header::HeaderValue::from(original.len())
        );
        let body = body_bytes(resp).await;
        assert_eq!(body.len(), original.len());
        assert_eq!(body, Bytes::from(original));
    }
}
