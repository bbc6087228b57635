use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use reqwest::{RequestBuilder, Url};
use serde_json::Value;

use crate::config::Endpoint;
use crate::error::{GatewayError, Result};

/// `User-Agent` sent on every upstream call.
pub const USER_AGENT: &str = concat!("device-gateway/", env!("CARGO_PKG_VERSION"));

/// Connection-scoped headers that must not be copied between hops.
/// `content-length` is recomputed from the buffered body.
const HOP_BY_HOP: &[HeaderName] = &[
    header::CONNECTION,
    header::CONTENT_LENGTH,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(name) || name.as_str() == "keep-alive"
}

/// A fully buffered upstream answer, relayed to the caller verbatim.
#[derive(Debug, Clone)]
pub struct RelayedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl RelayedResponse {
    /// The body as JSON when it parses, otherwise as a lossy UTF-8 string.
    pub fn body_json(&self) -> Value {
        serde_json::from_slice(&self.body)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

impl IntoResponse for RelayedResponse {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        let headers = response.headers_mut();
        // The body conversion sets its own content-type; the upstream's wins.
        headers.remove(header::CONTENT_TYPE);
        for (name, value) in self.headers.iter() {
            if !is_hop_by_hop(name) {
                headers.append(name.clone(), value.clone());
            }
        }
        response
    }
}

/// HTTP client for device-side endpoints.
///
/// Every call is a single attempt with the endpoint's timeout: failures
/// are reported to the caller immediately and never retried here.
#[derive(Clone, Debug)]
pub struct UpstreamClient {
    http: reqwest::Client,
    token: Option<String>,
}

impl UpstreamClient {
    pub fn new(token: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(std::io::Error::other)?;
        Ok(Self { http, token })
    }

    fn authorize(&self, request: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        match token.or(self.token.as_deref()) {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    /// `GET` the endpoint, appending the caller's query string if any.
    pub async fn get(
        &self,
        name: &'static str,
        endpoint: &Endpoint,
        query: Option<&str>,
    ) -> Result<RelayedResponse> {
        let mut url = endpoint.url.clone();
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.set_query(Some(query));
        }

        let request = self.http.get(url).timeout(endpoint.timeout);
        self.send(name, self.authorize(request, None)).await
    }

    /// `POST` a body to the endpoint with the given content type.
    pub async fn post(
        &self,
        name: &'static str,
        endpoint: &Endpoint,
        content_type: HeaderValue,
        extra_headers: HeaderMap,
        body: Bytes,
    ) -> Result<RelayedResponse> {
        let request = self
            .http
            .post(endpoint.url.clone())
            .timeout(endpoint.timeout)
            .header(header::CONTENT_TYPE, content_type)
            .headers(extra_headers)
            .body(body);
        self.send(name, self.authorize(request, None)).await
    }

    /// Fetch a single still image. Only a 2xx answer is relayed.
    pub async fn fetch_snapshot(
        &self,
        endpoint: &Endpoint,
        api_key: Option<&str>,
    ) -> Result<RelayedResponse> {
        let request = self.http.get(endpoint.url.clone()).timeout(endpoint.timeout);
        let relayed = self.send("snapshot", self.authorize(request, api_key)).await?;
        if !relayed.status.is_success() {
            return Err(GatewayError::UpstreamStatus {
                endpoint: "snapshot",
                status: relayed.status.to_string(),
            });
        }
        Ok(relayed)
    }

    async fn send(&self, name: &'static str, request: RequestBuilder) -> Result<RelayedResponse> {
        let unreachable = |source| GatewayError::UpstreamUnreachable {
            endpoint: name,
            source,
        };

        let response = request.send().await.map_err(unreachable)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(unreachable)?;

        tracing::debug!(
            endpoint = name,
            status = status.as_u16(),
            bytes = body.len(),
            "upstream responded"
        );
        Ok(RelayedResponse {
            status,
            headers,
            body,
        })
    }

    /// Open a long-lived upstream video feed for pass-through.
    ///
    /// No overall timeout applies. The upstream must answer 200 with a
    /// `multipart/*` or `video/*` content type; anything else is rejected
    /// before the caller sees a byte.
    pub async fn open_stream(&self, url: &Url, api_key: Option<&str>) -> Result<reqwest::Response> {
        let request = self.authorize(self.http.get(url.clone()), api_key);
        let response = request
            .send()
            .await
            .map_err(|source| GatewayError::UpstreamUnreachable {
                endpoint: "video",
                source,
            })?;

        if response.status() != StatusCode::OK {
            return Err(GatewayError::UpstreamStatus {
                endpoint: "video",
                status: response.status().to_string(),
            });
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !is_stream_content_type(content_type) {
            return Err(GatewayError::UpstreamStatus {
                endpoint: "video",
                status: format!("incompatible content type {content_type:?}"),
            });
        }

        Ok(response)
    }
}

fn is_stream_content_type(content_type: &str) -> bool {
    let lower = content_type.trim().to_ascii_lowercase();
    lower.starts_with("multipart/") || lower.starts_with("video/")
}
