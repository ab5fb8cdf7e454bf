//! Request building and response parsing shared by both execution paths.

use crate::cache::CacheKey;
use crate::config::ClientConfig;
use crate::{Error, ErrorContext, Result};
use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::Method;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// One logical API call, independent of how it will be executed.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(String, String)>,
    body: Option<Value>,
    timeout: Option<Duration>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).json(body)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((name.into(), value.to_string()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Per-request deadline, replacing the client default.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Method, URL, query (order-insensitive) and body.
    pub fn cache_key(&self, base_url: &str) -> Result<CacheKey> {
        let mut query = self.query.clone();
        query.sort();
        CacheKey::for_call(
            "http",
            &(self.method.as_str(), base_url, &self.path, &query, &self.body),
        )
    }
}

/// A successful response with its body fully read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub request_id: String,
    #[serde(with = "crate::utils::base64_bytes")]
    pub body: Bytes,
}

impl ApiResponse {
    pub fn bytes(&self) -> &Bytes {
        &self.body
    }

    pub fn text(&self) -> Result<String> {
        String::from_utf8(self.body.to_vec()).map_err(|e| {
            Error::unknown_with_context(
                format!("response body is not UTF-8: {}", e),
                ErrorContext::new().with_request_id(self.request_id.clone()),
            )
        })
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn is_json(&self) -> bool {
        self.content_type
            .as_deref()
            .map(|ct| ct.contains("json"))
            .unwrap_or(false)
    }
}

/// A single attempt ready to hand to either reqwest client.
pub(crate) struct Prepared {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub timeout: Duration,
    pub request_id: String,
    /// The URL with credentials left out, for logs and errors.
    display_url: String,
}

impl Prepared {
    pub fn context(&self) -> ErrorContext {
        ErrorContext::new()
            .with_operation("http.request")
            .with_method(self.method.as_str())
            .with_url(self.display_url.clone())
            .with_request_id(self.request_id.clone())
    }

    fn log(&self) {
        debug!(
            request_id = %self.request_id,
            method = %self.method,
            url = %self.display_url,
            timeout_ms = self.timeout.as_millis() as u64,
            "sending request"
        );
    }
}

/// Build one attempt. Each attempt gets a fresh request id; `remaining`
/// narrows the timeout to what is left of the overall deadline.
pub(crate) fn prepare(
    cfg: &ClientConfig,
    req: &ApiRequest,
    remaining: Option<Duration>,
) -> Result<Prepared> {
    let request_id = Uuid::new_v4().to_string();
    let raw = format!(
        "{}/{}",
        cfg.base_url.trim_end_matches('/'),
        req.path.trim_start_matches('/')
    );
    let mut url = Url::parse(&raw).map_err(|e| {
        Error::validation_with_context(
            format!("invalid request URL: {}", e),
            ErrorContext::new().with_url(raw.clone()),
        )
    })?;
    if !req.query.is_empty() {
        url.query_pairs_mut().extend_pairs(req.query.iter());
    }
    let display_url = url.to_string();

    let mut headers = HeaderMap::new();
    for (name, value) in &req.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| Error::validation(format!("invalid header name {:?}: {}", name, e)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| Error::validation(format!("invalid header value: {}", e)))?;
        headers.insert(name, value);
    }
    if let Ok(id) = HeaderValue::from_str(&request_id) {
        headers.insert(REQUEST_ID_HEADER, id);
    }
    if let Some(token) = cfg.api_token.as_deref() {
        if req.method == Method::GET {
            url.query_pairs_mut().append_pair("token", token);
        } else {
            let bearer = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|_| Error::configuration("API token contains invalid header characters"))?;
            headers.insert(AUTHORIZATION, bearer);
        }
    }

    let body = match &req.body {
        Some(v) => {
            headers
                .entry(CONTENT_TYPE)
                .or_insert(HeaderValue::from_static("application/json"));
            Some(serde_json::to_vec(v)?)
        }
        None => None,
    };

    let mut timeout = req.timeout.unwrap_or(cfg.timeout);
    if let Some(left) = remaining {
        timeout = timeout.min(left);
    }

    Ok(Prepared {
        method: req.method.clone(),
        url,
        headers,
        body,
        timeout,
        request_id,
        display_url,
    })
}

/// Turn a read status, headers and body into the response or a classified error.
pub(crate) fn finish(
    status: u16,
    headers: &HeaderMap,
    body: Bytes,
    request_id: String,
    context: ErrorContext,
) -> Result<ApiResponse> {
    if !(200..300).contains(&status) {
        return Err(Error::from_status(status, retry_after(headers), &body, context));
    }
    debug!(request_id = %request_id, status, bytes = body.len(), "response received");
    Ok(ApiResponse {
        status,
        content_type: headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        request_id,
        body,
    })
}

fn retry_after(headers: &HeaderMap) -> Option<&str> {
    headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok())
}

fn blocking_request(
    client: &reqwest::blocking::Client,
    prepared: &Prepared,
) -> reqwest::blocking::RequestBuilder {
    let builder = client
        .request(prepared.method.clone(), prepared.url.clone())
        .headers(prepared.headers.clone());
    match &prepared.body {
        Some(body) => builder.body(body.clone()),
        None => builder,
    }
}

fn async_request(client: &reqwest::Client, prepared: &Prepared) -> reqwest::RequestBuilder {
    let builder = client
        .request(prepared.method.clone(), prepared.url.clone())
        .headers(prepared.headers.clone());
    match &prepared.body {
        Some(body) => builder.body(body.clone()),
        None => builder,
    }
}

/// Buffered call: the timeout covers the whole exchange, body included.
pub(crate) fn send_blocking(
    client: &reqwest::blocking::Client,
    prepared: Prepared,
) -> Result<ApiResponse> {
    prepared.log();
    let ctx = prepared.context();
    let resp = blocking_request(client, &prepared)
        .timeout(prepared.timeout)
        .send()
        .map_err(|e| Error::from_reqwest(e, ctx.clone()))?;
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp.bytes().map_err(|e| Error::from_reqwest(e, ctx.clone()))?;
    finish(status, &headers, body, prepared.request_id, ctx)
}

pub(crate) async fn send_async(client: &reqwest::Client, prepared: Prepared) -> Result<ApiResponse> {
    prepared.log();
    let ctx = prepared.context();
    let resp = async_request(client, &prepared)
        .timeout(prepared.timeout)
        .send()
        .await
        .map_err(|e| Error::from_reqwest(e, ctx.clone()))?;
    let status = resp.status().as_u16();
    let headers = resp.headers().clone();
    let body = resp
        .bytes()
        .await
        .map_err(|e| Error::from_reqwest(e, ctx.clone()))?;
    finish(status, &headers, body, prepared.request_id, ctx)
}

/// Open a stream and check the status, leaving the body unread.
///
/// No per-request timeout is set: reqwest would apply it until the body
/// ends. The session client's timeout bounds the header wait and each read.
pub(crate) fn open_stream_blocking(
    client: &reqwest::blocking::Client,
    prepared: &Prepared,
) -> Result<reqwest::blocking::Response> {
    prepared.log();
    let ctx = prepared.context();
    let resp = blocking_request(client, prepared)
        .send()
        .map_err(|e| Error::from_reqwest(e, ctx.clone()))?;
    let status = resp.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(resp);
    }
    let headers = resp.headers().clone();
    let body = resp.bytes().unwrap_or_default();
    Err(Error::from_status(status, retry_after(&headers), &body, ctx))
}

/// Async counterpart of [`open_stream_blocking`]. The attempt timeout bounds
/// only the wait for response headers; body silence is the line stream's
/// chunk timeout to police.
pub(crate) async fn open_stream_async(
    client: &reqwest::Client,
    prepared: &Prepared,
) -> Result<reqwest::Response> {
    prepared.log();
    let ctx = prepared.context();
    let sent = tokio::time::timeout(prepared.timeout, async_request(client, prepared).send()).await;
    let resp = match sent {
        Ok(resp) => resp.map_err(|e| Error::from_reqwest(e, ctx.clone()))?,
        Err(_) => {
            return Err(Error::timeout_with_context(
                format!("no response headers within {}ms", prepared.timeout.as_millis()),
                ctx,
            ))
        }
    };
    let status = resp.status().as_u16();
    if (200..300).contains(&status) {
        return Ok(resp);
    }
    let headers = resp.headers().clone();
    let body = tokio::time::timeout(prepared.timeout, resp.bytes())
        .await
        .ok()
        .and_then(|b| b.ok())
        .unwrap_or_default();
    Err(Error::from_status(status, retry_after(&headers), &body, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cfg() -> ClientConfig {
        ClientConfig::new().with_base_url("https://api.example.com/")
    }

    #[test]
    fn test_get_carries_token_as_query() {
        let req = ApiRequest::get("/models").query("limit", 5);
        let p = prepare(&cfg().with_api_token("secret"), &req, None).unwrap();
        assert_eq!(p.url.as_str(), "https://api.example.com/models?limit=5&token=secret");
        assert!(p.headers.get(AUTHORIZATION).is_none());
        assert!(!p.context().url.unwrap_or_default().contains("secret"));
    }

    #[test]
    fn test_post_carries_bearer_and_json() {
        let req = ApiRequest::post("openai", json!({"model": "openai"}));
        let p = prepare(&cfg().with_api_token("secret"), &req, None).unwrap();
        assert_eq!(p.headers[AUTHORIZATION], "Bearer secret");
        assert_eq!(p.headers[CONTENT_TYPE], "application/json");
        assert!(p.body.is_some());
    }

    #[test]
    fn test_each_attempt_has_a_fresh_request_id() {
        let req = ApiRequest::get("x");
        let a = prepare(&cfg(), &req, None).unwrap();
        let b = prepare(&cfg(), &req, None).unwrap();
        assert_ne!(a.request_id, b.request_id);
        assert_eq!(a.headers[REQUEST_ID_HEADER], a.request_id.as_str());
    }

    #[test]
    fn test_timeout_narrowed_by_deadline() {
        let req = ApiRequest::get("x").timeout(Duration::from_secs(20));
        let p = prepare(&cfg(), &req, Some(Duration::from_secs(3))).unwrap();
        assert_eq!(p.timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_finish_classifies_failures() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        let err = finish(429, &headers, Bytes::new(), "id".into(), ErrorContext::new()).unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));

        let ok = finish(200, &HeaderMap::new(), Bytes::from_static(b"hi"), "id".into(), ErrorContext::new())
            .unwrap();
        assert_eq!(ok.text().unwrap(), "hi");
    }

    #[test]
    fn test_cache_key_ignores_query_order() {
        let a = ApiRequest::get("img").query("w", 1).query("h", 2);
        let b = ApiRequest::get("img").query("h", 2).query("w", 1);
        assert_eq!(a.cache_key("u").unwrap(), b.cache_key("u").unwrap());
        assert_ne!(a.cache_key("u").unwrap(), ApiRequest::get("img").cache_key("u").unwrap());
    }
}
