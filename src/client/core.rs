use super::builder::ClientBuilder;
use super::call::Call;
use super::request::{open_stream_async, open_stream_blocking, prepare, ApiRequest};
use super::stream::{lines_async, LineIter};
use crate::cache::{default_cache, CacheManager};
use crate::config::ClientConfig;
use crate::resilience::RetryPolicy;
use crate::session::{ExecutionMode, SessionManager, SessionSettings};
use crate::{BoxStream, Error, Result};
use serde_json::Value;
use std::sync::Arc;

/// Client for the generation API that works from blocking code and from
/// inside a tokio runtime with the same call expressions.
///
/// ```rust,no_run
/// use blossom_ai::{ApiRequest, Client};
///
/// # fn blocking() -> blossom_ai::Result<()> {
/// let client = Client::from_env()?;
/// let reply = client.get("/hello").wait()?;
/// println!("{}", reply.text()?);
/// # Ok(())
/// # }
/// # async fn cooperative() -> blossom_ai::Result<()> {
/// let client = Client::from_env()?;
/// let reply = client.get("/hello").await?;
/// # Ok(())
/// # }
/// ```
///
/// Clones share sessions; closing any clone closes them all.
#[derive(Clone)]
pub struct Client {
    pub(crate) config: Arc<ClientConfig>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) retry: RetryPolicy,
    pub(crate) cache: Option<Arc<CacheManager>>,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new().config(config).build()
    }

    /// [`ClientConfig::from_env`] with the default retry policy.
    pub fn from_env() -> Result<Self> {
        Self::new(ClientConfig::from_env())
    }

    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        retry: RetryPolicy,
        cache: Option<Arc<CacheManager>>,
    ) -> Self {
        let sessions = SessionManager::new(SessionSettings::from(&config));
        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            retry,
            cache,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn cache(&self) -> Option<&Arc<CacheManager>> {
        self.cache.as_ref()
    }

    pub(crate) fn effective_cache(&self) -> Arc<CacheManager> {
        self.cache.clone().unwrap_or_else(default_cache)
    }

    pub fn call(&self, request: ApiRequest) -> Call<'_> {
        Call::new(self, request)
    }

    pub fn get(&self, path: impl Into<String>) -> Call<'_> {
        self.call(ApiRequest::get(path))
    }

    pub fn post_json(&self, path: impl Into<String>, body: Value) -> Call<'_> {
        self.call(ApiRequest::post(path, body))
    }

    /// Open a streaming request and yield its body line by line.
    ///
    /// Establishing the response is retried per the policy and bounded by the
    /// request timeout. After that only silence longer than
    /// `stream_chunk_timeout` or a body error ends the stream, with one
    /// `Stream` error; a stream may run far longer than the request timeout.
    pub async fn stream_lines(&self, request: ApiRequest) -> Result<BoxStream<'static, String>> {
        let session = self.sessions.acquire_for(ExecutionMode::Cooperative)?;
        let lease = session.lease()?;
        let http = lease.async_client()?;
        let cfg = &*self.config;
        let (resp, context) = self
            .retry
            .execute(|attempt| {
                let prepared = prepare(cfg, &request, attempt.remaining);
                let http = http.clone();
                async move {
                    let prepared = prepared?;
                    let resp = open_stream_async(&http, &prepared).await?;
                    Ok((resp, prepared.context()))
                }
            })
            .await?;
        Ok(lines_async(resp, lease, cfg.stream_chunk_timeout, context))
    }

    /// Blocking counterpart of [`Client::stream_lines`]. Here the session's
    /// `timeout` bounds the header wait and every individual read, so silence
    /// longer than `timeout` ends the iterator with a `Stream` error.
    pub fn stream_lines_blocking(&self, request: ApiRequest) -> Result<LineIter> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::validation(
                "blocking stream inside an async runtime; use `stream_lines` instead",
            ));
        }
        let session = self.sessions.acquire_for(ExecutionMode::Blocking)?;
        let lease = session.lease()?;
        let http = lease.blocking_client()?;
        let cfg = &*self.config;
        let (resp, context) = self.retry.execute_blocking(|attempt| {
            let prepared = prepare(cfg, &request, attempt.remaining)?;
            let resp = open_stream_blocking(&http, &prepared)?;
            Ok((resp, prepared.context()))
        })?;
        Ok(LineIter::new(resp, lease, context))
    }

    /// Close every session this client (and its clones) opened. Idempotent;
    /// later calls fail with `SessionClosed`.
    pub fn close(&self) {
        self.sessions.close_all();
    }

    pub fn is_closed(&self) -> bool {
        self.sessions.is_closed()
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.config.base_url)
            .field("sessions", &self.sessions.live_sessions())
            .field("cached", &self.cache.is_some())
            .finish()
    }
}
