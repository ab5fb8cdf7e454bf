//! One call expression, two execution paths.

use super::core::Client;
use super::request::{prepare, send_async, send_blocking, ApiRequest, ApiResponse};
use crate::cache::CacheManager;
use crate::session::ExecutionMode;
use crate::{Error, ErrorContext, Result};
use futures::future::BoxFuture;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A pending API call.
///
/// - `.await` runs it on the current tokio runtime
/// - [`Call::wait`] runs it to completion on the calling thread
/// - [`Call::dispatch`] picks one of the two by probing the context
///
/// Dropping the future before it completes cancels the in-flight request;
/// the session it used stays open for the next call.
#[must_use = "a call does nothing until it is awaited, waited on, or dispatched"]
pub struct Call<'a> {
    client: &'a Client,
    request: ApiRequest,
    cache_ttl: Option<Option<Duration>>,
}

/// Result of [`Call::dispatch`].
pub enum Dispatched<'a> {
    /// Ran on the calling thread.
    Ready(Result<ApiResponse>),
    /// Inside a runtime; await to get the response.
    Deferred(BoxFuture<'a, Result<ApiResponse>>),
}

impl std::fmt::Debug for Dispatched<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dispatched::Ready(r) => f.debug_tuple("Ready").field(r).finish(),
            Dispatched::Deferred(_) => f.write_str("Deferred(..)"),
        }
    }
}

impl<'a> Dispatched<'a> {
    pub fn is_deferred(&self) -> bool {
        matches!(self, Dispatched::Deferred(_))
    }

    /// Await a deferred call or unwrap a ready one.
    pub async fn resolve(self) -> Result<ApiResponse> {
        match self {
            Dispatched::Ready(r) => r,
            Dispatched::Deferred(fut) => fut.await,
        }
    }
}

struct CacheSlot {
    cache: Arc<CacheManager>,
    key: String,
    ttl: Option<Duration>,
}

impl<'a> Call<'a> {
    pub(crate) fn new(client: &'a Client, request: ApiRequest) -> Self {
        Self {
            client,
            request,
            cache_ttl: None,
        }
    }

    pub fn request(&self) -> &ApiRequest {
        &self.request
    }

    /// Serve a successful response from the client's cache for `ttl`
    /// (`None` = no expiry). Clients built without a cache use the
    /// process-wide default.
    pub fn cached(mut self, ttl: Option<Duration>) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Pick the path for the current context.
    pub fn dispatch(self) -> Dispatched<'a> {
        match ExecutionMode::detect() {
            ExecutionMode::Blocking => Dispatched::Ready(self.wait()),
            ExecutionMode::Cooperative => Dispatched::Deferred(self.into_future()),
        }
    }

    fn cache_slot(&self) -> Option<CacheSlot> {
        let ttl = self.cache_ttl?;
        let cache = self.client.effective_cache();
        match self.request.cache_key(&self.client.config().base_url) {
            Ok(key) => Some(CacheSlot {
                cache,
                key: key.into(),
                ttl,
            }),
            Err(e) => {
                warn!(error = %e, "request not cacheable; sending uncached");
                None
            }
        }
    }

    fn context(&self, mode: ExecutionMode) -> ErrorContext {
        ErrorContext::new()
            .with_operation("call")
            .with_method(self.request.method().as_str())
            .with_metadata("path", self.request.path())
            .with_metadata("mode", mode.as_str())
    }

    /// Run on the calling thread.
    ///
    /// Fails with `Validation` on any thread that has a tokio runtime entered,
    /// where blocking would stall the tasks on it; await the call there. That
    /// includes `spawn_blocking` threads, which may block: use
    /// [`Call::dispatch`] there and drive the deferred call with
    /// `Handle::current().block_on(call.dispatch().resolve())`.
    pub fn wait(self) -> Result<ApiResponse> {
        if tokio::runtime::Handle::try_current().is_ok() {
            return Err(Error::validation_with_context(
                "blocking call inside an async runtime; `.await` the call instead",
                self.context(ExecutionMode::Blocking),
            ));
        }
        let slot = self.cache_slot();
        if let Some(hit) = slot.as_ref().and_then(|s| lookup(s, s.cache.get::<ApiResponse>(&s.key))) {
            return Ok(hit);
        }

        let session = self.client.sessions().acquire_for(ExecutionMode::Blocking)?;
        let lease = session.lease()?;
        let http = lease.blocking_client()?;
        let cfg = self.client.config();
        let request = &self.request;
        let response = self.client.retry_policy().execute_blocking(|attempt| {
            send_blocking(&http, prepare(cfg, request, attempt.remaining)?)
        })?;

        if let Some(s) = &slot {
            store(s, s.cache.set_with_ttl(&s.key, &response, s.ttl));
        }
        Ok(response)
    }

    async fn run(self) -> Result<ApiResponse> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(Error::validation_with_context(
                "async call polled outside a tokio runtime; use `wait()` instead",
                self.context(ExecutionMode::Cooperative),
            ));
        }
        let slot = self.cache_slot();
        if let Some(s) = &slot {
            let found = s.cache.get_async::<ApiResponse>(&s.key).await;
            if let Some(hit) = lookup(s, found) {
                return Ok(hit);
            }
        }

        let session = self.client.sessions().acquire_for(ExecutionMode::Cooperative)?;
        let lease = session.lease()?;
        let http = lease.async_client()?;
        let cfg = self.client.config();
        let request = &self.request;
        let response = self
            .client
            .retry_policy()
            .execute(|attempt| {
                let prepared = prepare(cfg, request, attempt.remaining);
                let http = http.clone();
                async move { send_async(&http, prepared?).await }
            })
            .await?;

        if let Some(s) = &slot {
            let stored = s.cache.set_async(&s.key, &response, s.ttl).await;
            store(s, stored);
        }
        Ok(response)
    }
}

impl<'a> IntoFuture for Call<'a> {
    type Output = Result<ApiResponse>;
    type IntoFuture = BoxFuture<'a, Result<ApiResponse>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.run())
    }
}

fn lookup(slot: &CacheSlot, found: Result<Option<ApiResponse>>) -> Option<ApiResponse> {
    match found {
        Ok(Some(hit)) => {
            debug!(key = %slot.key, request_id = %hit.request_id, "served from cache");
            Some(hit)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(key = %slot.key, error = %e, "cache lookup failed; sending request");
            None
        }
    }
}

fn store(slot: &CacheSlot, stored: Result<()>) {
    if let Err(e) = stored {
        warn!(key = %slot.key, error = %e, "response not cached");
    }
}
