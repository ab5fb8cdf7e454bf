//! Transparent memoization of blocking and async functions.
//!
//! The wrapped function keeps its calling convention: a blocking `Fn(A) ->
//! Result<R>` stays blocking, an async `Fn(A) -> impl Future` stays a future.
//! Cache reads and writes that fail are logged and skipped; the wrapped
//! function still runs and its result is returned.
//!
//! Concurrent misses for the same key are not coalesced. Two callers that race
//! before the first result is stored will both invoke the function.

use super::key::CacheKey;
use super::manager::CacheManager;
use crate::Result;
use futures::future::BoxFuture;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Memoization settings shared by [`Memoized`] and [`MemoizedAsync`].
///
/// `namespace` identifies the wrapped function in the key. Closures have no
/// stable name, so it must be given explicitly and be unique per function.
#[derive(Clone)]
pub struct Memoize {
    cache: Arc<CacheManager>,
    namespace: String,
    ttl: Option<Duration>,
}

impl Memoize {
    /// Uses the cache's default TTL until [`Memoize::with_ttl`] overrides it.
    pub fn new(cache: Arc<CacheManager>, namespace: impl Into<String>) -> Self {
        let ttl = cache.config().default_ttl;
        Self {
            cache,
            namespace: namespace.into(),
            ttl,
        }
    }

    /// `None` stores results without expiry.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn wrap<F>(self, f: F) -> Memoized<F> {
        Memoized { memo: self, f }
    }

    pub fn wrap_async<F>(self, f: F) -> MemoizedAsync<F> {
        MemoizedAsync { memo: self, f }
    }

    fn key_for<A: Serialize>(&self, args: &A) -> Option<String> {
        match CacheKey::for_call(&self.namespace, args) {
            Ok(key) => Some(key.into()),
            Err(e) => {
                warn!(namespace = %self.namespace, error = %e, "arguments not serializable; calling uncached");
                None
            }
        }
    }

    fn decode<R: DeserializeOwned>(&self, key: &str, lookup: Result<Option<bytes::Bytes>>) -> Option<R> {
        let bytes = match lookup {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %key, error = %e, "memoized lookup failed");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => {
                debug!(key = %key, "memoized hit");
                Some(value)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cached value does not decode; recomputing");
                None
            }
        }
    }

    fn report_store(key: &str, stored: Result<()>) {
        if let Err(e) = stored {
            warn!(key = %key, error = %e, "memoized result not stored");
        }
    }
}

/// A blocking function behind the cache.
pub struct Memoized<F> {
    memo: Memoize,
    f: F,
}

impl<F> Memoized<F> {
    /// Only `Ok` results are cached.
    pub fn call<A, R>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> Result<R>,
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let Some(key) = self.memo.key_for(&args) else {
            return (self.f)(args);
        };
        if let Some(hit) = self.memo.decode(&key, self.memo.cache.get_bytes(&key)) {
            return Ok(hit);
        }
        let value = (self.f)(args)?;
        Memoize::report_store(&key, self.memo.cache.set_with_ttl(&key, &value, self.memo.ttl));
        Ok(value)
    }

    pub fn memo(&self) -> &Memoize {
        &self.memo
    }
}

/// An async function behind the cache. Disk lookups and stores run on the
/// blocking pool, so a memoized call never stalls its runtime.
pub struct MemoizedAsync<F> {
    memo: Memoize,
    f: F,
}

impl<F> MemoizedAsync<F> {
    pub async fn call<A, R, Fut>(&self, args: A) -> Result<R>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<R>>,
        A: Serialize,
        R: Serialize + DeserializeOwned,
    {
        let Some(key) = self.memo.key_for(&args) else {
            return (self.f)(args).await;
        };
        let lookup = self.memo.cache.get_bytes_async(&key).await;
        if let Some(hit) = self.memo.decode(&key, lookup) {
            return Ok(hit);
        }
        let value = (self.f)(args).await?;
        let stored = match serde_json::to_vec(&value) {
            Ok(data) => self.memo.cache.set_bytes_async(&key, data, self.memo.ttl).await,
            Err(e) => Err(e.into()),
        };
        Memoize::report_store(&key, stored);
        Ok(value)
    }

    pub fn memo(&self) -> &Memoize {
        &self.memo
    }
}

/// Wrap a blocking function; the result is callable exactly like `f`.
pub fn memoize<A, R, F>(
    cache: Arc<CacheManager>,
    namespace: impl Into<String>,
    ttl: Option<Duration>,
    f: F,
) -> impl Fn(A) -> Result<R>
where
    F: Fn(A) -> Result<R>,
    A: Serialize,
    R: Serialize + DeserializeOwned,
{
    let memoized = Memoize::new(cache, namespace).with_ttl(ttl).wrap(f);
    move |args: A| -> Result<R> { memoized.call(args) }
}

/// Wrap an async function; each call returns a boxed future.
pub fn memoize_async<A, R, F, Fut>(
    cache: Arc<CacheManager>,
    namespace: impl Into<String>,
    ttl: Option<Duration>,
    f: F,
) -> impl Fn(A) -> BoxFuture<'static, Result<R>>
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R>> + Send + 'static,
    A: Serialize + Send + 'static,
    R: Serialize + DeserializeOwned + Send + 'static,
{
    let memoized = Arc::new(Memoize::new(cache, namespace).with_ttl(ttl).wrap_async(f));
    move |args: A| -> BoxFuture<'static, Result<R>> {
        let memoized = memoized.clone();
        Box::pin(async move { memoized.call(args).await })
    }
}
