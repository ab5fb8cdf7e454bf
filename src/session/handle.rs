//! A pooled connection handle bound to one execution context.

use super::context::{ContextKey, ExecutionMode};
use crate::config::ClientConfig;
use crate::utils::lock;
use crate::{Error, ErrorContext, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Connection-pool settings shared by every session a manager creates.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub user_agent: String,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for SessionSettings {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            timeout: cfg.timeout,
            connect_timeout: cfg.connect_timeout,
            pool_max_idle_per_host: cfg.pool_max_idle_per_host,
            pool_idle_timeout: cfg.pool_idle_timeout,
            user_agent: cfg.user_agent.clone(),
        }
    }
}

enum Transport {
    Blocking(reqwest::blocking::Client),
    Cooperative(reqwest::Client),
}

impl Transport {
    fn build(mode: ExecutionMode, s: &SessionSettings) -> Result<Self> {
        let transport = match mode {
            ExecutionMode::Blocking => reqwest::blocking::Client::builder()
                .timeout(s.timeout)
                .connect_timeout(s.connect_timeout)
                .pool_max_idle_per_host(s.pool_max_idle_per_host)
                .pool_idle_timeout(s.pool_idle_timeout)
                .user_agent(s.user_agent.clone())
                .build()
                .map(Transport::Blocking),
            // No client-wide timeout: reqwest would apply it to whole
            // bodies and cut long streams. Calls set one per request.
            ExecutionMode::Cooperative => reqwest::Client::builder()
                .connect_timeout(s.connect_timeout)
                .pool_max_idle_per_host(s.pool_max_idle_per_host)
                .pool_idle_timeout(s.pool_idle_timeout)
                .user_agent(s.user_agent.clone())
                .build()
                .map(Transport::Cooperative),
        };
        transport.map_err(|e| {
            Error::configuration_with_context(
                format!("failed to build HTTP client: {}", e),
                ErrorContext::new().with_operation("session.open"),
            )
        })
    }
}

/// Flips the shared flag when the runtime that owns the sentinel task drops it.
struct RuntimeSentinel(Arc<AtomicBool>);

impl Drop for RuntimeSentinel {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One pooled HTTP client, owned by exactly one [`ContextKey`].
///
/// Closing is idempotent and final: a closed session hands out no more
/// leases. Requests already holding a lease finish on their own clone of the
/// client; the pool is released when the last of them completes.
pub struct Session {
    id: u64,
    key: ContextKey,
    transport: Mutex<Option<Transport>>,
    closed: AtomicBool,
    leases: AtomicUsize,
    runtime_alive: Option<Arc<AtomicBool>>,
    sentinel: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("closed", &self.is_closed())
            .field("leases", &self.active_leases())
            .finish()
    }
}

impl Session {
    pub(crate) fn open(id: u64, key: ContextKey, settings: &SessionSettings) -> Result<Self> {
        let transport = Transport::build(key.mode(), settings)?;
        let (runtime_alive, sentinel) = match key.mode() {
            ExecutionMode::Cooperative => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let alive = Arc::new(AtomicBool::new(true));
                    let guard = RuntimeSentinel(alive.clone());
                    let task = handle.spawn(async move {
                        let _guard = guard;
                        std::future::pending::<()>().await
                    });
                    (Some(alive), Some(task))
                }
                Err(_) => {
                    return Err(Error::validation(
                        "a cooperative session must be opened inside a tokio runtime",
                    ))
                }
            },
            ExecutionMode::Blocking => (None, None),
        };
        debug!(session_id = id, mode = key.mode().as_str(), thread = ?key.thread(), "session opened");
        Ok(Self {
            id,
            key,
            transport: Mutex::new(Some(transport)),
            closed: AtomicBool::new(false),
            leases: AtomicUsize::new(0),
            runtime_alive,
            sentinel: Mutex::new(sentinel),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> ContextKey {
        self.key
    }

    pub fn mode(&self) -> ExecutionMode {
        self.key.mode()
    }

    /// Closed explicitly, or its runtime has shut down.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || self.is_stale()
    }

    /// The runtime this cooperative session was opened on no longer exists.
    pub fn is_stale(&self) -> bool {
        self.runtime_alive
            .as_ref()
            .map(|alive| !alive.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    pub fn active_leases(&self) -> usize {
        self.leases.load(Ordering::Acquire)
    }

    /// Borrow the session for one request.
    pub fn lease(self: &Arc<Self>) -> Result<SessionLease> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.leases.fetch_add(1, Ordering::AcqRel);
        Ok(SessionLease {
            session: self.clone(),
        })
    }

    /// Returns `true` only for the call that actually closed the session.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        super::registry::unregister(self.id);
        if let Some(task) = lock(&self.sentinel).take() {
            task.abort();
        }
        let transport = lock(&self.transport).take();
        if let Some(Transport::Blocking(client)) = transport {
            release_blocking_client(client);
        }
        debug!(session_id = self.id, mode = self.mode().as_str(), leases = self.active_leases(), "session closed");
        true
    }

    fn closed_error(&self) -> Error {
        Error::session_closed_with_context(
            format!("session {} is closed", self.id),
            ErrorContext::new()
                .with_operation("session.lease")
                .with_metadata("mode", self.mode().as_str()),
        )
    }

    fn blocking_client(&self) -> Result<reqwest::blocking::Client> {
        match lock(&self.transport).as_ref() {
            Some(Transport::Blocking(c)) => Ok(c.clone()),
            Some(Transport::Cooperative(_)) => Err(Error::validation(
                "cooperative session cannot serve a blocking request",
            )),
            None => Err(self.closed_error()),
        }
    }

    fn async_client(&self) -> Result<reqwest::Client> {
        match lock(&self.transport).as_ref() {
            Some(Transport::Cooperative(c)) => Ok(c.clone()),
            Some(Transport::Blocking(_)) => Err(Error::validation(
                "blocking session cannot serve an async request",
            )),
            None => Err(self.closed_error()),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

/// The blocking client owns an internal runtime whose teardown may not run on
/// an async worker thread, so in that case it is dropped on a plain thread.
fn release_blocking_client(client: reqwest::blocking::Client) {
    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::spawn(move || drop(client));
    } else {
        drop(client);
    }
}

/// Counted borrow of a [`Session`] held for the duration of one request.
#[derive(Debug)]
pub struct SessionLease {
    session: Arc<Session>,
}

impl SessionLease {
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn blocking_client(&self) -> Result<reqwest::blocking::Client> {
        self.session.blocking_client()
    }

    pub(crate) fn async_client(&self) -> Result<reqwest::Client> {
        self.session.async_client()
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        self.session.leases.fetch_sub(1, Ordering::AcqRel);
    }
}
