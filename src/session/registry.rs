//! Process-wide registry of live sessions and the explicit teardown entry point.

use super::handle::Session;
use crate::utils::lock;
use crate::{Error, ErrorContext, Result};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, info};

#[derive(Default)]
struct RegistryState {
    sessions: HashMap<u64, Weak<Session>>,
    shut_down: bool,
}

static REGISTRY: Lazy<Mutex<RegistryState>> = Lazy::new(|| Mutex::new(RegistryState::default()));
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) fn next_id() -> u64 {
    NEXT_ID.fetch_add(1, Ordering::Relaxed)
}

/// Track `session` until it is closed or dropped. Fails once [`shutdown`] ran.
pub(crate) fn register(session: &Arc<Session>) -> Result<()> {
    let mut state = lock(&REGISTRY);
    if state.shut_down {
        return Err(Error::session_closed_with_context(
            "session registry has been shut down",
            ErrorContext::new().with_operation("session.register"),
        ));
    }
    state.sessions.retain(|_, weak| weak.strong_count() > 0);
    state.sessions.insert(session.id(), Arc::downgrade(session));
    Ok(())
}

pub(crate) fn unregister(id: u64) {
    lock(&REGISTRY).sessions.remove(&id);
}

/// Sessions registered and not yet closed.
pub fn live_sessions() -> usize {
    let tracked: Vec<Weak<Session>> = lock(&REGISTRY).sessions.values().cloned().collect();
    tracked
        .iter()
        .filter_map(Weak::upgrade)
        .filter(|s| !s.is_closed())
        .count()
}

pub fn is_shut_down() -> bool {
    lock(&REGISTRY).shut_down
}

/// Close every outstanding session exactly once and refuse new ones.
///
/// Safe to call repeatedly; returns how many sessions this call closed.
pub fn shutdown() -> usize {
    let drained: Vec<Weak<Session>> = {
        let mut state = lock(&REGISTRY);
        state.shut_down = true;
        state.sessions.drain().map(|(_, weak)| weak).collect()
    };
    let closed = drained
        .into_iter()
        .filter_map(|weak| weak.upgrade())
        .filter(|session| session.close())
        .count();
    if closed > 0 {
        info!(closed, "closed outstanding sessions at shutdown");
    } else {
        debug!("session registry shut down with nothing open");
    }
    closed
}

/// Runs [`shutdown`] when dropped.
///
/// Statics are never dropped in Rust, so hold one of these in `main` to get
/// deterministic teardown at process exit:
///
/// ```rust,no_run
/// fn main() {
///     let _teardown = blossom_ai::ShutdownGuard::new();
///     // ... use clients ...
/// }
/// ```
#[must_use = "the guard closes sessions when dropped; bind it to a variable"]
#[derive(Debug, Default)]
pub struct ShutdownGuard {
    _private: (),
}

impl ShutdownGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        shutdown();
    }
}
