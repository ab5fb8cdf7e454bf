//! Per-client session ownership: one session per execution context.

use super::context::{ContextKey, ExecutionMode};
use super::handle::{Session, SessionSettings};
use super::registry;
use crate::utils::lock;
use crate::{Error, ErrorContext, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Creates sessions lazily and hands the same one back to every call made
/// from the same [`ContextKey`].
///
/// Each tokio runtime is its own context, so a session never outlives the
/// runtime whose reactor owns its connections. Sessions of runtimes that have
/// shut down are dropped the next time a session is opened. After `close_all` the manager
/// refuses all further use.
pub struct SessionManager {
    settings: SessionSettings,
    sessions: Mutex<HashMap<ContextKey, Arc<Session>>>,
    closed: AtomicBool,
}

impl SessionManager {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            sessions: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Session for the calling thread in the detected mode.
    pub fn acquire_current(&self) -> Result<Arc<Session>> {
        self.acquire(ContextKey::current())
    }

    pub fn acquire_for(&self, mode: ExecutionMode) -> Result<Arc<Session>> {
        self.acquire(ContextKey::for_mode(mode))
    }

    pub fn acquire(&self, key: ContextKey) -> Result<Arc<Session>> {
        if self.is_closed() {
            return Err(Error::session_closed_with_context(
                "client has been closed",
                ErrorContext::new()
                    .with_operation("session.acquire")
                    .with_metadata("mode", key.mode().as_str()),
            ));
        }
        let mut sessions = lock(&self.sessions);
        if let Some(existing) = sessions.get(&key) {
            if !existing.is_closed() {
                return Ok(existing.clone());
            }
        }
        sessions.retain(|_, s| {
            if !s.is_closed() {
                return true;
            }
            debug!(session_id = s.id(), stale = s.is_stale(), "dropping closed session");
            s.close();
            false
        });
        let session = Arc::new(Session::open(registry::next_id(), key, &self.settings)?);
        registry::register(&session)?;
        sessions.insert(key, session.clone());
        Ok(session)
    }

    /// Close and forget the session for `key`. Returns whether one existed.
    pub fn release(&self, key: ContextKey) -> bool {
        let removed = lock(&self.sessions).remove(&key);
        match removed {
            Some(session) => {
                session.close();
                true
            }
            None => false,
        }
    }

    /// Close every session this manager owns. Idempotent.
    pub fn close_all(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<Arc<Session>> = lock(&self.sessions).drain().map(|(_, s)| s).collect();
        for session in &drained {
            session.close();
        }
        debug!(sessions = drained.len(), "session manager closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Open sessions owned by this manager.
    pub fn live_sessions(&self) -> usize {
        lock(&self.sessions)
            .values()
            .filter(|s| !s.is_closed())
            .count()
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionSettings::default())
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_context_reuses_session() {
        let manager = SessionManager::default();
        let a = manager.acquire_current().unwrap();
        let b = manager.acquire_current().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(manager.live_sessions(), 1);
    }

    #[test]
    fn test_other_thread_gets_its_own_session() {
        let manager = Arc::new(SessionManager::default());
        let here = manager.acquire_current().unwrap();
        let m = manager.clone();
        let there_id = std::thread::spawn(move || m.acquire_current().unwrap().id())
            .join()
            .unwrap();
        assert_ne!(here.id(), there_id);
        assert_eq!(manager.live_sessions(), 2);
    }

    #[test]
    fn test_release_then_acquire_opens_new_session() {
        let manager = SessionManager::default();
        let key = ContextKey::current();
        let first = manager.acquire(key).unwrap();
        assert!(manager.release(key));
        assert!(first.is_closed());
        assert!(!manager.release(key));
        let second = manager.acquire(key).unwrap();
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn test_close_all_is_idempotent_and_final() {
        let manager = SessionManager::default();
        let session = manager.acquire_current().unwrap();
        manager.close_all();
        manager.close_all();
        assert!(session.is_closed());
        let err = manager.acquire_current().unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::SessionClosed);
    }

    #[test]
    fn test_stale_cooperative_session_is_replaced() {
        let manager = SessionManager::default();
        let first_rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let first = first_rt.block_on(async { manager.acquire_current().unwrap() });
        drop(first_rt);
        assert!(first.is_stale());

        let second_rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let second = second_rt.block_on(async { manager.acquire_current().unwrap() });
        assert_ne!(first.id(), second.id());
        assert_eq!(second.mode(), ExecutionMode::Cooperative);
        assert_eq!(lock(&manager.sessions).len(), 1);
    }

    #[test]
    fn test_live_runtimes_on_one_thread_get_separate_sessions() {
        let manager = SessionManager::default();
        let rt_a = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let rt_b = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let a = rt_a.block_on(async { manager.acquire_current().unwrap() });
        let b = rt_b.block_on(async { manager.acquire_current().unwrap() });
        assert_ne!(a.id(), b.id());
        assert!(!a.is_closed() && !b.is_closed());
        let again = rt_a.block_on(async { manager.acquire_current().unwrap() });
        assert!(Arc::ptr_eq(&a, &again));
        assert_eq!(manager.live_sessions(), 2);
    }
}
