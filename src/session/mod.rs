//! # Sessions
//!
//! Pooled HTTP connections, one per execution context.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ExecutionMode`] / [`ContextKey`] | which context a call runs in |
//! | [`Session`] | a pooled client bound to one context, with a lease count |
//! | [`SessionManager`] | per-client map from context to session |
//! | [`shutdown`] / [`ShutdownGuard`] | process-wide teardown of every open session |
//!
//! A blocking thread and a tokio runtime never share a session: reqwest's
//! blocking and async clients each belong to their own scheduler.

mod context;
mod handle;
mod manager;
mod registry;

pub use context::{ContextKey, ExecutionMode};
pub use handle::{Session, SessionLease, SessionSettings};
pub use manager::SessionManager;
pub use registry::{is_shut_down, live_sessions, shutdown, ShutdownGuard};
