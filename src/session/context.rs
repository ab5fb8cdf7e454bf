//! Execution-context detection.

use std::thread::{self, ThreadId};
use tokio::runtime::{Handle, Id as RuntimeId};

/// Which physical path a call takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExecutionMode {
    /// Plain blocking code: the call returns the materialized value.
    Blocking,
    /// Inside a tokio runtime: the call returns a future.
    Cooperative,
}

impl ExecutionMode {
    /// Probe the calling thread. A thread with no tokio runtime entered,
    /// or one we cannot identify, is treated as blocking.
    pub fn detect() -> Self {
        match Handle::try_current() {
            Ok(_) => ExecutionMode::Cooperative,
            Err(_) => ExecutionMode::Blocking,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionMode::Blocking => "blocking",
            ExecutionMode::Cooperative => "cooperative",
        }
    }
}

/// Identity of an execution context: the calling thread, the mode it runs
/// in, and for cooperative contexts the runtime driving it. A worker thread
/// of a multi-threaded runtime is its own context, and two runtimes alive on
/// the same thread never share one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextKey {
    thread: ThreadId,
    mode: ExecutionMode,
    runtime: Option<RuntimeId>,
}

impl ContextKey {
    pub fn current() -> Self {
        Self::for_mode(ExecutionMode::detect())
    }

    pub fn for_mode(mode: ExecutionMode) -> Self {
        let runtime = match mode {
            ExecutionMode::Blocking => None,
            ExecutionMode::Cooperative => Handle::try_current().ok().map(|h| h.id()),
        };
        Self {
            thread: thread::current().id(),
            mode,
            runtime,
        }
    }

    pub fn thread(&self) -> ThreadId {
        self.thread
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// Runtime a cooperative context belongs to; `None` for blocking code.
    pub fn runtime(&self) -> Option<RuntimeId> {
        self.runtime
    }
}
