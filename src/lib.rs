//! # blossom-ai
//!
//! Core runtime for a client of a hosted text, image and audio generation API.
//!
//! ## Overview
//!
//! Two subsystems sit under every generator call:
//!
//! - an **execution core** that lets one call expression run from blocking
//!   code (`.wait()`) or inside a tokio runtime (`.await`), with pooled
//!   sessions per execution context and retry with exponential backoff
//! - a **response cache** with a bounded LRU memory tier, an optional disk
//!   tier, TTL expiry, hit/miss statistics and a memoizing wrapper for
//!   blocking and async functions
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blossom_ai::{ApiRequest, Client};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> blossom_ai::Result<()> {
//!     let _teardown = blossom_ai::ShutdownGuard::new();
//!     let client = Client::from_env()?;
//!
//!     let reply = client
//!         .call(ApiRequest::get("/a%20haiku%20about%20rust").query("model", "openai"))
//!         .cached(Some(Duration::from_secs(600)))
//!         .await?;
//!     println!("{}", reply.text()?);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`client`] | `Client`, `Call`, request building, streaming |
//! | [`session`] | per-context sessions, global registry, shutdown |
//! | [`resilience`] | retry policy and backoff strategies |
//! | [`cache`] | tiered cache, cache keys, memoization |
//! | [`config`] | client and cache configuration |
//! | [`logging`] | tracing subscriber bootstrap |

pub mod cache;
pub mod client;
pub mod config;
pub mod logging;
pub mod resilience;
pub mod session;

pub(crate) mod utils;

pub use cache::{CacheManager, CacheStats};
pub use client::{ApiRequest, ApiResponse, Call, Client, ClientBuilder, Dispatched};
pub use config::{CacheBackend, CacheConfig, ClientConfig};
pub use resilience::RetryPolicy;
pub use session::{shutdown, ExecutionMode, ShutdownGuard};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// A pinned, boxed stream of fallible items.
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext, ErrorKind};
