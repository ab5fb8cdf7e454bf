//! # Resilience
//!
//! Retry with exponential backoff around a single request attempt.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`RetryPolicy`] | Attempt budget, classifier, backoff strategy and optional deadline |
//! | [`BackoffStrategy`] | Maps a failure and attempt number to a wait |
//! | [`ExponentialBackoff`] | `base * 2^(n-1)`, overridden by `Retry-After` |
//!
//! ```rust
//! use blossom_ai::resilience::RetryPolicy;
//! use blossom_ai::Error;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(1));
//! let value = policy.execute_blocking(|attempt| {
//!     if attempt.number < 2 {
//!         Err(Error::network("connection reset"))
//!     } else {
//!         Ok(42)
//!     }
//! });
//! assert_eq!(value.unwrap(), 42);
//! ```

pub mod retry;

pub use retry::{Attempt, BackoffStrategy, Classifier, Decision, ExponentialBackoff, RetryPolicy};
