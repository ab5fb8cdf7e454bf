//! Response caching: a bounded memory tier over an optional disk tier.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheManager`] | get/set/delete/clear/stats over both tiers |
//! | [`CacheStats`] | hit, miss and eviction counters |
//! | [`CacheKey`] | deterministic key from a function name and its arguments |
//! | [`Memoize`] | wraps blocking or async functions behind the cache |
//! | [`Clock`] | time source for TTL checks ([`ManualClock`] in tests) |
//!
//! ## Example
//!
//! ```rust
//! use blossom_ai::cache::{CacheManager, CacheStats};
//! use blossom_ai::config::CacheConfig;
//! use std::time::Duration;
//!
//! # fn main() -> blossom_ai::Result<()> {
//! let cache = CacheManager::new(CacheConfig::new().with_max_memory_items(100))?;
//! cache.set_with_ttl("greeting", "hello", Some(Duration::from_secs(60)))?;
//! assert_eq!(cache.get::<String>("greeting")?.as_deref(), Some("hello"));
//! assert_eq!(cache.get_stats().hits, 1);
//! # Ok(())
//! # }
//! ```
//!
//! The process-wide instance from [`default_cache`] is created on first use
//! from `CacheConfig::from_env()` and lives until the process exits.

mod clock;
mod disk;
mod entry;
mod key;
mod manager;
mod memoize;
mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use key::{CacheKey, CallArgs};
pub use manager::{default_cache, CacheManager, CacheStats};
pub use memoize::{memoize, memoize_async, Memoize, Memoized, MemoizedAsync};
