//! Client and cache configuration.
//!
//! Every knob has a builder method; `from_env` layers `BLOSSOM_*` environment
//! variables over the defaults so deployments can tune without code changes.

use crate::{Error, ErrorContext, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://text.pollinations.ai";

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

/// Connection, deadline and retry settings for a [`crate::Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_token: Option<String>,
    /// Per-request deadline.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    /// Maximum silence between streamed chunks before the stream is interrupted.
    pub stream_chunk_timeout: Duration,
    pub user_agent: String,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Overall budget across all attempts of one call.
    pub deadline: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_token: None,
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(30),
            pool_max_idle_per_host: 20,
            pool_idle_timeout: Duration::from_secs(90),
            stream_chunk_timeout: Duration::from_secs(30),
            user_agent: format!("blossom-ai/{}", env!("CARGO_PKG_VERSION")),
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            deadline: None,
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment:
    /// - `BLOSSOM_BASE_URL`
    /// - `BLOSSOM_API_TOKEN`
    /// - `BLOSSOM_TIMEOUT_SECS`
    /// - `BLOSSOM_POOL_MAX_IDLE`
    /// - `BLOSSOM_MAX_RETRIES`
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(url) = env::var("BLOSSOM_BASE_URL") {
            cfg.base_url = url;
        }
        cfg.api_token = env::var("BLOSSOM_API_TOKEN").ok().filter(|t| !t.is_empty());
        if let Some(secs) = env_parse::<u64>("BLOSSOM_TIMEOUT_SECS").filter(|s| *s > 0) {
            cfg.timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env_parse::<usize>("BLOSSOM_POOL_MAX_IDLE") {
            cfg.pool_max_idle_per_host = n;
        }
        if let Some(n) = env_parse::<u32>("BLOSSOM_MAX_RETRIES").filter(|n| *n > 0) {
            cfg.max_attempts = n;
        }
        cfg
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_stream_chunk_timeout(mut self, timeout: Duration) -> Self {
        self.stream_chunk_timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn validate(&self) -> Result<()> {
        url::Url::parse(&self.base_url).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid base_url: {}", e),
                ErrorContext::new().with_metadata("base_url", &self.base_url),
            )
        })?;
        if self.max_attempts == 0 {
            return Err(Error::configuration("max_attempts must be at least 1"));
        }
        if self.timeout.is_zero() {
            return Err(Error::configuration("timeout must be non-zero"));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::configuration_with_context(
                "base_delay exceeds max_delay",
                ErrorContext::new()
                    .with_metadata("base_delay_ms", self.base_delay.as_millis())
                    .with_metadata("max_delay_ms", self.max_delay.as_millis()),
            ));
        }
        Ok(())
    }
}

/// Which tiers a cache keeps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Disk,
    Hybrid,
}

impl CacheBackend {
    pub fn uses_memory(&self) -> bool {
        matches!(self, CacheBackend::Memory | CacheBackend::Hybrid)
    }

    pub fn uses_disk(&self) -> bool {
        matches!(self, CacheBackend::Disk | CacheBackend::Hybrid)
    }
}

impl FromStr for CacheBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(CacheBackend::Memory),
            "disk" => Ok(CacheBackend::Disk),
            "hybrid" => Ok(CacheBackend::Hybrid),
            other => Err(Error::configuration_with_context(
                format!("unknown cache backend '{}'", other),
                ErrorContext::new().with_suggestion("Use one of: memory, disk, hybrid"),
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    pub max_memory_items: usize,
    pub disk_path: PathBuf,
    /// TTL applied by `CacheManager::set`; `None` never expires.
    pub default_ttl: Option<Duration>,
    pub max_entry_size: usize,
    pub enabled: bool,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            max_memory_items: 1000,
            disk_path: env::temp_dir().join("blossom-cache"),
            default_ttl: Some(Duration::from_secs(3600)),
            max_entry_size: 10 * 1024 * 1024,
            enabled: true,
            key_prefix: None,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by environment:
    /// - `BLOSSOM_CACHE_BACKEND` (`memory` | `disk` | `hybrid`)
    /// - `BLOSSOM_CACHE_MAX_ITEMS`
    /// - `BLOSSOM_CACHE_DIR`
    /// - `BLOSSOM_CACHE_TTL_SECS` (`0` disables expiry)
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(raw) = env::var("BLOSSOM_CACHE_BACKEND") {
            cfg.backend = raw.parse()?;
        }
        if let Some(n) = env_parse::<usize>("BLOSSOM_CACHE_MAX_ITEMS") {
            cfg.max_memory_items = n;
        }
        if let Ok(dir) = env::var("BLOSSOM_CACHE_DIR") {
            cfg.disk_path = PathBuf::from(dir);
        }
        if let Some(secs) = env_parse::<u64>("BLOSSOM_CACHE_TTL_SECS") {
            cfg.default_ttl = (secs > 0).then(|| Duration::from_secs(secs));
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn with_backend(mut self, backend: CacheBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_max_memory_items(mut self, n: usize) -> Self {
        self.max_memory_items = n;
        self
    }

    pub fn with_disk_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.disk_path = path.into();
        self
    }

    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_max_entry_size(mut self, bytes: usize) -> Self {
        self.max_entry_size = bytes;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = Some(prefix.into());
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.backend.uses_memory() && self.max_memory_items == 0 {
            return Err(Error::configuration_with_context(
                "max_memory_items must be positive for a memory-backed cache",
                ErrorContext::new().with_metadata("backend", format!("{:?}", self.backend)),
            ));
        }
        if self.max_entry_size == 0 {
            return Err(Error::configuration("max_entry_size must be positive"));
        }
        if self.backend.uses_disk() && self.disk_path.as_os_str().is_empty() {
            return Err(Error::configuration(
                "disk_path is required for disk or hybrid caches",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_parse() {
        assert_eq!("Hybrid".parse::<CacheBackend>().unwrap(), CacheBackend::Hybrid);
        assert_eq!(" disk ".parse::<CacheBackend>().unwrap(), CacheBackend::Disk);
        assert!("redis".parse::<CacheBackend>().is_err());
    }

    #[test]
    fn test_cache_config_rejects_conflicts() {
        let zero_items = CacheConfig::new().with_max_memory_items(0);
        assert!(zero_items.validate().is_err());

        // A disk-only cache has no memory tier, so the item limit is irrelevant.
        let disk_only = CacheConfig::new()
            .with_backend(CacheBackend::Disk)
            .with_max_memory_items(0);
        assert!(disk_only.validate().is_ok());

        let no_path = CacheConfig::new()
            .with_backend(CacheBackend::Hybrid)
            .with_disk_path("");
        assert!(no_path.validate().is_err());
    }

    #[test]
    fn test_client_config_validation() {
        assert!(ClientConfig::new().validate().is_ok());
        assert!(ClientConfig::new().with_base_url("not a url").validate().is_err());
        assert!(ClientConfig::new().with_max_attempts(0).validate().is_err());
        assert!(ClientConfig::new()
            .with_base_delay(Duration::from_secs(20))
            .validate()
            .is_err());
    }
}
