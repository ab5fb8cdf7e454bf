use super::core::Client;
use crate::cache::{default_cache, CacheManager};
use crate::config::ClientConfig;
use crate::resilience::RetryPolicy;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating clients with custom configuration.
///
/// Keep this surface area small and predictable.
pub struct ClientBuilder {
    config: ClientConfig,
    retry: Option<RetryPolicy>,
    cache: Option<Arc<CacheManager>>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            retry: None,
            cache: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Primarily for pointing tests at a mock server.
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.base_url = base_url.into();
        self
    }

    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.config.api_token = Some(token.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Override the policy otherwise derived from the config's retry knobs.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn cache(mut self, cache: Arc<CacheManager>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Share the process-wide cache from [`crate::cache::default_cache`].
    pub fn default_cache(mut self) -> Self {
        self.cache = Some(default_cache());
        self
    }

    pub fn build(self) -> Result<Client> {
        self.config.validate()?;
        let retry = self
            .retry
            .unwrap_or_else(|| RetryPolicy::from_config(&self.config));
        Ok(Client::from_parts(self.config, retry, self.cache))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_validates_config() {
        assert!(ClientBuilder::new().base_url("not a url").build().is_err());
        assert!(ClientBuilder::new().max_attempts(0).build().is_err());
    }

    #[test]
    fn test_retry_policy_follows_config() {
        let client = ClientBuilder::new().max_attempts(5).build().unwrap();
        assert_eq!(client.retry_policy().max_attempts, 5);
        assert!(client.cache().is_none());
    }
}
