//! Opt-in tracing subscriber for applications that do not install their own.

use tracing_subscriber::EnvFilter;

/// Filter directives are read from `BLOSSOM_LOG`, then `RUST_LOG`, and
/// default to `warn`.
pub const LOG_ENV: &str = "BLOSSOM_LOG";

/// Install a fmt subscriber. Returns `false` if a global subscriber was
/// already set, in which case nothing changes.
pub fn init() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_target(true)
        .try_init()
        .is_ok()
}

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_second_init_is_harmless() {
        super::init();
        assert!(!super::init());
    }
}
