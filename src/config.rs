// Configuration module for slnstore
// Reads from environment variables with sensible defaults; invalid values are
// logged through tracing and the default is kept

use std::env;
use std::time::Duration;
use tracing::warn;

/// Storage engine configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum number of pooled connections (SLNSTORE_POOL_SIZE)
    pub pool_size: u32,

    /// How long a statement waits on a locked database, in seconds (SLNSTORE_BUSY_TIMEOUT_SECS)
    pub busy_timeout_secs: u64,

    /// Delay between the first buffered write and the flush that migrates it (SLNSTORE_FLUSH_DELAY_MS)
    pub flush_delay_ms: u64,

    /// Prepared statements kept per connection (SLNSTORE_STATEMENT_CACHE)
    pub statement_cache: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pool_size: 8,
            busy_timeout_secs: 30,
            flush_delay_ms: 500,
            statement_cache: 32,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Config::default();
        override_from(&lookup, "SLNSTORE_POOL_SIZE", &mut config.pool_size);
        override_from(&lookup, "SLNSTORE_BUSY_TIMEOUT_SECS", &mut config.busy_timeout_secs);
        override_from(&lookup, "SLNSTORE_FLUSH_DELAY_MS", &mut config.flush_delay_ms);
        override_from(&lookup, "SLNSTORE_STATEMENT_CACHE", &mut config.statement_cache);
        config.pool_size = config.pool_size.max(1);
        config
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }

    pub fn flush_delay(&self) -> Duration {
        Duration::from_millis(self.flush_delay_ms)
    }
}

fn override_from<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T)
where
    T: std::str::FromStr + std::fmt::Display,
{
    let Some(val) = lookup(key) else {
        return;
    };
    match val.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => warn!(
            "Invalid {} value: {}, using default: {}",
            key, val, slot
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.busy_timeout_secs, 30);
        assert_eq!(config.flush_delay(), Duration::from_millis(500));
        assert_eq!(config.statement_cache, 32);
    }

    #[test]
    fn test_overrides_and_invalid_values() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("SLNSTORE_POOL_SIZE", "3"),
            ("SLNSTORE_FLUSH_DELAY_MS", "not-a-number"),
            ("SLNSTORE_BUSY_TIMEOUT_SECS", "5"),
        ]);
        let config = Config::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.pool_size, 3);
        assert_eq!(config.flush_delay_ms, 500);
        assert_eq!(config.busy_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_pool_size_never_zero() {
        let config = Config::from_lookup(|key| (key == "SLNSTORE_POOL_SIZE").then(|| "0".into()));
        assert_eq!(config.pool_size, 1);
    }
}
