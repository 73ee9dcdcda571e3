//! Network settings read from the environment (and `.env`)

use crate::logger::LogFormat;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub const ENV_NODE_COUNT: &str = "DPLT_NODE_COUNT";
pub const ENV_BLOCK_INTERVAL_MS: &str = "DPLT_BLOCK_INTERVAL_MS";
pub const ENV_SYNC_INTERVAL_MS: &str = "DPLT_SYNC_INTERVAL_MS";
pub const ENV_SETTLEMENT_URL: &str = "DPLT_SETTLEMENT_URL";
pub const ENV_SETTLEMENT_RETRIES: &str = "DPLT_SETTLEMENT_RETRIES";
pub const ENV_LOG_FORMAT: &str = "DPLT_LOG_FORMAT";

/// Shortest accepted timer period; tokio intervals reject zero.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkConfig {
    pub node_count: usize,
    pub block_interval: Duration,
    pub sync_interval: Duration,
    /// Unset disables mirroring.
    pub settlement_url: Option<String>,
    pub settlement_retries: u32,
    pub log_format: LogFormat,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            node_count: 3,
            block_interval: Duration::from_millis(10_000),
            sync_interval: Duration::from_millis(5_000),
            settlement_url: None,
            settlement_retries: 3,
            log_format: LogFormat::Compact,
        }
    }
}

impl NetworkConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup. Missing keys keep their
    /// defaults; unparsable ones are logged and ignored.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let node_count = parse_or(&lookup, ENV_NODE_COUNT, defaults.node_count);
        let block_ms = parse_or(
            &lookup,
            ENV_BLOCK_INTERVAL_MS,
            defaults.block_interval.as_millis() as u64,
        );
        let sync_ms = parse_or(
            &lookup,
            ENV_SYNC_INTERVAL_MS,
            defaults.sync_interval.as_millis() as u64,
        );

        NetworkConfig {
            node_count: node_count.max(1),
            block_interval: Duration::from_millis(block_ms).max(MIN_INTERVAL),
            sync_interval: Duration::from_millis(sync_ms).max(MIN_INTERVAL),
            settlement_url: lookup(ENV_SETTLEMENT_URL)
                .map(|url| url.trim().to_string())
                .filter(|url| !url.is_empty()),
            settlement_retries: parse_or(&lookup, ENV_SETTLEMENT_RETRIES, defaults.settlement_retries),
            log_format: parse_or(&lookup, ENV_LOG_FORMAT, defaults.log_format),
        }
    }

    pub fn with_node_count(mut self, count: usize) -> Self {
        self.node_count = count.max(1);
        self
    }

    pub fn with_block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval.max(MIN_INTERVAL);
        self
    }

    pub fn with_settlement_url(mut self, url: impl Into<String>) -> Self {
        self.settlement_url = Some(url.into());
        self
    }

    pub fn with_settlement_retries(mut self, retries: u32) -> Self {
        self.settlement_retries = retries;
        self
    }

    pub fn with_log_format(mut self, format: LogFormat) -> Self {
        self.log_format = format;
        self
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!(key, value = %raw, "Ignoring unparsable setting, using default");
                default
            }
        },
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = NetworkConfig::from_lookup(lookup(&[]));
        assert_eq!(config, NetworkConfig::default());
        assert_eq!(config.node_count, 3);
        assert_eq!(config.block_interval, Duration::from_secs(10));
        assert_eq!(config.sync_interval, Duration::from_secs(5));
        assert!(config.settlement_url.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = NetworkConfig::from_lookup(lookup(&[
            (ENV_NODE_COUNT, "5"),
            (ENV_BLOCK_INTERVAL_MS, "250"),
            (ENV_SYNC_INTERVAL_MS, " 100 "),
            (ENV_SETTLEMENT_URL, "http://localhost:8545"),
            (ENV_SETTLEMENT_RETRIES, "7"),
            (ENV_LOG_FORMAT, "detailed"),
        ]));
        assert_eq!(config.node_count, 5);
        assert_eq!(config.block_interval, Duration::from_millis(250));
        assert_eq!(config.sync_interval, Duration::from_millis(100));
        assert_eq!(config.settlement_url.as_deref(), Some("http://localhost:8545"));
        assert_eq!(config.settlement_retries, 7);
        assert_eq!(config.log_format, LogFormat::Detailed);
    }

    #[test]
    fn test_bad_values_fall_back() {
        let config = NetworkConfig::from_lookup(lookup(&[
            (ENV_NODE_COUNT, "many"),
            (ENV_BLOCK_INTERVAL_MS, "-3"),
            (ENV_SETTLEMENT_URL, "  "),
            (ENV_LOG_FORMAT, "xml"),
        ]));
        assert_eq!(config.node_count, 3);
        assert_eq!(config.block_interval, Duration::from_secs(10));
        assert!(config.settlement_url.is_none());
        assert_eq!(config.log_format, LogFormat::Compact);
    }

    #[test]
    fn test_zero_nodes_clamped() {
        let config = NetworkConfig::from_lookup(lookup(&[(ENV_NODE_COUNT, "0")]));
        assert_eq!(config.node_count, 1);
        assert_eq!(NetworkConfig::default().with_node_count(0).node_count, 1);
    }

    #[test]
    fn test_zero_intervals_clamped() {
        let config = NetworkConfig::from_lookup(lookup(&[
            (ENV_BLOCK_INTERVAL_MS, "0"),
            (ENV_SYNC_INTERVAL_MS, "0"),
        ]));
        assert_eq!(config.block_interval, Duration::from_millis(1));
        assert_eq!(config.sync_interval, Duration::from_millis(1));

        let config = NetworkConfig::default()
            .with_block_interval(Duration::ZERO)
            .with_sync_interval(Duration::ZERO);
        assert_eq!(config.block_interval, Duration::from_millis(1));
        assert_eq!(config.sync_interval, Duration::from_millis(1));

        let config = NetworkConfig::default().with_block_interval(Duration::from_millis(40));
        assert_eq!(config.block_interval, Duration::from_millis(40));
    }
}
