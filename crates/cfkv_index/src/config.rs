//! Runtime configuration for the index layer.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use cfkv_store::DEFAULT_SCAN_CACHING;

const DEFAULT_FETCH_CONCURRENCY: usize = 16;
const DEFAULT_SCHEMA_DRAIN_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_INDEX_TABLE_SEPARATOR: &str = "__idx__";

#[derive(Clone, Debug)]
pub struct IndexConfig {
    /// Maximum concurrent base-row fetches during an indexed scan.
    pub fetch_concurrency: usize,
    /// Rows fetched per round-trip by scans issued from this layer.
    pub scan_caching: usize,
    /// How long a schema change waits for in-flight row operations to
    /// release their table handles before giving up.
    pub schema_drain_timeout: Duration,
    /// Separator between base table and index name in index table names.
    pub index_table_separator: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            scan_caching: DEFAULT_SCAN_CACHING,
            schema_drain_timeout: Duration::from_millis(DEFAULT_SCHEMA_DRAIN_TIMEOUT_MS),
            index_table_separator: DEFAULT_INDEX_TABLE_SEPARATOR.to_string(),
        }
    }
}

impl IndexConfig {
    /// Loads configuration from `CFKV_*` environment variables with defaults.
    pub fn from_env() -> Result<Self> {
        let fetch_concurrency = parse_usize(
            std::env::var("CFKV_FETCH_CONCURRENCY").ok(),
            DEFAULT_FETCH_CONCURRENCY,
        )?
        .max(1);
        let scan_caching =
            parse_usize(std::env::var("CFKV_SCAN_CACHING").ok(), DEFAULT_SCAN_CACHING)?.max(1);
        let schema_drain_timeout_ms = parse_u64(
            std::env::var("CFKV_SCHEMA_DRAIN_TIMEOUT_MS").ok(),
            DEFAULT_SCHEMA_DRAIN_TIMEOUT_MS,
        )?;
        let index_table_separator = std::env::var("CFKV_INDEX_TABLE_SEPARATOR")
            .unwrap_or_else(|_| DEFAULT_INDEX_TABLE_SEPARATOR.to_string());

        let config = Self {
            fetch_concurrency,
            scan_caching,
            schema_drain_timeout: Duration::from_millis(schema_drain_timeout_ms),
            index_table_separator,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.index_table_separator.is_empty() {
            return Err(anyhow!("index table separator must not be empty"));
        }
        if self.fetch_concurrency == 0 {
            return Err(anyhow!("fetch concurrency must be at least 1"));
        }
        Ok(())
    }
}

fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .with_context(|| format!("invalid usize value: {raw}")),
        None => Ok(default_value),
    }
}

fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .with_context(|| format!("invalid u64 value: {raw}")),
        None => Ok(default_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_helpers_fall_back_and_reject_garbage() {
        assert_eq!(parse_usize(None, 7).expect("default"), 7);
        assert_eq!(parse_usize(Some(" 12 ".to_string()), 7).expect("parsed"), 12);
        assert!(parse_usize(Some("many".to_string()), 7).is_err());
        assert!(parse_u64(Some("-1".to_string()), 3).is_err());
    }

    #[test]
    fn default_config_is_valid() {
        let config = IndexConfig::default();
        config.validate().expect("default config");
        assert_eq!(config.scan_caching, DEFAULT_SCAN_CACHING);
    }
}
