//! Configuration module for Aegis.
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::cache::{CacheConfig, DEFAULT_INVALIDATION_TOPIC, PermissionCacheConfig};

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,

    /// Redis for the shared tier and invalidation broadcast.
    /// When unset, both run in-process (single node only).
    pub redis_url: Option<String>,

    pub cache: PermissionCacheConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Fails if `MONGODB_URI` is missing or a numeric variable does not parse.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = PermissionCacheConfig::default();

        let capacity = parse_var("PERMISSION_CACHE_CAPACITY")?
            .unwrap_or(defaults.local.max_capacity);
        let local_ttl = parse_var("PERMISSION_CACHE_TTL_SECS")?
            .map(Duration::from_secs)
            .or(defaults.local.ttl);
        let shared_ttl = parse_var("PERMISSION_SHARED_TTL_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(defaults.shared_ttl);

        let mut local = CacheConfig::with_capacity(capacity);
        local.ttl = local_ttl;

        let topic = env::var("PERMISSION_INVALIDATION_TOPIC")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_INVALIDATION_TOPIC.to_string());

        Ok(Self {
            mongodb_uri: env::var("MONGODB_URI").context("MONGODB_URI must be set")?,
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "aegis".to_string()),
            redis_url: env::var("REDIS_URL").ok().filter(|s| !s.trim().is_empty()),
            cache: PermissionCacheConfig {
                local,
                shared_ttl,
                topic,
                ..defaults
            },
        })
    }
}

/// Read an optional variable, failing if it is set but does not parse.
fn parse_var<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_var_unset() {
        let parsed: Option<u64> = parse_var("AEGIS_TEST_SURELY_UNSET_VARIABLE").unwrap();
        assert_eq!(parsed, None);
    }

    #[test]
    fn test_parse_var_values() {
        // SAFETY: the variable names are unique to this test.
        unsafe {
            env::set_var("AEGIS_TEST_PARSE_OK", " 42 ");
            env::set_var("AEGIS_TEST_PARSE_BAD", "soon");
        }

        assert_eq!(parse_var::<u64>("AEGIS_TEST_PARSE_OK").unwrap(), Some(42));

        let err = parse_var::<u64>("AEGIS_TEST_PARSE_BAD").unwrap_err();
        assert!(err.to_string().contains("AEGIS_TEST_PARSE_BAD"));
    }
}
