//! Cache configuration.

use std::time::Duration;

/// Default pub/sub topic for invalidation broadcasts.
pub const DEFAULT_INVALIDATION_TOPIC: &str = "permissions:invalidate";

/// Configuration for a process-local cache instance.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the cache.
    pub max_capacity: u64,

    /// Time-to-live for cache entries.
    /// After this duration, entries are treated as absent.
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::local_permissions()
    }
}

impl CacheConfig {
    /// Create a new cache config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity,
            ..Default::default()
        }
    }

    /// Set time-to-live for cache entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Tier-1 permission cache.
    ///
    /// The TTL doubles as the staleness ceiling when a broadcast is lost.
    pub fn local_permissions() -> Self {
        Self {
            max_capacity: 5_000,
            ttl: Some(Duration::from_secs(60)), // 1 minute
        }
    }
}

/// Settings for [`PermissionCache`](super::PermissionCache).
#[derive(Debug, Clone)]
pub struct PermissionCacheConfig {
    /// Tier 1.
    pub local: CacheConfig,

    /// Tier-2 entry lifetime.
    pub shared_ttl: Duration,

    /// Topic the invalidation broadcast is published on.
    pub topic: String,

    /// Pause between re-subscription attempts after the bus drops.
    pub resubscribe_delay: Duration,
}

impl Default for PermissionCacheConfig {
    fn default() -> Self {
        Self {
            local: CacheConfig::local_permissions(),
            shared_ttl: Duration::from_secs(300), // 5 minutes
            topic: DEFAULT_INVALIDATION_TOPIC.to_string(),
            resubscribe_delay: Duration::from_secs(1),
        }
    }
}
