//! Two-tier permission cache.
//!
//! ## Architecture
//!
//! - `TypedCache` - Moka-backed LRU with TTL, one per process (tier 1)
//! - `SharedTier` - cache shared by the whole fleet, Redis in production (tier 2)
//! - `Flights` - per-key request coalescing
//! - `InvalidationBus` - pub/sub broadcast of purge scopes
//! - `PermissionCache` - ties the above together
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache = PermissionCache::start(config, shared, bus).await?;
//!
//! let perms = cache.get_or_compute(key, || resolve(key)).await?;
//! cache.invalidate_guild(guild_id).await;
//!
//! cache.shutdown().await;
//! ```

mod config;
mod error;
mod flight;
mod invalidation;
mod key;
mod permission_cache;
mod shared;
mod typed;

pub use config::{CacheConfig, DEFAULT_INVALIDATION_TOPIC, PermissionCacheConfig};
pub use error::CacheError;
pub use flight::Flights;
pub use invalidation::{InvalidationBus, InvalidationMessage, LocalBus, Notice, RedisBus};
pub use key::{CacheKey, EPOCH_KEY_PREFIX, SHARED_KEY_PREFIX, guild_epoch_key, user_epoch_key};
pub use permission_cache::{CacheStatsSnapshot, PermissionCache};
pub use shared::{Epoch, MemorySharedTier, RedisSharedTier, SharedEntry, SharedTier};
pub use typed::TypedCache;
