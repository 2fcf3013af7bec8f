//! Two-tier permission cache with request coalescing and cross-process
//! invalidation.
//!
//! Lookup order: tier 1 (this process) → tier 2 (shared) → one coalesced
//! computation per key. Fresh results are written to tier 1, then tier 2,
//! stamped with the tier-2 epoch read before computing.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    CacheError, CacheKey, Flights, InvalidationBus, InvalidationMessage, Notice,
    PermissionCacheConfig, SharedEntry, SharedTier, TypedCache,
};
use crate::permissions::{PermissionError, Permissions, Snowflake};

/// Tier 1 plus the generation counters that guard it.
///
/// A purge bumps its guild's generation; dropping everything bumps `resets`.
/// Work that started under an older generation of its guild must not
/// populate either tier.
#[derive(Clone)]
struct LocalTier {
    cache: TypedCache<CacheKey, Permissions>,
    generations: Arc<DashMap<Snowflake, u64>>,
    resets: Arc<AtomicU64>,
}

impl LocalTier {
    fn new(cache: TypedCache<CacheKey, Permissions>) -> Self {
        Self {
            cache,
            generations: Arc::new(DashMap::new()),
            resets: Arc::new(AtomicU64::new(0)),
        }
    }

    fn generation(&self, guild_id: Snowflake) -> (u64, u64) {
        let guild = self.generations.get(&guild_id).map_or(0, |generation| *generation);
        (self.resets.load(Ordering::Acquire), guild)
    }

    fn purge(&self, scope: &InvalidationMessage) -> usize {
        *self.generations.entry(scope.guild_id).or_default() += 1;
        self.cache.purge(|key| scope.matches(key))
    }

    fn purge_all(&self) {
        self.resets.fetch_add(1, Ordering::AcqRel);
        self.cache.invalidate_all();
    }
}

/// Counters describing how lookups were served.
#[derive(Debug, Default)]
struct CacheStats {
    local_hits: AtomicU64,
    shared_hits: AtomicU64,
    computed: AtomicU64,
    shared_errors: AtomicU64,
}

/// Point-in-time copy of the cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStatsSnapshot {
    pub local_hits: u64,
    pub shared_hits: u64,
    /// Resolver invocations.
    pub computed: u64,
    pub shared_errors: u64,
}

struct Listener {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Process-wide permission cache.
///
/// Built once per process with [`start`](Self::start), which subscribes to
/// the invalidation topic; stopped with [`shutdown`](Self::shutdown).
pub struct PermissionCache {
    local: LocalTier,
    shared: Arc<dyn SharedTier>,
    bus: Arc<dyn InvalidationBus>,
    flights: Arc<Flights<CacheKey, Permissions, PermissionError>>,
    stats: Arc<CacheStats>,
    config: PermissionCacheConfig,
    listener: Mutex<Option<Listener>>,
}

impl PermissionCache {
    /// Build the cache and start listening for invalidations.
    pub async fn start(
        config: PermissionCacheConfig,
        shared: Arc<dyn SharedTier>,
        bus: Arc<dyn InvalidationBus>,
    ) -> Result<Self, CacheError> {
        let local = LocalTier::new(TypedCache::new("permissions", config.local.clone()));
        let flights = Arc::new(Flights::new());

        let notices = bus.subscribe(&config.topic).await?;
        let (stop, stopped) = oneshot::channel();
        let handle = tokio::spawn(listen(
            notices,
            stopped,
            local.clone(),
            Arc::clone(&flights),
            Arc::clone(&bus),
            config.clone(),
        ));

        info!(
            "Permission cache started (capacity {}, topic {})",
            config.local.max_capacity, config.topic
        );

        Ok(Self {
            local,
            shared,
            bus,
            flights,
            stats: Arc::new(CacheStats::default()),
            config,
            listener: Mutex::new(Some(Listener { stop, handle })),
        })
    }

    /// Return the cached value for `key`, or run `compute` once for every
    /// concurrent caller of the same key and cache its result.
    ///
    /// Errors from `compute` reach every waiting caller and are not cached.
    /// Shared-tier failures are logged and bypassed.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        compute: F,
    ) -> Result<Permissions, PermissionError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Permissions, PermissionError>> + Send + 'static,
    {
        if let Some(value) = self.local.cache.get(&key) {
            self.stats.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }

        let generation = self.local.generation(key.guild_id);
        let epoch = match self.shared.get(&key).await {
            Ok(SharedEntry {
                value: Some(value), ..
            }) if self.local.generation(key.guild_id) == generation => {
                self.stats.shared_hits.fetch_add(1, Ordering::Relaxed);
                self.local.cache.insert(key, value);
                return Ok(value);
            }
            // A miss, or purged while reading. Either way, recompute.
            Ok(entry) => Some(entry.epoch),
            Err(e) => {
                self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Shared cache read for {} failed, recomputing: {}", key, e);
                None
            }
        };

        let local = self.local.clone();
        let shared = Arc::clone(&self.shared);
        let stats = Arc::clone(&self.stats);
        let shared_ttl = self.config.shared_ttl;

        self.flights
            .run(key, async move {
                if let Some(value) = local.cache.get(&key) {
                    return Ok(value);
                }

                let generation = local.generation(key.guild_id);
                stats.computed.fetch_add(1, Ordering::Relaxed);
                let value = compute().await?;

                if local.generation(key.guild_id) != generation {
                    debug!("Not caching {} for {}: invalidated mid-computation", value, key);
                    return Ok(value);
                }

                local.cache.insert(key, value);

                // Without an epoch there is nothing to stamp the value with.
                let Some(epoch) = epoch else {
                    return Ok(value);
                };
                if let Err(e) = shared.set(&key, value, epoch, shared_ttl).await {
                    stats.shared_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Shared cache write for {} failed: {}", key, e);
                }

                Ok(value)
            })
            .await
    }

    /// Purge one user's entries in a guild, in every process.
    pub async fn invalidate(&self, user_id: Snowflake, guild_id: Snowflake) {
        self.invalidate_scope(InvalidationMessage::user(user_id, guild_id))
            .await;
    }

    /// Purge every entry for a guild, in every process.
    pub async fn invalidate_guild(&self, guild_id: Snowflake) {
        self.invalidate_scope(InvalidationMessage::guild(guild_id))
            .await;
    }

    async fn invalidate_scope(&self, scope: InvalidationMessage) {
        let purged = self.purge_local(&scope);

        if let Err(e) = self.shared.purge(&scope, self.config.shared_ttl).await {
            self.stats.shared_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Shared cache purge for guild {} failed: {}", scope.guild_id, e);
        }

        // A tier-2 read racing the purge above may have refilled tier 1.
        self.purge_local(&scope);

        if let Err(e) = self.bus.publish(&self.config.topic, &scope).await {
            warn!(
                "Invalidation broadcast for guild {} failed, peers stay stale up to their TTL: {}",
                scope.guild_id, e
            );
        }

        debug!(
            "Invalidated permissions for guild {} (user {:?}), {} local entries",
            scope.guild_id, scope.user_id, purged
        );
    }

    fn purge_local(&self, scope: &InvalidationMessage) -> usize {
        self.flights.forget(|key| scope.matches(key));
        self.local.purge(scope)
    }

    /// Tier-1 lookup only. Does not touch tier 2 or compute anything.
    pub fn cached(&self, key: &CacheKey) -> Option<Permissions> {
        self.local.cache.get(key)
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            local_hits: self.stats.local_hits.load(Ordering::Relaxed),
            shared_hits: self.stats.shared_hits.load(Ordering::Relaxed),
            computed: self.stats.computed.load(Ordering::Relaxed),
            shared_errors: self.stats.shared_errors.load(Ordering::Relaxed),
        }
    }

    /// Stop the invalidation listener. Idempotent.
    pub async fn shutdown(&self) {
        let listener = self.listener.lock().take();
        let Some(Listener { stop, handle }) = listener else {
            return;
        };

        stop.send(()).ok();
        if let Err(e) = handle.await {
            warn!("Invalidation listener ended abnormally: {}", e);
        }
        info!("Permission cache shut down");
    }
}

impl Drop for PermissionCache {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.get_mut().take() {
            listener.handle.abort();
        }
    }
}

/// Apply invalidations from the bus until told to stop.
///
/// If the subscription ends, everything local is purged (messages may have
/// been missed) and the subscription is retried.
async fn listen(
    mut notices: futures::stream::BoxStream<'static, Notice>,
    mut stop: oneshot::Receiver<()>,
    local: LocalTier,
    flights: Arc<Flights<CacheKey, Permissions, PermissionError>>,
    bus: Arc<dyn InvalidationBus>,
    config: PermissionCacheConfig,
) {
    loop {
        tokio::select! {
            _ = &mut stop => break,
            notice = notices.next() => match notice {
                Some(Notice::Invalidate(scope)) => {
                    flights.forget(|key| scope.matches(key));
                    let purged = local.purge(&scope);
                    debug!(
                        "Remote invalidation for guild {} (user {:?}), {} local entries",
                        scope.guild_id, scope.user_id, purged
                    );
                }
                Some(Notice::Resync) => {
                    warn!("Invalidation messages lost, dropping local permission cache");
                    flights.forget(|_| true);
                    local.purge_all();
                }
                None => {
                    warn!("Invalidation subscription closed, dropping local permission cache");
                    flights.forget(|_| true);
                    local.purge_all();

                    match resubscribe(&bus, &config, &mut stop).await {
                        Some(stream) => notices = stream,
                        None => break,
                    }
                }
            },
        }
    }

    debug!("Invalidation listener stopped");
}

/// Retry the subscription until it succeeds or `stop` fires.
async fn resubscribe(
    bus: &Arc<dyn InvalidationBus>,
    config: &PermissionCacheConfig,
    stop: &mut oneshot::Receiver<()>,
) -> Option<futures::stream::BoxStream<'static, Notice>> {
    loop {
        tokio::select! {
            _ = &mut *stop => return None,
            _ = tokio::time::sleep(config.resubscribe_delay) => {}
        }

        match bus.subscribe(&config.topic).await {
            Ok(stream) => {
                info!("Re-subscribed to invalidation topic {}", config.topic);
                return Some(stream);
            }
            Err(e) => warn!("Re-subscribing to {} failed: {}", config.topic, e),
        }
    }
}
