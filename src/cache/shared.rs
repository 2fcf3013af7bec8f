//! Tier 2: the cache shared by every process.
//!
//! Entries live under `perm:<user>:<guild>[:<channel>]`. Each value is the
//! decimal bitfield stamped with the guild and member epochs it was computed
//! under (`<bits>:<guild epoch>:<member epoch>`). Purging bumps an epoch, so
//! a value written by a computation that started before the purge reads as
//! a miss even if it lands after the keys were deleted.
//!
//! Nothing here is authoritative; every value can be rebuilt from storage.

use std::collections::HashMap;
use std::pin::pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use fred::clients::RedisClient;
use fred::interfaces::{ClientLike, KeysInterface};
use fred::types::{Expiration, ReconnectPolicy, RedisConfig, RedisKey, Scanner};
use futures::TryStreamExt;
use parking_lot::Mutex;
use tracing::{debug, warn};

use super::{CacheError, CacheKey, InvalidationMessage};
use crate::permissions::Permissions;

/// Keys requested per `SCAN` round trip.
const SCAN_PAGE_SIZE: u32 = 200;

/// Invalidation counters a tier-2 value is stamped with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Epoch {
    pub guild: u64,
    pub user: u64,
}

/// Result of a tier-2 read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SharedEntry {
    /// `None` on a miss, including values stamped with an older epoch.
    pub value: Option<Permissions>,
    /// Current epoch for the key. Stamp any value computed afterwards with it.
    pub epoch: Epoch,
}

#[async_trait]
pub trait SharedTier: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<SharedEntry, CacheError>;

    /// Store `value` stamped with the epoch read before it was computed.
    async fn set(
        &self,
        key: &CacheKey,
        value: Permissions,
        epoch: Epoch,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Bump the scope's epoch, then delete every entry inside it. `ttl` is
    /// the entry lifetime; epoch counters outlive it. Returns the number of
    /// entries deleted.
    async fn purge(&self, scope: &InvalidationMessage, ttl: Duration) -> Result<usize, CacheError>;
}

fn encode(value: Permissions, epoch: Epoch) -> String {
    format!("{}:{}:{}", value, epoch.guild, epoch.user)
}

fn parse_stamped(raw: &str) -> Option<(Permissions, Epoch)> {
    let mut parts = raw.split(':');
    let value = parts.next()?.parse().ok()?;
    let stamp = Epoch {
        guild: parts.next()?.parse().ok()?,
        user: parts.next()?.parse().ok()?,
    };
    parts.next().is_none().then_some((value, stamp))
}

/// Decode a stored value, treating corrupt or outdated values as a miss.
fn decode(key: &CacheKey, raw: &str, epoch: Epoch) -> Option<Permissions> {
    match parse_stamped(raw) {
        Some((value, stamp)) if stamp == epoch => Some(value),
        Some(_) => {
            debug!("Ignoring outdated shared entry for {}", key);
            None
        }
        None => {
            warn!("Ignoring malformed shared entry for {}: {:?}", key, raw);
            None
        }
    }
}

fn parse_epoch(counter: &str, raw: Option<String>) -> Result<u64, CacheError> {
    match raw {
        None => Ok(0),
        Some(raw) => raw.parse().map_err(|_| CacheError::Decode {
            key: counter.to_string(),
            value: raw,
        }),
    }
}

/// Epoch counters expire well after any value stamped with them.
fn epoch_ttl(ttl: Duration) -> i64 {
    (ttl.as_secs().max(1) * 2) as i64
}

/// Redis-backed tier 2.
pub struct RedisSharedTier {
    client: RedisClient,
}

impl RedisSharedTier {
    #[tracing::instrument(skip_all, name = "RedisSharedTier::connect", err)]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let client = RedisClient::new(
            RedisConfig::from_url(url)?,
            None,
            None,
            Some(reconnect_policy()),
        );
        client.init().await?;
        Ok(Self { client })
    }

    pub fn from_client(client: RedisClient) -> Self {
        Self { client }
    }
}

/// Retry forever, backing off from 100 ms up to 30 s.
pub(super) fn reconnect_policy() -> ReconnectPolicy {
    ReconnectPolicy::new_exponential(0, 100, 30_000, 2)
}

#[async_trait]
impl SharedTier for RedisSharedTier {
    async fn get(&self, key: &CacheKey) -> Result<SharedEntry, CacheError> {
        let [guild_counter, user_counter] = key.epoch_keys();
        let mut values = self
            .client
            .mget::<Vec<Option<String>>, _>(vec![
                key.shared_key(),
                guild_counter.clone(),
                user_counter.clone(),
            ])
            .await?
            .into_iter();

        let raw = values.next().flatten();
        let epoch = Epoch {
            guild: parse_epoch(&guild_counter, values.next().flatten())?,
            user: parse_epoch(&user_counter, values.next().flatten())?,
        };

        Ok(SharedEntry {
            value: raw.and_then(|raw| decode(key, &raw, epoch)),
            epoch,
        })
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Permissions,
        epoch: Epoch,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let seconds = ttl.as_secs().max(1) as i64;
        self.client
            .set::<(), _, _>(
                key.shared_key(),
                encode(value, epoch),
                Some(Expiration::EX(seconds)),
                None,
                false,
            )
            .await?;
        Ok(())
    }

    /// Walks the keyspace with `SCAN` so no single command blocks the
    /// server, deleting each page's matches before asking for the next.
    async fn purge(&self, scope: &InvalidationMessage, ttl: Duration) -> Result<usize, CacheError> {
        let counter = scope.epoch_key();
        self.client.incr::<i64, _>(counter.as_str()).await?;
        self.client
            .expire::<(), _>(counter.as_str(), epoch_ttl(ttl))
            .await?;

        let pattern = scope.shared_pattern();
        let mut pages = pin!(self.client.scan(pattern.as_str(), Some(SCAN_PAGE_SIZE), None));
        let mut deleted = 0;

        while let Some(mut page) = pages.try_next().await? {
            let doomed: Vec<RedisKey> = page
                .take_results()
                .unwrap_or_default()
                .into_iter()
                .filter(|key| {
                    key.as_str()
                        .and_then(CacheKey::from_shared_key)
                        .is_some_and(|key| scope.matches(&key))
                })
                .collect();

            if !doomed.is_empty() {
                deleted += doomed.len();
                self.client.del::<i64, _>(doomed).await?;
            }

            page.next()?;
        }

        debug!("Purged {} shared entries matching {}", deleted, pattern);
        Ok(deleted)
    }
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<String, (String, Instant)>,
    epochs: HashMap<String, u64>,
}

impl MemoryState {
    fn epoch(&self, key: &CacheKey) -> Epoch {
        let [guild, user] = key.epoch_keys();
        Epoch {
            guild: self.epochs.get(&guild).copied().unwrap_or_default(),
            user: self.epochs.get(&user).copied().unwrap_or_default(),
        }
    }
}

/// In-process stand-in for Redis, shared by cloning an `Arc` of it.
#[derive(Default)]
pub struct MemorySharedTier {
    state: Mutex<MemoryState>,
}

impl MemorySharedTier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw value, bypassing encoding.
    pub fn insert_raw(&self, key: &CacheKey, raw: impl Into<String>, ttl: Duration) {
        self.state
            .lock()
            .entries
            .insert(key.shared_key(), (raw.into(), Instant::now() + ttl));
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.state
            .lock()
            .entries
            .values()
            .filter(|(_, expires_at)| *expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SharedTier for MemorySharedTier {
    async fn get(&self, key: &CacheKey) -> Result<SharedEntry, CacheError> {
        let (raw, epoch) = {
            let mut state = self.state.lock();
            let epoch = state.epoch(key);
            let shared_key = key.shared_key();
            let raw = state
                .entries
                .get(&shared_key)
                .map(|(raw, expires_at)| (raw.clone(), *expires_at));
            let raw = match raw {
                Some((_, expires_at)) if expires_at <= Instant::now() => {
                    state.entries.remove(&shared_key);
                    None
                }
                Some((raw, _)) => Some(raw),
                None => None,
            };
            (raw, epoch)
        };

        Ok(SharedEntry {
            value: raw.and_then(|raw| decode(key, &raw, epoch)),
            epoch,
        })
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Permissions,
        epoch: Epoch,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        self.insert_raw(key, encode(value, epoch), ttl);
        Ok(())
    }

    async fn purge(
        &self,
        scope: &InvalidationMessage,
        _ttl: Duration,
    ) -> Result<usize, CacheError> {
        let mut state = self.state.lock();
        *state.epochs.entry(scope.epoch_key()).or_default() += 1;

        let before = state.entries.len();
        state.entries.retain(|raw, _| {
            !CacheKey::from_shared_key(raw).is_some_and(|key| scope.matches(&key))
        });
        Ok(before - state.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    async fn store(tier: &dyn SharedTier, key: &CacheKey, value: Permissions) {
        let epoch = tier.get(key).await.unwrap().epoch;
        tier.set(key, value, epoch, TTL).await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_tier_round_trip() {
        let tier = MemorySharedTier::new();
        let key = CacheKey::channel(1, 2, 3);

        assert_eq!(tier.get(&key).await.unwrap().value, None);
        store(&tier, &key, Permissions::all()).await;
        assert_eq!(tier.get(&key).await.unwrap().value, Some(Permissions::all()));
    }

    #[tokio::test]
    async fn test_memory_tier_expires() {
        let tier = MemorySharedTier::new();
        let key = CacheKey::guild(1, 2);
        tier.set(&key, Permissions::VIEW_CHANNEL, Epoch::default(), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tier.get(&key).await.unwrap().value, None);
    }

    #[tokio::test]
    async fn test_corrupt_values_read_as_miss() {
        let tier = MemorySharedTier::new();
        let key = CacheKey::guild(1, 2);

        for raw in ["not-a-number", "1024", "1024:0", "1024:0:0:0"] {
            tier.insert_raw(&key, raw, TTL);
            assert_eq!(tier.get(&key).await.unwrap().value, None, "{raw}");
        }
    }

    #[tokio::test]
    async fn test_write_from_before_purge_is_ignored() {
        let tier = MemorySharedTier::new();
        let key = CacheKey::guild(1, 2);

        let before = tier.get(&key).await.unwrap().epoch;
        tier.purge(&InvalidationMessage::user(1, 2), TTL).await.unwrap();
        tier.set(&key, Permissions::SEND_MESSAGES, before, TTL)
            .await
            .unwrap();
        assert_eq!(tier.get(&key).await.unwrap().value, None);

        let before = tier.get(&key).await.unwrap().epoch;
        tier.purge(&InvalidationMessage::guild(2), TTL).await.unwrap();
        tier.set(&key, Permissions::SEND_MESSAGES, before, TTL)
            .await
            .unwrap();
        assert_eq!(tier.get(&key).await.unwrap().value, None);

        store(&tier, &key, Permissions::VIEW_CHANNEL).await;
        assert_eq!(tier.get(&key).await.unwrap().value, Some(Permissions::VIEW_CHANNEL));
    }

    #[tokio::test]
    async fn test_member_purge_leaves_other_members_current() {
        let tier = MemorySharedTier::new();
        let other = CacheKey::guild(3, 2);
        store(&tier, &other, Permissions::VIEW_CHANNEL).await;

        tier.purge(&InvalidationMessage::user(1, 2), TTL).await.unwrap();

        assert_eq!(tier.get(&other).await.unwrap().value, Some(Permissions::VIEW_CHANNEL));
    }

    #[tokio::test]
    async fn test_memory_tier_purge_respects_scope() {
        let tier = MemorySharedTier::new();
        for key in [
            CacheKey::guild(1, 10),
            CacheKey::channel(1, 10, 5),
            CacheKey::guild(2, 10),
            CacheKey::guild(1, 100),
            CacheKey::channel(3, 1, 10),
        ] {
            store(&tier, &key, Permissions::VIEW_CHANNEL).await;
        }

        let removed = tier.purge(&InvalidationMessage::user(1, 10), TTL).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(tier.len(), 3);

        let removed = tier.purge(&InvalidationMessage::guild(10), TTL).await.unwrap();
        assert_eq!(removed, 1);
        assert!(tier.get(&CacheKey::guild(1, 100)).await.unwrap().value.is_some());
        assert!(tier.get(&CacheKey::channel(3, 1, 10)).await.unwrap().value.is_some());
    }

    /// Runs against a live server when `AEGIS_TEST_REDIS_URL` is set.
    #[tokio::test]
    async fn test_redis_tier() {
        dotenvy::dotenv().ok();
        let Ok(url) = std::env::var("AEGIS_TEST_REDIS_URL") else {
            return;
        };
        let tier = RedisSharedTier::connect(&url).await.expect("redis connects");

        // Fresh guild per run so leftovers from earlier runs never match.
        let guild = chrono::Utc::now().timestamp_micros() as u64;
        let mine = CacheKey::channel(1, guild, 5);
        let other = CacheKey::guild(2, guild);
        let elsewhere = CacheKey::guild(1, guild + 1);

        for key in [&mine, &other, &elsewhere] {
            store(&tier, key, Permissions::VIEW_CHANNEL).await;
            assert_eq!(tier.get(key).await.unwrap().value, Some(Permissions::VIEW_CHANNEL));
        }

        let stale = tier.get(&mine).await.unwrap().epoch;
        let removed = tier.purge(&InvalidationMessage::user(1, guild), TTL).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(tier.get(&mine).await.unwrap().value, None);
        assert!(tier.get(&other).await.unwrap().value.is_some());

        tier.set(&mine, Permissions::all(), stale, TTL).await.unwrap();
        assert_eq!(tier.get(&mine).await.unwrap().value, None);

        let removed = tier.purge(&InvalidationMessage::guild(guild), TTL).await.unwrap();
        assert_eq!(removed, 2);
        assert!(tier.get(&elsewhere).await.unwrap().value.is_some());
    }
}
