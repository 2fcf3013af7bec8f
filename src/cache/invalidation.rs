//! Cross-process invalidation broadcast.
//!
//! Delivery is at-most-once. A process that misses a message stays stale
//! until its tier-1 TTL lapses; the listener purges everything it holds
//! whenever the bus reports that messages may have been dropped.

use async_trait::async_trait;
use fred::clients::{RedisClient, SubscriberClient};
use fred::interfaces::{ClientLike, EventInterface, PubsubInterface};
use fred::types::RedisConfig;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::shared::reconnect_policy;
use super::{CacheError, CacheKey, SHARED_KEY_PREFIX, guild_epoch_key, user_epoch_key};
use crate::permissions::Snowflake;

/// Scope of a purge: one user in a guild, or the whole guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidationMessage {
    pub user_id: Option<Snowflake>,
    pub guild_id: Snowflake,
}

impl InvalidationMessage {
    pub fn user(user_id: Snowflake, guild_id: Snowflake) -> Self {
        Self {
            user_id: Some(user_id),
            guild_id,
        }
    }

    pub fn guild(guild_id: Snowflake) -> Self {
        Self {
            user_id: None,
            guild_id,
        }
    }

    /// Whether `key` falls inside this scope (any channel included).
    pub fn matches(&self, key: &CacheKey) -> bool {
        key.guild_id == self.guild_id && self.user_id.is_none_or(|user_id| key.user_id == user_id)
    }

    /// Glob handed to `SCAN`. Broader than the scope; callers re-check each
    /// key with [`matches`](Self::matches).
    pub fn shared_pattern(&self) -> String {
        match self.user_id {
            Some(user_id) => format!("{}{}:{}*", SHARED_KEY_PREFIX, user_id, self.guild_id),
            None => format!("{}*:{}*", SHARED_KEY_PREFIX, self.guild_id),
        }
    }

    /// Tier-2 counter bumped when this scope is purged.
    pub fn epoch_key(&self) -> String {
        match self.user_id {
            Some(user_id) => user_epoch_key(self.guild_id, user_id),
            None => guild_epoch_key(self.guild_id),
        }
    }

    pub fn encode(&self) -> Result<String, CacheError> {
        Ok(serde_json::to_string(&WireMessage::from(*self))?)
    }

    pub fn decode(payload: &str) -> Result<Self, CacheError> {
        serde_json::from_str::<WireMessage>(payload)?.try_into()
    }
}

/// JSON payload: `{"userId"?: "<id>", "guildId": "<id>"}`.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    guild_id: String,
}

impl From<InvalidationMessage> for WireMessage {
    fn from(msg: InvalidationMessage) -> Self {
        Self {
            user_id: msg.user_id.map(|id| id.to_string()),
            guild_id: msg.guild_id.to_string(),
        }
    }
}

impl TryFrom<WireMessage> for InvalidationMessage {
    type Error = CacheError;

    fn try_from(wire: WireMessage) -> Result<Self, Self::Error> {
        let parse = |raw: &str| {
            raw.parse::<Snowflake>()
                .map_err(|_| CacheError::InvalidMessage(format!("bad id {raw:?}")))
        };

        Ok(Self {
            user_id: wire.user_id.as_deref().map(parse).transpose()?,
            guild_id: parse(&wire.guild_id)?,
        })
    }
}

/// What a subscription yields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Invalidate(InvalidationMessage),
    /// Messages may have been lost; everything cached locally is suspect.
    Resync,
}

/// Publish/subscribe transport for invalidation messages.
#[async_trait]
pub trait InvalidationBus: Send + Sync {
    async fn publish(&self, topic: &str, message: &InvalidationMessage) -> Result<(), CacheError>;

    /// Subscribe to `topic`. The stream ends when the subscription drops.
    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Notice>, CacheError>;
}

/// Redis pub/sub transport.
///
/// Subscribing puts a Redis connection into pub/sub mode, so publishing
/// goes through a separate client. Both reconnect forever with backoff.
/// The subscriber re-issues its subscriptions after every reconnect, and
/// each reconnect is reported as [`Notice::Resync`] since anything published
/// while it was down is gone.
pub struct RedisBus {
    publisher: RedisClient,
    subscriber: SubscriberClient,
    resubscriber: JoinHandle<()>,
}

impl RedisBus {
    #[tracing::instrument(skip_all, name = "RedisBus::connect", err)]
    pub async fn connect(url: &str) -> Result<Self, CacheError> {
        let config = RedisConfig::from_url(url)?;
        let publisher = RedisClient::new(config.clone(), None, None, Some(reconnect_policy()));
        let subscriber = SubscriberClient::new(config, None, None, Some(reconnect_policy()));

        publisher.init().await?;
        subscriber.init().await?;
        let resubscriber = subscriber.manage_subscriptions();

        Ok(Self {
            publisher,
            subscriber,
            resubscriber,
        })
    }
}

impl Drop for RedisBus {
    fn drop(&mut self) {
        self.resubscriber.abort();
    }
}

#[async_trait]
impl InvalidationBus for RedisBus {
    async fn publish(&self, topic: &str, message: &InvalidationMessage) -> Result<(), CacheError> {
        let payload = message.encode()?;
        self.publisher.publish::<(), _, _>(topic, payload).await?;
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Notice>, CacheError> {
        let rx = self.subscriber.message_rx();
        let reconnects = self.subscriber.reconnect_rx();
        self.subscriber.subscribe(topic).await?;
        debug!("Subscribed to invalidation topic {}", topic);

        let topic = topic.to_string();
        let messages = stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok(message) if &*message.channel != topic.as_str() => continue,
                        Ok(message) => {
                            let Some(payload) = message.value.as_string() else {
                                warn!("Ignoring non-string invalidation payload on {}", topic);
                                continue;
                            };
                            match InvalidationMessage::decode(&payload) {
                                Ok(msg) => return Some((Notice::Invalidate(msg), rx)),
                                Err(e) => {
                                    warn!(
                                        "Ignoring malformed invalidation payload {:?}: {}",
                                        payload, e
                                    );
                                    continue;
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("Invalidation listener lagged, {} messages dropped", skipped);
                            return Some((Notice::Resync, rx));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        let reconnects = stream::unfold(reconnects, |mut rx| async move {
            match rx.recv().await {
                Ok(server) => {
                    warn!("Invalidation subscriber reconnected to {}", server);
                    Some((Notice::Resync, rx))
                }
                Err(broadcast::error::RecvError::Lagged(_)) => Some((Notice::Resync, rx)),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        Ok(stream::select(messages, reconnects).boxed())
    }
}

/// In-process bus. Every subscriber of a clone sees every message published
/// through any clone, which is enough for single-node deployments and for
/// simulating several processes in tests.
#[derive(Clone)]
pub struct LocalBus {
    tx: broadcast::Sender<(String, String)>,
}

impl LocalBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    /// Publish a raw payload, bypassing encoding.
    pub fn publish_raw(&self, topic: &str, payload: impl Into<String>) {
        // No receivers is not an error for a broadcast.
        self.tx.send((topic.to_string(), payload.into())).ok();
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InvalidationBus for LocalBus {
    async fn publish(&self, topic: &str, message: &InvalidationMessage) -> Result<(), CacheError> {
        self.publish_raw(topic, message.encode()?);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> Result<BoxStream<'static, Notice>, CacheError> {
        let rx = self.tx.subscribe();
        let topic = topic.to_string();

        let notices = stream::unfold(rx, move |mut rx| {
            let topic = topic.clone();
            async move {
                loop {
                    match rx.recv().await {
                        Ok((channel, _)) if channel != topic => continue,
                        Ok((_, payload)) => match InvalidationMessage::decode(&payload) {
                            Ok(msg) => return Some((Notice::Invalidate(msg), rx)),
                            Err(e) => {
                                warn!(
                                    "Ignoring malformed invalidation payload {:?}: {}",
                                    payload, e
                                );
                                continue;
                            }
                        },
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            return Some((Notice::Resync, rx));
                        }
                        Err(broadcast::error::RecvError::Closed) => return None,
                    }
                }
            }
        });

        Ok(notices.boxed())
    }
}
