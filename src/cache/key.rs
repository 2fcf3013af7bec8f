//! Resolution context keys.

use std::fmt;

use crate::permissions::Snowflake;

/// Namespace prefix for tier-2 keys.
pub const SHARED_KEY_PREFIX: &str = "perm:";

/// Prefix of the tier-2 invalidation counters. Never parses as a `CacheKey`.
pub const EPOCH_KEY_PREFIX: &str = "perm:epoch:";

/// Counter bumped whenever the whole guild is invalidated.
pub fn guild_epoch_key(guild_id: Snowflake) -> String {
    format!("{EPOCH_KEY_PREFIX}{guild_id}")
}

/// Counter bumped whenever one member of the guild is invalidated.
pub fn user_epoch_key(guild_id: Snowflake, user_id: Snowflake) -> String {
    format!("{EPOCH_KEY_PREFIX}{guild_id}:{user_id}")
}

/// Identifies one resolution context: a user in a guild, optionally in one
/// of its channels.
///
/// Renders as `<user>:<guild>` or `<user>:<guild>:<channel>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub user_id: Snowflake,
    pub guild_id: Snowflake,
    pub channel_id: Option<Snowflake>,
}

impl CacheKey {
    pub fn guild(user_id: Snowflake, guild_id: Snowflake) -> Self {
        Self {
            user_id,
            guild_id,
            channel_id: None,
        }
    }

    pub fn channel(user_id: Snowflake, guild_id: Snowflake, channel_id: Snowflake) -> Self {
        Self {
            user_id,
            guild_id,
            channel_id: Some(channel_id),
        }
    }

    /// Key under which this context is stored in the shared tier.
    pub fn shared_key(&self) -> String {
        format!("{SHARED_KEY_PREFIX}{self}")
    }

    /// The guild and member counters a tier-2 value for this key is
    /// stamped against.
    pub fn epoch_keys(&self) -> [String; 2] {
        [
            guild_epoch_key(self.guild_id),
            user_epoch_key(self.guild_id, self.user_id),
        ]
    }

    /// Parse a tier-2 key back into a `CacheKey`.
    pub fn from_shared_key(raw: &str) -> Option<Self> {
        let mut parts = raw.strip_prefix(SHARED_KEY_PREFIX)?.split(':');

        let user_id = parts.next()?.parse().ok()?;
        let guild_id = parts.next()?.parse().ok()?;
        let channel_id = match parts.next() {
            Some(part) => Some(part.parse().ok()?),
            None => None,
        };

        if parts.next().is_some() {
            return None;
        }

        Some(Self {
            user_id,
            guild_id,
            channel_id,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.channel_id {
            Some(channel_id) => write!(f, "{}:{}:{}", self.user_id, self.guild_id, channel_id),
            None => write!(f, "{}:{}", self.user_id, self.guild_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_key_format() {
        assert_eq!(CacheKey::guild(1, 2).shared_key(), "perm:1:2");
        assert_eq!(CacheKey::channel(1, 2, 3).shared_key(), "perm:1:2:3");
    }

    #[test]
    fn test_parse_shared_key() {
        for key in [CacheKey::guild(7, 8), CacheKey::channel(7, 8, 9)] {
            assert_eq!(CacheKey::from_shared_key(&key.shared_key()), Some(key));
        }
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        assert_eq!(CacheKey::from_shared_key("perm:1"), None);
        assert_eq!(CacheKey::from_shared_key("perm:1:2:3:4"), None);
        assert_eq!(CacheKey::from_shared_key("session:1:2"), None);
        assert_eq!(CacheKey::from_shared_key("perm:a:2"), None);
        assert_eq!(CacheKey::from_shared_key(&guild_epoch_key(2)), None);
        assert_eq!(CacheKey::from_shared_key(&user_epoch_key(2, 1)), None);
    }

    #[test]
    fn test_epoch_keys() {
        assert_eq!(
            CacheKey::channel(1, 2, 3).epoch_keys(),
            ["perm:epoch:2".to_string(), "perm:epoch:2:1".to_string()]
        );
    }
}
