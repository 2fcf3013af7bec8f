//! Capability bitfield.
//!
//! Backed by a `u128` so the permission space can keep growing past the
//! 64-bit mark without truncation. Values are immutable; every combinator
//! returns a new `Permissions`.

use std::fmt;
use std::ops::{BitAnd, BitOr, Not};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! permission_flags {
    ($($(#[$meta:meta])* $name:ident = $bit:expr;)+) => {
        impl Permissions {
            $(
                $(#[$meta])*
                pub const $name: Self = Self(1 << $bit);
            )+

            /// Every named flag, in bit order.
            const NAMED: &'static [(&'static str, Self)] = &[
                $((stringify!($name), Self::$name),)+
            ];

            const DEFINED: u128 = 0 $(| (1 << $bit))+;
        }
    };
}

/// An immutable set of capability bits.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Permissions(u128);

permission_flags! {
    CREATE_INVITE = 0;
    KICK_MEMBERS = 1;
    BAN_MEMBERS = 2;
    /// Grants every capability; short-circuits overwrite processing.
    ADMINISTRATOR = 3;
    MANAGE_CHANNELS = 4;
    MANAGE_GUILD = 5;
    ADD_REACTIONS = 6;
    VIEW_AUDIT_LOG = 7;
    PRIORITY_SPEAKER = 8;
    STREAM = 9;
    /// Without this bit a member has no permissions at all in a channel.
    VIEW_CHANNEL = 10;
    SEND_MESSAGES = 11;
    SEND_TTS_MESSAGES = 12;
    MANAGE_MESSAGES = 13;
    EMBED_LINKS = 14;
    ATTACH_FILES = 15;
    READ_MESSAGE_HISTORY = 16;
    MENTION_EVERYONE = 17;
    USE_EXTERNAL_EMOJIS = 18;
    VIEW_GUILD_INSIGHTS = 19;
    CONNECT = 20;
    SPEAK = 21;
    MUTE_MEMBERS = 22;
    DEAFEN_MEMBERS = 23;
    MOVE_MEMBERS = 24;
    USE_VOICE_ACTIVITY = 25;
    CHANGE_NICKNAME = 26;
    MANAGE_NICKNAMES = 27;
    MANAGE_ROLES = 28;
    MANAGE_WEBHOOKS = 29;
    MANAGE_EXPRESSIONS = 30;
    USE_COMMANDS = 31;
    REQUEST_TO_SPEAK = 32;
    MANAGE_EVENTS = 33;
    MANAGE_THREADS = 34;
    CREATE_PUBLIC_THREADS = 35;
    CREATE_PRIVATE_THREADS = 36;
    USE_EXTERNAL_STICKERS = 37;
    SEND_MESSAGES_IN_THREADS = 38;
    USE_ACTIVITIES = 39;
    MODERATE_MEMBERS = 40;
    VIEW_MONETIZATION_ANALYTICS = 41;
    USE_SOUNDBOARD = 42;
    CREATE_EXPRESSIONS = 43;
    CREATE_EVENTS = 44;
    USE_EXTERNAL_SOUNDS = 45;
    SEND_VOICE_MESSAGES = 46;
    SET_VOICE_STATUS = 47;
    CREATE_FORUM_POSTS = 48;
    SEND_POLLS = 49;
    USE_EXTERNAL_APPS = 50;
    PIN_MESSAGES = 51;
}

impl Permissions {
    /// Wrap raw bits. Unknown bits are kept as-is.
    pub const fn from_bits(bits: u128) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u128 {
        self.0
    }

    /// The empty set.
    pub const fn none() -> Self {
        Self(0)
    }

    /// Every defined capability.
    pub const fn all() -> Self {
        Self(Self::DEFINED)
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether `bit` is granted.
    ///
    /// Always true when the administrator bit is set.
    pub const fn has(self, bit: Self) -> bool {
        self.0 & Self::ADMINISTRATOR.0 != 0 || self.0 & bit.0 == bit.0
    }

    pub fn has_any(self, bits: impl IntoIterator<Item = Self>) -> bool {
        bits.into_iter().any(|bit| self.has(bit))
    }

    pub fn has_all(self, bits: impl IntoIterator<Item = Self>) -> bool {
        bits.into_iter().all(|bit| self.has(bit))
    }

    #[must_use]
    pub fn add(self, bits: impl IntoIterator<Item = Self>) -> Self {
        bits.into_iter().fold(self, |acc, bit| acc | bit)
    }

    #[must_use]
    pub fn remove(self, bits: impl IntoIterator<Item = Self>) -> Self {
        bits.into_iter().fold(self, |acc, bit| acc & !bit)
    }

    /// Apply one allow/deny pair: denied bits are cleared first, then
    /// allowed bits are set.
    #[must_use]
    pub const fn apply_overwrite(self, allow: Self, deny: Self) -> Self {
        Self((self.0 & !deny.0) | allow.0)
    }

    /// Names of the defined flags present in this value.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMED
            .iter()
            .filter(|(_, flag)| self.0 & flag.0 == flag.0)
            .map(|(name, _)| *name)
            .collect()
    }

    /// Look up a named flag, case-insensitively.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::NAMED
            .iter()
            .find(|(flag_name, _)| flag_name.eq_ignore_ascii_case(name))
            .map(|(_, flag)| *flag)
    }
}

impl BitOr for Permissions {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitAnd for Permissions {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Not for Permissions {
    type Output = Self;

    fn not(self) -> Self {
        Self(!self.0)
    }
}

impl fmt::Display for Permissions {
    /// Decimal string, the same form used on the wire and in storage.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Permissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Permissions")
            .field(&self.0)
            .field(&self.names().join("|"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid permission bitfield {input:?}")]
pub struct ParsePermissionsError {
    input: String,
}

impl FromStr for Permissions {
    type Err = ParsePermissionsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u128>()
            .map(Self)
            .map_err(|_| ParsePermissionsError {
                input: s.to_string(),
            })
    }
}

impl Serialize for Permissions {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Permissions {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_everything() {
        let perms = Permissions::ADMINISTRATOR;
        assert!(perms.has(Permissions::BAN_MEMBERS));
        assert!(perms.has(Permissions::PIN_MESSAGES));
        assert!(perms.has(Permissions::from_bits(1 << 120)));
    }

    #[test]
    fn test_has_requires_every_bit() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        assert!(perms.has(Permissions::VIEW_CHANNEL));
        assert!(perms.has(Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES));
        assert!(!perms.has(Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES));
        assert!(perms.has(Permissions::none()));
    }

    #[test]
    fn test_any_and_all() {
        let perms = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        assert!(perms.has_any([Permissions::KICK_MEMBERS, Permissions::SEND_MESSAGES]));
        assert!(!perms.has_any([Permissions::KICK_MEMBERS, Permissions::BAN_MEMBERS]));
        assert!(perms.has_all([Permissions::VIEW_CHANNEL, Permissions::SEND_MESSAGES]));
        assert!(!perms.has_all([Permissions::VIEW_CHANNEL, Permissions::KICK_MEMBERS]));
    }

    #[test]
    fn test_add_remove_leave_receiver_untouched() {
        let base = Permissions::VIEW_CHANNEL;
        let added = base.add([Permissions::SEND_MESSAGES, Permissions::ATTACH_FILES]);
        let removed = added.remove([Permissions::VIEW_CHANNEL]);

        assert_eq!(base, Permissions::VIEW_CHANNEL);
        assert_eq!(
            added,
            Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES
        );
        assert_eq!(removed, Permissions::SEND_MESSAGES | Permissions::ATTACH_FILES);
    }

    #[test]
    fn test_all_covers_every_defined_flag() {
        let all = Permissions::all();
        assert_eq!(all.bits(), (1u128 << 52) - 1);
        assert_eq!(all.names().len(), 52);
        assert!(Permissions::none().is_empty());
    }

    #[test]
    fn test_apply_overwrite_denies_before_allowing() {
        let base = Permissions::VIEW_CHANNEL | Permissions::SEND_MESSAGES;
        let result = base.apply_overwrite(Permissions::SEND_MESSAGES, Permissions::SEND_MESSAGES);
        assert_eq!(result, base);

        let result = base.apply_overwrite(Permissions::none(), Permissions::SEND_MESSAGES);
        assert_eq!(result, Permissions::VIEW_CHANNEL);
    }

    #[test]
    fn test_decimal_round_trip() {
        for value in [
            Permissions::none(),
            Permissions::all(),
            Permissions::ADMINISTRATOR,
            Permissions::from_bits(u128::MAX),
        ] {
            let encoded = value.to_string();
            assert_eq!(encoded.parse::<Permissions>().unwrap(), value);
        }
        assert_eq!(Permissions::ADMINISTRATOR.to_string(), "8");
        assert_eq!(Permissions::all().to_string(), "4503599627370495");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Permissions>().is_err());
        assert!("-1".parse::<Permissions>().is_err());
        assert!("0x10".parse::<Permissions>().is_err());
    }

    #[test]
    fn test_serde_uses_decimal_string() {
        let json = serde_json::to_string(&Permissions::all()).unwrap();
        assert_eq!(json, "\"4503599627370495\"");
        let back: Permissions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Permissions::all());
    }

    #[test]
    fn test_from_name() {
        assert_eq!(Permissions::from_name("view_channel"), Some(Permissions::VIEW_CHANNEL));
        assert_eq!(Permissions::from_name("nope"), None);
    }
}
