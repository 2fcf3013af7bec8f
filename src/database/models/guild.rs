//! Guild and channel documents.

use serde::{Deserialize, Serialize};

use crate::permissions::Snowflake;

/// A guild. Only ownership matters for permission resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuildDocument {
    pub guild_id: i64,
    pub owner_id: i64,
    #[serde(default)]
    pub name: Option<String>,
}

impl GuildDocument {
    pub fn owner(&self) -> Snowflake {
        self.owner_id as Snowflake
    }
}

/// A channel belonging to one guild.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelDocument {
    pub channel_id: i64,
    pub guild_id: i64,
    #[serde(default)]
    pub name: Option<String>,
}
