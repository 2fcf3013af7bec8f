//! Guild and channel lookups.

use mongodb::Collection;
use mongodb::bson::doc;
use tracing::debug;

use crate::database::Database;
use crate::database::models::{ChannelDocument, GuildDocument};
use crate::permissions::{Snowflake, StoreError};

pub struct GuildRepository {
    guilds: Collection<GuildDocument>,
    channels: Collection<ChannelDocument>,
}

impl GuildRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            guilds: db.collection("guilds"),
            channels: db.collection("channels"),
        }
    }

    pub async fn get(&self, guild_id: Snowflake) -> Result<Option<GuildDocument>, StoreError> {
        let filter = doc! { "guild_id": guild_id as i64 };
        let result = self.guilds.find_one(filter).await?;
        debug!("DB get guild {}: {:?}", guild_id, result.is_some());
        Ok(result)
    }

    /// Whether `channel_id` exists in `guild_id`.
    pub async fn channel_exists(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<bool, StoreError> {
        let filter = doc! {
            "channel_id": channel_id as i64,
            "guild_id": guild_id as i64,
        };
        Ok(self.channels.count_documents(filter).limit(1).await? > 0)
    }
}
