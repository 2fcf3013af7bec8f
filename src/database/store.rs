//! `PermissionStore` over MongoDB.

use async_trait::async_trait;

use super::Database;
use super::repository::{GuildRepository, OverwriteRepository, RoleRepository};
use crate::permissions::{
    OverwriteTarget, PermissionOverwrite, PermissionStore, RolePermission, Snowflake, StoreError,
};

/// Reads guilds, roles, members and overwrites from their collections.
pub struct MongoPermissionStore {
    guilds: GuildRepository,
    roles: RoleRepository,
    overwrites: OverwriteRepository,
}

impl MongoPermissionStore {
    pub fn new(db: &Database) -> Self {
        Self {
            guilds: GuildRepository::new(db),
            roles: RoleRepository::new(db),
            overwrites: OverwriteRepository::new(db),
        }
    }
}

#[async_trait]
impl PermissionStore for MongoPermissionStore {
    async fn guild_owner(&self, guild_id: Snowflake) -> Result<Option<Snowflake>, StoreError> {
        Ok(self.guilds.get(guild_id).await?.map(|guild| guild.owner()))
    }

    async fn default_role(
        &self,
        guild_id: Snowflake,
    ) -> Result<Option<RolePermission>, StoreError> {
        self.roles.default_role(guild_id).await
    }

    async fn member_roles(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Vec<RolePermission>, StoreError> {
        self.roles.member_roles(guild_id, user_id).await
    }

    async fn channel_exists(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<bool, StoreError> {
        self.guilds.channel_exists(guild_id, channel_id).await
    }

    async fn channel_overwrites(
        &self,
        channel_id: Snowflake,
    ) -> Result<Vec<PermissionOverwrite>, StoreError> {
        self.overwrites.for_channel(channel_id).await
    }

    async fn upsert_overwrite(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), StoreError> {
        self.overwrites.upsert(guild_id, channel_id, overwrite).await
    }

    async fn delete_overwrite(
        &self,
        channel_id: Snowflake,
        target: OverwriteTarget,
    ) -> Result<bool, StoreError> {
        self.overwrites.delete(channel_id, target).await
    }
}
