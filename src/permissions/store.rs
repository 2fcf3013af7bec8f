//! Storage collaborator interface.
//!
//! The engine only reads roles, members and overwrites through this trait;
//! overwrite writes go through it so the guard can invalidate afterwards.

use async_trait::async_trait;

use super::{OverwriteTarget, PermissionOverwrite, RolePermission, Snowflake, StoreError};

#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Owner of the guild, or `None` if the guild does not exist.
    async fn guild_owner(&self, guild_id: Snowflake) -> Result<Option<Snowflake>, StoreError>;

    /// The guild's default ("everyone") role.
    async fn default_role(&self, guild_id: Snowflake) -> Result<Option<RolePermission>, StoreError>;

    /// Roles held by `user_id` in the guild, excluding the default role.
    async fn member_roles(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Vec<RolePermission>, StoreError>;

    /// Whether `channel_id` exists and belongs to `guild_id`.
    async fn channel_exists(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<bool, StoreError>;

    async fn channel_overwrites(
        &self,
        channel_id: Snowflake,
    ) -> Result<Vec<PermissionOverwrite>, StoreError>;

    /// Insert or replace the overwrite for `(channel_id, overwrite.target)`.
    async fn upsert_overwrite(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), StoreError>;

    /// Returns `true` if an overwrite was removed.
    async fn delete_overwrite(
        &self,
        channel_id: Snowflake,
        target: OverwriteTarget,
    ) -> Result<bool, StoreError>;
}
