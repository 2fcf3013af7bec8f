//! Permission queries and checks for the rest of the application.

use std::sync::Arc;

use tracing::{debug, error};

use super::{
    OverwriteTarget, PermissionError, PermissionOverwrite, PermissionStore, Permissions, Resource,
    Snowflake, compute_permissions,
};
use crate::cache::{CacheKey, PermissionCache};

/// Cached permission lookups backed by a [`PermissionStore`].
///
/// Overwrite writes go through here so the affected cache entries are
/// purged before the call returns.
#[derive(Clone)]
pub struct PermissionService {
    store: Arc<dyn PermissionStore>,
    cache: Arc<PermissionCache>,
}

impl PermissionService {
    pub fn new(store: Arc<dyn PermissionStore>, cache: Arc<PermissionCache>) -> Self {
        Self { store, cache }
    }

    pub fn cache(&self) -> &Arc<PermissionCache> {
        &self.cache
    }

    /// Guild-level permissions of `user_id`, ignoring channel overwrites.
    pub async fn guild_permissions(
        &self,
        user_id: Snowflake,
        guild_id: Snowflake,
    ) -> Result<Permissions, PermissionError> {
        self.lookup(CacheKey::guild(user_id, guild_id)).await
    }

    /// Permissions of `user_id` inside one channel of the guild.
    pub async fn channel_permissions(
        &self,
        user_id: Snowflake,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<Permissions, PermissionError> {
        self.lookup(CacheKey::channel(user_id, guild_id, channel_id))
            .await
    }

    pub async fn require_guild_permission(
        &self,
        user_id: Snowflake,
        guild_id: Snowflake,
        required: Permissions,
    ) -> Result<(), PermissionError> {
        let granted = self.guild_permissions(user_id, guild_id).await?;
        ensure(granted, required)
    }

    pub async fn require_channel_permission(
        &self,
        user_id: Snowflake,
        guild_id: Snowflake,
        channel_id: Snowflake,
        required: Permissions,
    ) -> Result<(), PermissionError> {
        let granted = self
            .channel_permissions(user_id, guild_id, channel_id)
            .await?;
        ensure(granted, required)
    }

    /// Insert or replace the overwrite for its target in `channel_id`.
    pub async fn set_overwrite(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: PermissionOverwrite,
    ) -> Result<(), PermissionError> {
        self.ensure_channel(guild_id, channel_id).await?;
        self.store
            .upsert_overwrite(guild_id, channel_id, &overwrite)
            .await?;

        debug!(
            "Set overwrite {:?} in channel {} (allow {}, deny {})",
            overwrite.target, channel_id, overwrite.allow, overwrite.deny
        );
        self.invalidate_target(guild_id, overwrite.target).await;
        Ok(())
    }

    /// Remove the overwrite for `target`. Returns `false` if there was none.
    pub async fn delete_overwrite(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        target: OverwriteTarget,
    ) -> Result<bool, PermissionError> {
        self.ensure_channel(guild_id, channel_id).await?;
        let removed = self.store.delete_overwrite(channel_id, target).await?;

        if removed {
            debug!("Deleted overwrite {:?} in channel {}", target, channel_id);
            self.invalidate_target(guild_id, target).await;
        }
        Ok(removed)
    }

    pub async fn list_overwrites(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<Vec<PermissionOverwrite>, PermissionError> {
        self.ensure_channel(guild_id, channel_id).await?;
        Ok(self.store.channel_overwrites(channel_id).await?)
    }

    /// Call after changing a member's roles or ownership.
    pub async fn invalidate_permissions(&self, user_id: Snowflake, guild_id: Snowflake) {
        self.cache.invalidate(user_id, guild_id).await;
    }

    /// Call after changing a role's permissions or any guild-wide data.
    pub async fn invalidate_guild_permissions(&self, guild_id: Snowflake) {
        self.cache.invalidate_guild(guild_id).await;
    }

    async fn invalidate_target(&self, guild_id: Snowflake, target: OverwriteTarget) {
        match target {
            OverwriteTarget::Member(user_id) => self.cache.invalidate(user_id, guild_id).await,
            OverwriteTarget::Role(_) => self.cache.invalidate_guild(guild_id).await,
        }
    }

    async fn ensure_channel(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<(), PermissionError> {
        if self.store.channel_exists(guild_id, channel_id).await? {
            Ok(())
        } else {
            Err(PermissionError::NotFound(Resource::Channel(channel_id)))
        }
    }

    async fn lookup(&self, key: CacheKey) -> Result<Permissions, PermissionError> {
        let store = Arc::clone(&self.store);
        self.cache
            .get_or_compute(key, move || resolve(store, key))
            .await
    }
}

fn ensure(granted: Permissions, required: Permissions) -> Result<(), PermissionError> {
    if granted.has(required) {
        Ok(())
    } else {
        Err(PermissionError::PermissionDenied { required })
    }
}

/// Fetch everything the resolver needs for `key` and run it.
async fn resolve(
    store: Arc<dyn PermissionStore>,
    key: CacheKey,
) -> Result<Permissions, PermissionError> {
    let CacheKey {
        user_id,
        guild_id,
        channel_id,
    } = key;

    let owner_id = store
        .guild_owner(guild_id)
        .await?
        .ok_or(PermissionError::NotFound(Resource::Guild(guild_id)))?;

    let (everyone, member_roles) = tokio::try_join!(
        store.default_role(guild_id),
        store.member_roles(guild_id, user_id),
    )?;

    let Some(everyone) = everyone else {
        error!("Guild {} has no default role, refusing to resolve permissions", guild_id);
        return Err(PermissionError::InvariantViolation(format!(
            "guild {guild_id} has no default role"
        )));
    };

    let overwrites = match channel_id {
        Some(channel_id) => {
            if !store.channel_exists(guild_id, channel_id).await? {
                return Err(PermissionError::NotFound(Resource::Channel(channel_id)));
            }
            Some(store.channel_overwrites(channel_id).await?)
        }
        None => None,
    };

    let permissions = compute_permissions(
        user_id,
        owner_id,
        &everyone,
        &member_roles,
        overwrites.as_deref(),
    );
    debug!("Resolved {} for {}", permissions, key);

    Ok(permissions)
}
