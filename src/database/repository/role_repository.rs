//! Roles and role membership.

use futures::TryStreamExt;
use mongodb::Collection;
use mongodb::bson::doc;
use tracing::debug;

use crate::database::Database;
use crate::database::models::{MemberDocument, RoleDocument};
use crate::permissions::{RolePermission, Snowflake, StoreError};

pub struct RoleRepository {
    roles: Collection<RoleDocument>,
    members: Collection<MemberDocument>,
}

impl RoleRepository {
    pub fn new(db: &Database) -> Self {
        Self {
            roles: db.collection("roles"),
            members: db.collection("members"),
        }
    }

    /// The guild's "everyone" role, if it has one.
    pub async fn default_role(
        &self,
        guild_id: Snowflake,
    ) -> Result<Option<RolePermission>, StoreError> {
        let filter = doc! { "guild_id": guild_id as i64, "is_default": true };
        self.roles
            .find_one(filter)
            .await?
            .map(|role| role.to_role())
            .transpose()
    }

    /// Roles `user_id` holds in the guild, default role excluded.
    ///
    /// A user without a membership row holds no roles.
    pub async fn member_roles(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Vec<RolePermission>, StoreError> {
        let filter = doc! { "guild_id": guild_id as i64, "user_id": user_id as i64 };
        let Some(member) = self.members.find_one(filter).await? else {
            return Ok(Vec::new());
        };

        if member.role_ids.is_empty() {
            return Ok(Vec::new());
        }

        let filter = doc! {
            "guild_id": guild_id as i64,
            "role_id": { "$in": member.role_ids.clone() },
            "is_default": { "$ne": true },
        };
        let documents: Vec<RoleDocument> = self.roles.find(filter).await?.try_collect().await?;
        debug!(
            "DB member roles for {} in {}: {} of {}",
            user_id,
            guild_id,
            documents.len(),
            member.role_ids.len()
        );

        documents.iter().map(RoleDocument::to_role).collect()
    }
}
