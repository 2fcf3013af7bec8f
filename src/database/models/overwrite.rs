//! Channel permission overwrite documents.

use serde::{Deserialize, Serialize};

use crate::permissions::{OverwriteTarget, PermissionOverwrite, Permissions, Snowflake, StoreError};

/// Stored `target_type` for role overwrites.
pub const TARGET_ROLE: i32 = 0;
/// Stored `target_type` for member overwrites.
pub const TARGET_MEMBER: i32 = 1;

/// One overwrite row. Unique on `(channel_id, target_id, target_type)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverwriteDocument {
    pub channel_id: i64,
    pub guild_id: i64,
    pub target_id: i64,
    pub target_type: i32,
    pub allow: String,
    pub deny: String,
    /// Unix timestamp of the last write.
    #[serde(default)]
    pub updated_at: i64,
}

impl OverwriteDocument {
    pub fn new(
        guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> Self {
        let (target_id, target_type) = encode_target(overwrite.target);
        Self {
            channel_id: channel_id as i64,
            guild_id: guild_id as i64,
            target_id,
            target_type,
            allow: overwrite.allow.to_string(),
            deny: overwrite.deny.to_string(),
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn to_overwrite(&self) -> Result<PermissionOverwrite, StoreError> {
        let malformed = |reason: String| StoreError::Malformed {
            collection: "permission_overwrites",
            reason,
        };

        let id = self.target_id as Snowflake;
        let target = match self.target_type {
            TARGET_ROLE => OverwriteTarget::Role(id),
            TARGET_MEMBER => OverwriteTarget::Member(id),
            other => return Err(malformed(format!("unknown target type {other}"))),
        };
        let allow = self
            .allow
            .parse::<Permissions>()
            .map_err(|e| malformed(format!("allow: {e}")))?;
        let deny = self
            .deny
            .parse::<Permissions>()
            .map_err(|e| malformed(format!("deny: {e}")))?;

        Ok(PermissionOverwrite { target, allow, deny })
    }
}

/// Split a target into its stored `(target_id, target_type)` pair.
pub fn encode_target(target: OverwriteTarget) -> (i64, i32) {
    match target {
        OverwriteTarget::Role(id) => (id as i64, TARGET_ROLE),
        OverwriteTarget::Member(id) => (id as i64, TARGET_MEMBER),
    }
}
