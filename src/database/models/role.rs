//! Role and membership documents.

use serde::{Deserialize, Serialize};

use crate::permissions::{Permissions, RolePermission, StoreError};

/// A role. Masks are stored as decimal strings since they exceed 64 bits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleDocument {
    pub role_id: i64,
    pub guild_id: i64,
    pub permissions: String,
    #[serde(default)]
    pub position: i64,
    /// The guild's "everyone" role. Exactly one per guild.
    #[serde(default)]
    pub is_default: bool,
}

impl RoleDocument {
    pub fn to_role(&self) -> Result<RolePermission, StoreError> {
        let permissions = self
            .permissions
            .parse::<Permissions>()
            .map_err(|e| StoreError::Malformed {
                collection: "roles",
                reason: format!("role {}: {}", self.role_id, e),
            })?;

        Ok(RolePermission {
            id: self.role_id as u64,
            permissions,
            position: self.position,
        })
    }
}

/// A user's membership in a guild. The default role is implicit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberDocument {
    pub guild_id: i64,
    pub user_id: i64,
    #[serde(default)]
    pub role_ids: Vec<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn role(permissions: &str) -> RoleDocument {
        RoleDocument {
            role_id: 7,
            guild_id: 1,
            permissions: permissions.to_string(),
            position: 3,
            is_default: false,
        }
    }

    #[test]
    fn test_to_role() {
        let decoded = role("1024").to_role().unwrap();
        assert_eq!(decoded.id, 7);
        assert_eq!(decoded.permissions, Permissions::VIEW_CHANNEL);
        assert_eq!(decoded.position, 3);
    }

    #[test]
    fn test_to_role_keeps_wide_masks() {
        let decoded = role("340282366920938463463374607431768211455").to_role().unwrap();
        assert_eq!(decoded.permissions.bits(), u128::MAX);
    }

    #[test]
    fn test_to_role_rejects_garbage() {
        assert!(matches!(
            role("lots").to_role(),
            Err(StoreError::Malformed { collection: "roles", .. })
        ));
    }
}
