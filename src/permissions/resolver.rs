//! Effective permission resolution.
//!
//! Precedence, lowest to highest: everyone role, member roles, the everyone
//! overwrite, the merged role overwrites, the member overwrite. Ownership and
//! the administrator bit short-circuit everything.

use super::Permissions;

/// Opaque identifier for users, guilds, channels and roles.
pub type Snowflake = u64;

/// One role's granted capabilities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePermission {
    pub id: Snowflake,
    pub permissions: Permissions,
    /// Display rank. Not consulted during resolution.
    pub position: i64,
}

/// What a channel overwrite applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverwriteTarget {
    Role(Snowflake),
    Member(Snowflake),
}

impl OverwriteTarget {
    pub fn id(self) -> Snowflake {
        match self {
            Self::Role(id) | Self::Member(id) => id,
        }
    }
}

/// A per-channel allow/deny pair for a role or a single member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionOverwrite {
    pub target: OverwriteTarget,
    pub allow: Permissions,
    pub deny: Permissions,
}

impl PermissionOverwrite {
    pub fn role(role_id: Snowflake, allow: Permissions, deny: Permissions) -> Self {
        Self {
            target: OverwriteTarget::Role(role_id),
            allow,
            deny,
        }
    }

    pub fn member(user_id: Snowflake, allow: Permissions, deny: Permissions) -> Self {
        Self {
            target: OverwriteTarget::Member(user_id),
            allow,
            deny,
        }
    }
}

/// Compute the effective permissions of `user_id`.
///
/// Passing `None` (or an empty slice) for `channel_overwrites` yields the
/// guild-level permissions. Pure and deterministic.
pub fn compute_permissions(
    user_id: Snowflake,
    guild_owner_id: Snowflake,
    everyone_role: &RolePermission,
    member_roles: &[RolePermission],
    channel_overwrites: Option<&[PermissionOverwrite]>,
) -> Permissions {
    if user_id == guild_owner_id {
        return Permissions::all();
    }

    let mut base = member_roles
        .iter()
        .fold(everyone_role.permissions, |acc, role| acc | role.permissions);

    if base.has(Permissions::ADMINISTRATOR) {
        return Permissions::all();
    }

    let overwrites = match channel_overwrites {
        Some(overwrites) if !overwrites.is_empty() => overwrites,
        _ => return base,
    };

    if let Some(everyone) = overwrites
        .iter()
        .find(|o| o.target == OverwriteTarget::Role(everyone_role.id))
    {
        base = base.apply_overwrite(everyone.allow, everyone.deny);
    }

    // Role overwrites are flattened, not ranked by position.
    let mut role_allow = Permissions::none();
    let mut role_deny = Permissions::none();
    for overwrite in overwrites {
        let OverwriteTarget::Role(role_id) = overwrite.target else {
            continue;
        };
        if role_id != everyone_role.id && member_roles.iter().any(|r| r.id == role_id) {
            role_allow = role_allow | overwrite.allow;
            role_deny = role_deny | overwrite.deny;
        }
    }
    base = base.apply_overwrite(role_allow, role_deny);

    if let Some(member) = overwrites
        .iter()
        .find(|o| o.target == OverwriteTarget::Member(user_id))
    {
        base = base.apply_overwrite(member.allow, member.deny);
    }

    if !base.has(Permissions::VIEW_CHANNEL) {
        return Permissions::none();
    }

    base
}
