//! Permission model and resolution.
//!
//! ## Overview
//!
//! - `Permissions` - immutable capability bitfield
//! - `compute_permissions` - pure resolver over roles and channel overwrites
//! - `PermissionStore` - where roles, members and overwrites come from
//! - `PermissionService` - cached lookups, require-or-fail checks and
//!   overwrite writes that invalidate the cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! let service = PermissionService::new(store, cache);
//!
//! service
//!     .require_channel_permission(user_id, guild_id, channel_id, Permissions::SEND_MESSAGES)
//!     .await?;
//! ```

mod bitfield;
mod error;
mod guard;
mod resolver;
mod store;

pub use bitfield::{ParsePermissionsError, Permissions};
pub use error::{PermissionError, Resource, StoreError};
pub use guard::PermissionService;
pub use resolver::{
    OverwriteTarget, PermissionOverwrite, RolePermission, Snowflake, compute_permissions,
};
pub use store::PermissionStore;
