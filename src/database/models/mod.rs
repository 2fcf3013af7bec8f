//! Database models.

pub mod guild;
pub mod overwrite;
pub mod role;

pub use guild::{ChannelDocument, GuildDocument};
pub use overwrite::{OverwriteDocument, encode_target};
pub use role::{MemberDocument, RoleDocument};
