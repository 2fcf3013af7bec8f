//! Repository module - one repository per concern.

mod guild_repository;
mod overwrite_repository;
mod role_repository;

pub use guild_repository::GuildRepository;
pub use overwrite_repository::OverwriteRepository;
pub use role_repository::RoleRepository;
