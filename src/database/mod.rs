//! MongoDB-backed permission store.

mod models;
mod mongo;
mod repository;
mod store;

pub use models::*;
pub use mongo::Database;
pub use store::MongoPermissionStore;
