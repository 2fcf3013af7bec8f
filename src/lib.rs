//! Aegis - permission resolution with a two-tier distributed cache.
//!
//! ## Architecture
//!
//! - `permissions` - Bitfield, resolver and the guard service
//! - `cache` - Process-local LRU, shared Redis tier, request coalescing
//!   and cross-process invalidation
//! - `database` - MongoDB-backed permission store
//! - `config` - Environment configuration

pub mod cache;
pub mod config;
pub mod database;
pub mod permissions;

#[cfg(test)]
mod testing;
