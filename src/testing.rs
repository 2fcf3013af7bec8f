//! In-memory fixtures shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::{LocalBus, MemorySharedTier, PermissionCache, PermissionCacheConfig};
use crate::permissions::{
    OverwriteTarget, PermissionOverwrite, PermissionService, PermissionStore, Permissions,
    RolePermission, Snowflake, StoreError,
};

#[derive(Default)]
struct State {
    owners: HashMap<Snowflake, Snowflake>,
    default_roles: HashMap<Snowflake, RolePermission>,
    roles: HashMap<Snowflake, RolePermission>,
    members: HashMap<(Snowflake, Snowflake), Vec<Snowflake>>,
    channels: HashMap<Snowflake, Snowflake>,
    overwrites: HashMap<Snowflake, Vec<PermissionOverwrite>>,
}

/// `PermissionStore` over plain maps, with a resolution counter, optional
/// artificial latency and a switch that makes every read fail.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    delay: Mutex<Option<Duration>>,
    read_stall: Mutex<Option<Duration>>,
    failing: AtomicBool,
    resolutions: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a guild whose default role shares the guild's id.
    pub fn guild(&self, guild_id: Snowflake, owner_id: Snowflake, everyone: Permissions) -> &Self {
        let mut state = self.state.lock();
        state.owners.insert(guild_id, owner_id);
        state.default_roles.insert(
            guild_id,
            RolePermission {
                id: guild_id,
                permissions: everyone,
                position: 0,
            },
        );
        self
    }

    pub fn role(&self, role_id: Snowflake, permissions: Permissions, position: i64) -> &Self {
        self.state.lock().roles.insert(
            role_id,
            RolePermission {
                id: role_id,
                permissions,
                position,
            },
        );
        self
    }

    pub fn assign(&self, guild_id: Snowflake, user_id: Snowflake, role_id: Snowflake) -> &Self {
        self.state
            .lock()
            .members
            .entry((guild_id, user_id))
            .or_default()
            .push(role_id);
        self
    }

    pub fn channel(&self, guild_id: Snowflake, channel_id: Snowflake) -> &Self {
        self.state.lock().channels.insert(channel_id, guild_id);
        self
    }

    pub fn set_role_permissions(&self, role_id: Snowflake, permissions: Permissions) {
        if let Some(role) = self.state.lock().roles.get_mut(&role_id) {
            role.permissions = permissions;
        }
    }

    pub fn remove_default_role(&self, guild_id: Snowflake) {
        self.state.lock().default_roles.remove(&guild_id);
    }

    pub fn restore_default_role(&self, guild_id: Snowflake, everyone: Permissions) {
        self.state.lock().default_roles.insert(
            guild_id,
            RolePermission {
                id: guild_id,
                permissions: everyone,
                position: 0,
            },
        );
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Hold overwrite reads for `stall` after taking their snapshot, so the
    /// caller resolves with data that may be stale by the time it returns.
    pub fn set_read_stall(&self, stall: Option<Duration>) {
        *self.read_stall.lock() = stall;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// How many resolutions reached the store.
    pub fn resolutions(&self) -> usize {
        self.resolutions.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PermissionStore for MemoryStore {
    async fn guild_owner(&self, guild_id: Snowflake) -> Result<Option<Snowflake>, StoreError> {
        self.resolutions.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.check()?;
        Ok(self.state.lock().owners.get(&guild_id).copied())
    }

    async fn default_role(
        &self,
        guild_id: Snowflake,
    ) -> Result<Option<RolePermission>, StoreError> {
        self.check()?;
        Ok(self.state.lock().default_roles.get(&guild_id).cloned())
    }

    async fn member_roles(
        &self,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Result<Vec<RolePermission>, StoreError> {
        self.check()?;
        let state = self.state.lock();
        let ids = state.members.get(&(guild_id, user_id)).cloned().unwrap_or_default();
        Ok(ids.iter().filter_map(|id| state.roles.get(id).cloned()).collect())
    }

    async fn channel_exists(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
    ) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.state.lock().channels.get(&channel_id) == Some(&guild_id))
    }

    async fn channel_overwrites(
        &self,
        channel_id: Snowflake,
    ) -> Result<Vec<PermissionOverwrite>, StoreError> {
        self.check()?;
        let overwrites = self
            .state
            .lock()
            .overwrites
            .get(&channel_id)
            .cloned()
            .unwrap_or_default();

        let stall = *self.read_stall.lock();
        if let Some(stall) = stall {
            tokio::time::sleep(stall).await;
        }
        Ok(overwrites)
    }

    async fn upsert_overwrite(
        &self,
        _guild_id: Snowflake,
        channel_id: Snowflake,
        overwrite: &PermissionOverwrite,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let overwrites = state.overwrites.entry(channel_id).or_default();
        overwrites.retain(|o| o.target != overwrite.target);
        overwrites.push(overwrite.clone());
        Ok(())
    }

    async fn delete_overwrite(
        &self,
        channel_id: Snowflake,
        target: OverwriteTarget,
    ) -> Result<bool, StoreError> {
        self.check()?;
        let mut state = self.state.lock();
        let Some(overwrites) = state.overwrites.get_mut(&channel_id) else {
            return Ok(false);
        };
        let before = overwrites.len();
        overwrites.retain(|o| o.target != target);
        Ok(overwrites.len() != before)
    }
}

/// A service wired to in-memory tiers. Services built over the same
/// `shared` and `bus` behave like separate processes of one fleet.
pub async fn service(
    store: &Arc<MemoryStore>,
    shared: &Arc<MemorySharedTier>,
    bus: &LocalBus,
) -> PermissionService {
    let config = PermissionCacheConfig {
        resubscribe_delay: Duration::from_millis(10),
        ..Default::default()
    };
    let cache = PermissionCache::start(config, shared.clone(), Arc::new(bus.clone()))
        .await
        .expect("in-memory cache starts");

    PermissionService::new(store.clone(), Arc::new(cache))
}
