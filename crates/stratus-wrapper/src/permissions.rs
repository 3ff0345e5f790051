//! Agent-side permission store.
//!
//! Every mutation travels to the authority first and only lands in the
//! local cache after the acknowledgement — a failed RPC leaves local
//! and remote state identical. Unsolicited pushes from the authority
//! keep the cache warm for reads; both paths run the registered
//! [`PermissionHandler`]s.

use crate::api::{DriverApiClient, DriverApiError};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use stratus_types::{
    DriverRequest, DriverResponse, Permission, PermissionGroup, PermissionUpdate, PermissionUser,
};
use tracing::debug;
use uuid::Uuid;

/// Observer of permission changes applied to the local cache.
///
/// All nine hooks default to no-ops and run synchronously on the
/// delivering task: implementations must not block for long.
#[allow(unused_variables)]
pub trait PermissionHandler: Send + Sync {
    /// A user was created.
    fn handle_add_user(&self, user: &PermissionUser) {}
    /// A user was replaced.
    fn handle_update_user(&self, user: &PermissionUser) {}
    /// A user was deleted.
    fn handle_delete_user(&self, user: &PermissionUser) {}
    /// The entire user set was replaced.
    fn handle_set_users(&self, users: &[PermissionUser]) {}
    /// A group was created.
    fn handle_add_group(&self, group: &PermissionGroup) {}
    /// A group was replaced.
    fn handle_update_group(&self, group: &PermissionGroup) {}
    /// A group was deleted.
    fn handle_delete_group(&self, group: &PermissionGroup) {}
    /// The entire group set was replaced.
    fn handle_set_groups(&self, groups: &[PermissionGroup]) {}
    /// The store was reloaded wholesale.
    fn handle_reloaded(&self) {}
}

/// A [`PermissionHandler`] that reacts to nothing.
pub struct NoopPermissionHandler;

impl PermissionHandler for NoopPermissionHandler {}

/// Read cache of the authority's permission store, with write-through
/// mutations.
pub struct CachedPermissionStore {
    api: Arc<DriverApiClient>,
    users: DashMap<Uuid, PermissionUser>,
    groups: DashMap<String, PermissionGroup>,
    handlers: RwLock<Vec<Arc<dyn PermissionHandler>>>,
}

impl CachedPermissionStore {
    /// Create an empty store delegating mutations through `api`.
    #[must_use]
    pub fn new(api: Arc<DriverApiClient>) -> Self {
        Self {
            api,
            users: DashMap::new(),
            groups: DashMap::new(),
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Warm the group cache from the authority. Runs once after the
    /// handshake authorizes the channel.
    pub async fn init(&self) -> Result<(), DriverApiError> {
        match self.api.execute(&DriverRequest::GetPermissionGroups).await? {
            DriverResponse::PermissionGroups(groups) => {
                self.groups.clear();
                for group in groups {
                    self.groups.insert(group.name.clone(), group);
                }
                debug!(groups = self.groups.len(), "permission cache initialized");
                Ok(())
            }
            _ => Err(DriverApiError::UnexpectedResponse { method: "get_permission_groups" }),
        }
    }

    /// Register a change handler.
    pub fn add_handler(&self, handler: Arc<dyn PermissionHandler>) {
        self.handlers.write().push(handler);
    }

    // ------------------------------------------------------------------
    // Reads (cache only; may be momentarily stale)
    // ------------------------------------------------------------------

    /// Cached user by id.
    #[must_use]
    pub fn cached_user(&self, unique_id: &Uuid) -> Option<PermissionUser> {
        self.users.get(unique_id).map(|entry| entry.value().clone())
    }

    /// Cached group by name.
    #[must_use]
    pub fn cached_group(&self, name: &str) -> Option<PermissionGroup> {
        self.groups.get(name).map(|entry| entry.value().clone())
    }

    /// All cached groups.
    #[must_use]
    pub fn cached_groups(&self) -> Vec<PermissionGroup> {
        self.groups.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Whether `user` holds `permission`, through direct grants or any
    /// unexpired group membership known to the cache.
    #[must_use]
    pub fn has_permission(&self, user: &PermissionUser, permission: &str) -> bool {
        if holds(&user.permissions, permission) {
            return true;
        }
        user.groups.iter().any(|info| {
            self.cached_group(&info.group)
                .is_some_and(|group| holds(&group.permissions, permission))
        })
    }

    // ------------------------------------------------------------------
    // Fetches (authoritative, via the driver API)
    // ------------------------------------------------------------------

    /// Fetch a user from the authority, refreshing the cache.
    pub async fn fetch_user(
        &self,
        unique_id: Uuid,
    ) -> Result<Option<PermissionUser>, DriverApiError> {
        match self.api.execute(&DriverRequest::GetPermissionUser { unique_id }).await? {
            DriverResponse::PermissionUser(user) => {
                if let Some(user) = &user {
                    self.users.insert(user.unique_id, user.clone());
                }
                Ok(user)
            }
            _ => Err(DriverApiError::UnexpectedResponse { method: "get_permission_user" }),
        }
    }

    /// Fetch a group from the authority, refreshing the cache.
    pub async fn fetch_group(
        &self,
        name: impl Into<String>,
    ) -> Result<Option<PermissionGroup>, DriverApiError> {
        let name = name.into();
        match self.api.execute(&DriverRequest::GetPermissionGroup { name }).await? {
            DriverResponse::PermissionGroup(group) => {
                if let Some(group) = &group {
                    self.groups.insert(group.name.clone(), group.clone());
                }
                Ok(group)
            }
            _ => Err(DriverApiError::UnexpectedResponse { method: "get_permission_group" }),
        }
    }

    // ------------------------------------------------------------------
    // Mutations (write-through; local state changes only after the ack)
    // ------------------------------------------------------------------

    /// Create `user` at the authority.
    pub async fn add_user(&self, user: PermissionUser) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::AddPermissionUser { user: user.clone() },
            PermissionUpdate::AddUser(user),
        )
        .await
    }

    /// Replace `user` at the authority.
    pub async fn update_user(&self, user: PermissionUser) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::UpdatePermissionUser { user: user.clone() },
            PermissionUpdate::UpdateUser(user),
        )
        .await
    }

    /// Delete the user `unique_id` at the authority.
    pub async fn delete_user(&self, unique_id: Uuid) -> Result<(), DriverApiError> {
        let cached = self.cached_user(&unique_id).unwrap_or_else(|| {
            PermissionUser::new(unique_id, String::new(), 0)
        });
        self.mutate(
            DriverRequest::DeletePermissionUser { unique_id },
            PermissionUpdate::DeleteUser(cached),
        )
        .await
    }

    /// Create `group` at the authority.
    pub async fn add_group(&self, group: PermissionGroup) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::AddPermissionGroup { group: group.clone() },
            PermissionUpdate::AddGroup(group),
        )
        .await
    }

    /// Replace `group` at the authority.
    pub async fn update_group(&self, group: PermissionGroup) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::UpdatePermissionGroup { group: group.clone() },
            PermissionUpdate::UpdateGroup(group),
        )
        .await
    }

    /// Delete the group `name` at the authority.
    pub async fn delete_group(&self, name: impl Into<String>) -> Result<(), DriverApiError> {
        let name = name.into();
        let cached = self
            .cached_group(&name)
            .unwrap_or_else(|| PermissionGroup::new(name.clone()));
        self.mutate(
            DriverRequest::DeletePermissionGroup { name },
            PermissionUpdate::DeleteGroup(cached),
        )
        .await
    }

    /// Replace the entire user set at the authority.
    pub async fn set_users(&self, users: Vec<PermissionUser>) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::SetPermissionUsers { users: users.clone() },
            PermissionUpdate::SetUsers(users),
        )
        .await
    }

    /// Replace the entire group set at the authority.
    pub async fn set_groups(&self, groups: Vec<PermissionGroup>) -> Result<(), DriverApiError> {
        self.mutate(
            DriverRequest::SetPermissionGroups { groups: groups.clone() },
            PermissionUpdate::SetGroups(groups),
        )
        .await
    }

    async fn mutate(
        &self,
        request: DriverRequest,
        update: PermissionUpdate,
    ) -> Result<(), DriverApiError> {
        match self.api.execute(&request).await? {
            DriverResponse::Applied => {
                self.apply_update(update);
                Ok(())
            }
            _ => Err(DriverApiError::UnexpectedResponse { method: request.method_name() }),
        }
    }

    /// Apply an acknowledged or pushed change to the cache and run the
    /// handlers. Idempotent: re-applying the same change converges on
    /// the same cache state.
    pub fn apply_update(&self, update: PermissionUpdate) {
        let handlers: Vec<Arc<dyn PermissionHandler>> = self.handlers.read().clone();

        match update {
            PermissionUpdate::AddUser(user) => {
                self.users.insert(user.unique_id, user.clone());
                for handler in &handlers {
                    handler.handle_add_user(&user);
                }
            }
            PermissionUpdate::UpdateUser(user) => {
                self.users.insert(user.unique_id, user.clone());
                for handler in &handlers {
                    handler.handle_update_user(&user);
                }
            }
            PermissionUpdate::DeleteUser(user) => {
                self.users.remove(&user.unique_id);
                for handler in &handlers {
                    handler.handle_delete_user(&user);
                }
            }
            PermissionUpdate::SetUsers(users) => {
                self.users.clear();
                for user in &users {
                    self.users.insert(user.unique_id, user.clone());
                }
                for handler in &handlers {
                    handler.handle_set_users(&users);
                }
            }
            PermissionUpdate::AddGroup(group) => {
                self.groups.insert(group.name.clone(), group.clone());
                for handler in &handlers {
                    handler.handle_add_group(&group);
                }
            }
            PermissionUpdate::UpdateGroup(group) => {
                self.groups.insert(group.name.clone(), group.clone());
                for handler in &handlers {
                    handler.handle_update_group(&group);
                }
            }
            PermissionUpdate::DeleteGroup(group) => {
                self.groups.remove(&group.name);
                for handler in &handlers {
                    handler.handle_delete_group(&group);
                }
            }
            PermissionUpdate::SetGroups(groups) => {
                self.groups.clear();
                for group in &groups {
                    self.groups.insert(group.name.clone(), group.clone());
                }
                for handler in &handlers {
                    handler.handle_set_groups(&groups);
                }
            }
            PermissionUpdate::Reloaded => {
                for handler in &handlers {
                    handler.handle_reloaded();
                }
            }
        }
    }
}

fn holds(permissions: &[Permission], name: &str) -> bool {
    permissions.iter().any(|p| p.name == name && p.potency >= 0)
}
