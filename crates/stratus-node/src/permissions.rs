//! The authoritative permission store.
//!
//! Mutations land here first; each applied mutation yields the
//! [`PermissionUpdate`] the node pushes to its agents.

use dashmap::DashMap;
use stratus_types::{PermissionGroup, PermissionUpdate, PermissionUser};
use thiserror::Error;
use uuid::Uuid;

/// Mutation failures reported back to the requesting agent.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PermissionStoreError {
    /// The referenced user does not exist.
    #[error("unknown permission user {0}")]
    UnknownUser(Uuid),
    /// The referenced group does not exist.
    #[error("unknown permission group {0}")]
    UnknownGroup(String),
}

/// In-memory authoritative user/group store.
#[derive(Default)]
pub struct NodePermissionStore {
    users: DashMap<Uuid, PermissionUser>,
    groups: DashMap<String, PermissionGroup>,
}

impl NodePermissionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch a user.
    #[must_use]
    pub fn user(&self, unique_id: &Uuid) -> Option<PermissionUser> {
        self.users.get(unique_id).map(|entry| entry.value().clone())
    }

    /// Fetch a group.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<PermissionGroup> {
        self.groups.get(name).map(|entry| entry.value().clone())
    }

    /// Every group.
    #[must_use]
    pub fn groups(&self) -> Vec<PermissionGroup> {
        self.groups.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Create or overwrite `user`.
    pub fn add_user(&self, user: PermissionUser) -> PermissionUpdate {
        self.users.insert(user.unique_id, user.clone());
        PermissionUpdate::AddUser(user)
    }

    /// Replace an existing user.
    pub fn update_user(
        &self,
        user: PermissionUser,
    ) -> Result<PermissionUpdate, PermissionStoreError> {
        if !self.users.contains_key(&user.unique_id) {
            return Err(PermissionStoreError::UnknownUser(user.unique_id));
        }
        self.users.insert(user.unique_id, user.clone());
        Ok(PermissionUpdate::UpdateUser(user))
    }

    /// Delete a user.
    pub fn delete_user(&self, unique_id: &Uuid) -> Result<PermissionUpdate, PermissionStoreError> {
        let (_, user) = self
            .users
            .remove(unique_id)
            .ok_or(PermissionStoreError::UnknownUser(*unique_id))?;
        Ok(PermissionUpdate::DeleteUser(user))
    }

    /// Replace the entire user set.
    pub fn set_users(&self, users: Vec<PermissionUser>) -> PermissionUpdate {
        self.users.clear();
        for user in &users {
            self.users.insert(user.unique_id, user.clone());
        }
        PermissionUpdate::SetUsers(users)
    }

    /// Create or overwrite `group`.
    pub fn add_group(&self, group: PermissionGroup) -> PermissionUpdate {
        self.groups.insert(group.name.clone(), group.clone());
        PermissionUpdate::AddGroup(group)
    }

    /// Replace an existing group.
    pub fn update_group(
        &self,
        group: PermissionGroup,
    ) -> Result<PermissionUpdate, PermissionStoreError> {
        if !self.groups.contains_key(&group.name) {
            return Err(PermissionStoreError::UnknownGroup(group.name.clone()));
        }
        self.groups.insert(group.name.clone(), group.clone());
        Ok(PermissionUpdate::UpdateGroup(group))
    }

    /// Delete a group.
    pub fn delete_group(&self, name: &str) -> Result<PermissionUpdate, PermissionStoreError> {
        let (_, group) = self
            .groups
            .remove(name)
            .ok_or_else(|| PermissionStoreError::UnknownGroup(name.to_string()))?;
        Ok(PermissionUpdate::DeleteGroup(group))
    }

    /// Replace the entire group set.
    pub fn set_groups(&self, groups: Vec<PermissionGroup>) -> PermissionUpdate {
        self.groups.clear();
        for group in &groups {
            self.groups.insert(group.name.clone(), group.clone());
        }
        PermissionUpdate::SetGroups(groups)
    }
}
