//! Permission entities replicated between the node and its agents.
//!
//! The node holds the authoritative copy; agents keep a read cache that
//! is refreshed by pushes from the node. Mutations always travel to the
//! node first (see the wrapper's permission store).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single named permission with a potency weight.
///
/// A negative potency revokes the permission at that weight; the
/// highest absolute potency wins when users inherit conflicting grants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Permission node name (e.g. `stratus.command.stop`).
    pub name: String,
    /// Weight used to resolve conflicts between grants.
    pub potency: i32,
}

impl Permission {
    /// A permission with the default potency of `0`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into(), potency: 0 }
    }
}

/// Membership of a user in a permission group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionUserGroupInfo {
    /// Name of the group.
    pub group: String,
    /// Unix millis when the membership expires; `0` means permanent.
    /// A non-zero value must lie strictly in the future when assigned.
    pub timeout_millis: u64,
}

/// A permission-bearing user identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionUser {
    /// Stable unique id.
    pub unique_id: Uuid,
    /// Display name.
    pub name: String,
    /// Potency applied to this user's direct permissions.
    pub potency: i32,
    /// Group memberships; group names are unique within the list.
    pub groups: Vec<PermissionUserGroupInfo>,
    /// Directly assigned permissions.
    pub permissions: Vec<Permission>,
}

impl PermissionUser {
    /// Create a user with no memberships or permissions.
    #[must_use]
    pub fn new(unique_id: Uuid, name: impl Into<String>, potency: i32) -> Self {
        Self {
            unique_id,
            name: name.into(),
            potency,
            groups: Vec::new(),
            permissions: Vec::new(),
        }
    }

    /// Add a group membership, replacing any existing entry with the
    /// same group name so the list never holds duplicates.
    pub fn add_group(&mut self, info: PermissionUserGroupInfo) {
        self.groups.retain(|g| g.group != info.group);
        self.groups.push(info);
    }

    /// Remove a group membership by name. Returns whether it existed.
    pub fn remove_group(&mut self, group: &str) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g.group != group);
        self.groups.len() != before
    }

    /// Whether the user is a member of `group`, ignoring expiry.
    #[must_use]
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g.group == group)
    }

    /// Drop memberships whose expiry has passed. Returns whether any
    /// membership was removed.
    pub fn prune_expired_groups(&mut self, now_millis: u64) -> bool {
        let before = self.groups.len();
        self.groups
            .retain(|g| g.timeout_millis == 0 || g.timeout_millis > now_millis);
        self.groups.len() != before
    }
}

/// A permission group users can be members of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionGroup {
    /// Unique group name.
    pub name: String,
    /// Potency applied to this group's permissions.
    pub potency: i32,
    /// Sort weight for display ordering.
    pub sort_id: i32,
    /// Whether users with no memberships implicitly belong here.
    pub default_group: bool,
    /// Permissions granted by this group.
    pub permissions: Vec<Permission>,
    /// Names of groups whose permissions this group inherits.
    pub inherited_groups: Vec<String>,
}

impl PermissionGroup {
    /// Create an empty, non-default group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            potency: 0,
            sort_id: 0,
            default_group: false,
            permissions: Vec::new(),
            inherited_groups: Vec::new(),
        }
    }
}
