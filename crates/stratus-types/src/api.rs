//! Driver-API payload catalogue.
//!
//! Every remote operation an agent can ask of the node is one
//! [`DriverRequest`] arm, answered by the matching [`DriverResponse`]
//! arm. Payloads travel JSON-encoded in the packet body on the
//! driver-API channel; the correlation id on the packet pairs them up.

use crate::permission::{PermissionGroup, PermissionUser};
use crate::service::ServiceTemplate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A driver-API request issued by an agent (or another node component).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverRequest {
    /// List the templates held by a template storage.
    GetTemplateStorageTemplates {
        /// Storage name, e.g. `local`.
        storage: String,
    },
    /// Run a command line on the node, impersonating a permission user.
    SendCommandLineAsPermissionUser {
        /// The impersonated user.
        unique_id: Uuid,
        /// The command line to execute.
        command_line: String,
    },
    /// Fetch a permission user by id.
    GetPermissionUser {
        /// The user's unique id.
        unique_id: Uuid,
    },
    /// Create a permission user.
    AddPermissionUser {
        /// The user to create.
        user: PermissionUser,
    },
    /// Replace a permission user.
    UpdatePermissionUser {
        /// The new user state.
        user: PermissionUser,
    },
    /// Delete a permission user.
    DeletePermissionUser {
        /// The user's unique id.
        unique_id: Uuid,
    },
    /// Fetch a permission group by name.
    GetPermissionGroup {
        /// The group name.
        name: String,
    },
    /// Fetch every permission group.
    GetPermissionGroups,
    /// Create a permission group.
    AddPermissionGroup {
        /// The group to create.
        group: PermissionGroup,
    },
    /// Replace a permission group.
    UpdatePermissionGroup {
        /// The new group state.
        group: PermissionGroup,
    },
    /// Delete a permission group.
    DeletePermissionGroup {
        /// The group name.
        name: String,
    },
    /// Replace the entire user set.
    SetPermissionUsers {
        /// The new user set.
        users: Vec<PermissionUser>,
    },
    /// Replace the entire group set.
    SetPermissionGroups {
        /// The new group set.
        groups: Vec<PermissionGroup>,
    },
    /// Change the log level of every component in the cluster.
    SetGlobalLogLevel {
        /// A `tracing` level/filter directive, e.g. `debug`.
        level: String,
    },
}

impl DriverRequest {
    /// Short operation name for logging.
    #[must_use]
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetTemplateStorageTemplates { .. } => "get_template_storage_templates",
            Self::SendCommandLineAsPermissionUser { .. } => "send_command_line_as_permission_user",
            Self::GetPermissionUser { .. } => "get_permission_user",
            Self::AddPermissionUser { .. } => "add_permission_user",
            Self::UpdatePermissionUser { .. } => "update_permission_user",
            Self::DeletePermissionUser { .. } => "delete_permission_user",
            Self::GetPermissionGroup { .. } => "get_permission_group",
            Self::GetPermissionGroups => "get_permission_groups",
            Self::AddPermissionGroup { .. } => "add_permission_group",
            Self::UpdatePermissionGroup { .. } => "update_permission_group",
            Self::DeletePermissionGroup { .. } => "delete_permission_group",
            Self::SetPermissionUsers { .. } => "set_permission_users",
            Self::SetPermissionGroups { .. } => "set_permission_groups",
            Self::SetGlobalLogLevel { .. } => "set_global_log_level",
        }
    }
}

/// The node's answer to a [`DriverRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DriverResponse {
    /// Templates held by the queried storage.
    Templates(Vec<ServiceTemplate>),
    /// Result of an impersonated command line: success flag plus output lines.
    CommandResult {
        /// Whether the command was accepted and executed.
        success: bool,
        /// Captured output lines.
        output: Vec<String>,
    },
    /// A permission user, or `None` when unknown.
    PermissionUser(Option<PermissionUser>),
    /// A permission group, or `None` when unknown.
    PermissionGroup(Option<PermissionGroup>),
    /// Every permission group.
    PermissionGroups(Vec<PermissionGroup>),
    /// The mutation was applied.
    Applied,
    /// The request failed on the node.
    Failure {
        /// Human-readable reason.
        message: String,
    },
}

/// An unsolicited permission change pushed from the node to every
/// authorized channel after a mutation is applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PermissionUpdate {
    /// A user was created.
    AddUser(PermissionUser),
    /// A user was replaced.
    UpdateUser(PermissionUser),
    /// A user was deleted.
    DeleteUser(PermissionUser),
    /// The entire user set was replaced.
    SetUsers(Vec<PermissionUser>),
    /// A group was created.
    AddGroup(PermissionGroup),
    /// A group was replaced.
    UpdateGroup(PermissionGroup),
    /// A group was deleted.
    DeleteGroup(PermissionGroup),
    /// The entire group set was replaced.
    SetGroups(Vec<PermissionGroup>),
    /// The store was reloaded wholesale; caches must refetch.
    Reloaded,
}
