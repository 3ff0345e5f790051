//! Driver-API servicing on the node.

use crate::NodeState;
use async_trait::async_trait;
use std::sync::Arc;
use stratus_bus::ClusterEvent;
use stratus_net::{channels, ListenerResult, NetworkChannel, Packet, PacketListener};
use stratus_types::{Document, DriverRequest, DriverResponse, PermissionUpdate, PermissionUser};
use tracing::{debug, info};

/// Executes impersonated command lines on the node.
///
/// Command parsing and the console are collaborator territory; the
/// core only routes the request, runs the cancelable pre-process
/// event, and reports the outcome.
pub trait CommandExecutor: Send + Sync {
    /// Execute `command_line` as `user`. Returns the success flag and
    /// captured output lines.
    fn execute(&self, user: &PermissionUser, command_line: &str) -> (bool, Vec<String>);
}

/// Listener answering driver-API queries.
pub struct DriverApiListener {
    state: Arc<NodeState>,
}

impl DriverApiListener {
    /// Create the listener.
    #[must_use]
    pub fn new(state: Arc<NodeState>) -> Self {
        Self { state }
    }

    /// Push a permission change to every authorized agent except the
    /// one that asked for it — the requester applies the change on its
    /// own acknowledgement, so its hooks fire exactly once.
    fn push_permission_update(
        &self,
        update: &PermissionUpdate,
        origin_channel: u64,
    ) -> Result<(), serde_json::Error> {
        let packet = Packet::typed(channels::PERMISSIONS_PUBLISH, Document::new(), update)?;
        self.state.agents.broadcast(&packet, Some(origin_channel));
        Ok(())
    }

    fn handle_request(
        &self,
        request: DriverRequest,
        origin_channel: u64,
    ) -> Result<DriverResponse, serde_json::Error> {
        let state = &self.state;

        let response = match request {
            DriverRequest::GetTemplateStorageTemplates { storage } => {
                let templates = state
                    .templates
                    .get(&storage)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();
                DriverResponse::Templates(templates)
            }

            DriverRequest::SendCommandLineAsPermissionUser { unique_id, command_line } => {
                let Some(user) = state.permissions.user(&unique_id) else {
                    return Ok(DriverResponse::Failure {
                        message: format!("unknown permission user {unique_id}"),
                    });
                };

                let mut event = ClusterEvent::CommandPreProcess {
                    command_line: command_line.clone(),
                    cancelled: false,
                };
                if !state.event_bus.call_event(&mut event) {
                    return Ok(DriverResponse::CommandResult {
                        success: false,
                        output: vec!["command execution cancelled".to_string()],
                    });
                }

                let executor = state.command_executor.read().clone();
                let (success, output) = match executor {
                    Some(executor) => executor.execute(&user, &command_line),
                    None => (false, vec!["no command executor installed".to_string()]),
                };
                info!(user = %user.name, command = %command_line, success, "impersonated command executed");
                DriverResponse::CommandResult { success, output }
            }

            DriverRequest::GetPermissionUser { unique_id } => {
                DriverResponse::PermissionUser(state.permissions.user(&unique_id))
            }
            DriverRequest::AddPermissionUser { user } => {
                let update = state.permissions.add_user(user);
                self.push_permission_update(&update, origin_channel)?;
                DriverResponse::Applied
            }
            DriverRequest::UpdatePermissionUser { user } => match state.permissions.update_user(user)
            {
                Ok(update) => {
                    self.push_permission_update(&update, origin_channel)?;
                    DriverResponse::Applied
                }
                Err(error) => DriverResponse::Failure { message: error.to_string() },
            },
            DriverRequest::DeletePermissionUser { unique_id } => {
                match state.permissions.delete_user(&unique_id) {
                    Ok(update) => {
                        self.push_permission_update(&update, origin_channel)?;
                        DriverResponse::Applied
                    }
                    Err(error) => DriverResponse::Failure { message: error.to_string() },
                }
            }
            DriverRequest::SetPermissionUsers { users } => {
                let update = state.permissions.set_users(users);
                self.push_permission_update(&update, origin_channel)?;
                DriverResponse::Applied
            }

            DriverRequest::GetPermissionGroup { name } => {
                DriverResponse::PermissionGroup(state.permissions.group(&name))
            }
            DriverRequest::GetPermissionGroups => {
                DriverResponse::PermissionGroups(state.permissions.groups())
            }
            DriverRequest::AddPermissionGroup { group } => {
                let update = state.permissions.add_group(group);
                self.push_permission_update(&update, origin_channel)?;
                DriverResponse::Applied
            }
            DriverRequest::UpdatePermissionGroup { group } => {
                match state.permissions.update_group(group) {
                    Ok(update) => {
                        self.push_permission_update(&update, origin_channel)?;
                        DriverResponse::Applied
                    }
                    Err(error) => DriverResponse::Failure { message: error.to_string() },
                }
            }
            DriverRequest::DeletePermissionGroup { name } => {
                match state.permissions.delete_group(&name) {
                    Ok(update) => {
                        self.push_permission_update(&update, origin_channel)?;
                        DriverResponse::Applied
                    }
                    Err(error) => DriverResponse::Failure { message: error.to_string() },
                }
            }
            DriverRequest::SetPermissionGroups { groups } => {
                let update = state.permissions.set_groups(groups);
                self.push_permission_update(&update, origin_channel)?;
                DriverResponse::Applied
            }

            DriverRequest::SetGlobalLogLevel { level } => {
                info!(level = %level, "applying global log level cluster-wide");
                if let Some(handle) = &state.log_level {
                    if let Err(error) = handle.set_filter(&level) {
                        return Ok(DriverResponse::Failure { message: error.to_string() });
                    }
                }
                let packet = Packet::typed(channels::GLOBAL_LOG_LEVEL, Document::new(), &level)?;
                self.state.agents.broadcast(&packet, None);
                DriverResponse::Applied
            }
        };

        Ok(response)
    }
}

#[async_trait]
impl PacketListener for DriverApiListener {
    async fn handle(&self, channel: &Arc<NetworkChannel>, packet: &Packet) -> ListenerResult {
        // Responses to queries the node itself issued carry the same
        // channel id; only request packets are serviced here.
        let request: DriverRequest = match packet.decode_body() {
            Ok(request) => request,
            Err(_) => return Ok(()),
        };

        debug!(method = request.method_name(), "servicing driver-api request");
        let response = self.handle_request(request, channel.id())?;
        channel.send(Packet::typed_response_to(packet, Document::new(), &response)?);
        Ok(())
    }
}
