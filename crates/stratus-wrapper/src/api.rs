//! Driver-API client: typed remote calls to the authority.
//!
//! Every operation is one [`DriverRequest`] sent as a correlated query
//! on the driver-API channel; the caller decodes the [`DriverResponse`]
//! arm it expects.

use std::sync::Arc;
use std::time::Duration;
use stratus_net::{channels, NetworkClient, Packet, QueryError, QueryManager};
use stratus_types::{Document, DriverRequest, DriverResponse, ServiceTemplate};
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

/// Failure modes of a driver-API call.
#[derive(Debug, Error)]
pub enum DriverApiError {
    /// No channel to the authority.
    #[error("not connected to the authority")]
    NotConnected,
    /// The underlying query failed (timeout, closed channel, decode).
    #[error(transparent)]
    Query(#[from] QueryError),
    /// The request or response body could not be encoded/decoded.
    #[error("encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    /// The authority reported a failure.
    #[error("request failed on the authority: {0}")]
    Remote(String),
    /// The authority answered with an arm the call did not expect.
    #[error("unexpected response variant for {method}")]
    UnexpectedResponse {
        /// The method that was called.
        method: &'static str,
    },
}

/// Typed facade over the driver-API channel.
pub struct DriverApiClient {
    client: Arc<NetworkClient>,
    queries: Arc<QueryManager>,
    timeout: Duration,
}

impl DriverApiClient {
    /// Create a client issuing queries with the given default deadline.
    #[must_use]
    pub fn new(client: Arc<NetworkClient>, queries: Arc<QueryManager>, timeout: Duration) -> Self {
        Self { client, queries, timeout }
    }

    /// Execute `request` and return the raw response arm.
    pub async fn execute(&self, request: &DriverRequest) -> Result<DriverResponse, DriverApiError> {
        self.execute_with_timeout(request, self.timeout).await
    }

    /// Execute `request` with an explicit deadline.
    pub async fn execute_with_timeout(
        &self,
        request: &DriverRequest,
        timeout: Duration,
    ) -> Result<DriverResponse, DriverApiError> {
        let channel = self.client.channel().ok_or(DriverApiError::NotConnected)?;
        let packet = Packet::typed(
            channels::DRIVER_API,
            Document::new().append("method", request.method_name()),
            request,
        )?;

        debug!(method = request.method_name(), "issuing driver-api call");
        let response = self.queries.query(&channel, packet, timeout).await?;
        let response: DriverResponse = response.decode_body()?;

        match response {
            DriverResponse::Failure { message } => Err(DriverApiError::Remote(message)),
            other => Ok(other),
        }
    }

    /// Templates held by `storage` (e.g. `local`).
    pub async fn get_template_storage_templates(
        &self,
        storage: impl Into<String>,
    ) -> Result<Vec<ServiceTemplate>, DriverApiError> {
        let request = DriverRequest::GetTemplateStorageTemplates { storage: storage.into() };
        match self.execute(&request).await? {
            DriverResponse::Templates(templates) => Ok(templates),
            _ => Err(DriverApiError::UnexpectedResponse { method: request.method_name() }),
        }
    }

    /// Templates held by the node-local storage.
    pub async fn get_local_template_storage_templates(
        &self,
    ) -> Result<Vec<ServiceTemplate>, DriverApiError> {
        self.get_template_storage_templates("local").await
    }

    /// Run `command_line` on the node as the permission user `unique_id`.
    pub async fn send_command_line_as_permission_user(
        &self,
        unique_id: Uuid,
        command_line: impl Into<String>,
    ) -> Result<(bool, Vec<String>), DriverApiError> {
        let request = DriverRequest::SendCommandLineAsPermissionUser {
            unique_id,
            command_line: command_line.into(),
        };
        match self.execute(&request).await? {
            DriverResponse::CommandResult { success, output } => Ok((success, output)),
            _ => Err(DriverApiError::UnexpectedResponse { method: request.method_name() }),
        }
    }

    /// Ask the node to switch the whole cluster to `level`.
    pub async fn set_global_log_level(
        &self,
        level: impl Into<String>,
    ) -> Result<(), DriverApiError> {
        let request = DriverRequest::SetGlobalLogLevel { level: level.into() };
        match self.execute(&request).await? {
            DriverResponse::Applied => Ok(()),
            _ => Err(DriverApiError::UnexpectedResponse { method: request.method_name() }),
        }
    }
}
