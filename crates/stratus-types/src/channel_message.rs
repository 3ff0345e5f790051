//! Cross-process channel messages.
//!
//! A channel message is a named document relayed through the node to a
//! target selector. Messages are never persisted; delivery is
//! best-effort and at-most-once per currently connected recipient.

use crate::document::Document;
use serde::{Deserialize, Serialize};

/// Recipient selector for a [`ChannelMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageTarget {
    /// Every connected component, the node included.
    All,
    /// A specific node by name.
    Node(String),
    /// A specific service by name.
    Service(String),
    /// Every service belonging to the named task group.
    TaskGroup(String),
}

/// A named pub/sub message relayed over the cluster.
///
/// `channel` scopes a topic namespace (distinct from the numeric packet
/// channels of the transport); `message` names the event within it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelMessage {
    /// Topic namespace, chosen by the publishing collaborator.
    pub channel: String,
    /// Message name within the channel.
    pub message: String,
    /// Free-form payload.
    pub data: Document,
    /// Who should receive the message.
    pub target: MessageTarget,
}

impl ChannelMessage {
    /// Build a broadcast message.
    #[must_use]
    pub fn broadcast(
        channel: impl Into<String>,
        message: impl Into<String>,
        data: Document,
    ) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            data,
            target: MessageTarget::All,
        }
    }

    /// Build a message addressed to a single service.
    #[must_use]
    pub fn to_service(
        channel: impl Into<String>,
        message: impl Into<String>,
        data: Document,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            channel: channel.into(),
            message: message.into(),
            data,
            target: MessageTarget::Service(service_name.into()),
        }
    }
}
