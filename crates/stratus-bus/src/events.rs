//! The closed event catalogue.
//!
//! Every event a collaborator can observe is one variant here; dispatch
//! is keyed by the matching [`EventKind`] discriminant, resolved at
//! compile time. A small subset of variants is cancelable: downstream
//! stages must check the flag before acting.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use stratus_types::{ChannelMessage, Document, ServiceInfoSnapshot};
use uuid::Uuid;

/// Which session tier an event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionTier {
    /// The player-facing proxy layer.
    Proxy,
    /// A backend server instance.
    Server,
}

/// Minimal identity of a connected end-user session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Stable session/user id.
    pub unique_id: Uuid,
    /// Display name.
    pub name: String,
}

/// All events that flow through the in-process bus.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterEvent {
    /// A service was registered at the authority.
    ServiceRegistered(ServiceInfoSnapshot),
    /// A service's process was started.
    ServiceStarted(ServiceInfoSnapshot),
    /// A service's wrapper channel connected.
    ServiceConnected(ServiceInfoSnapshot),
    /// A service's wrapper channel disconnected.
    ServiceDisconnected(ServiceInfoSnapshot),
    /// A service's process stopped.
    ServiceStopped(ServiceInfoSnapshot),
    /// A service was removed from the authority.
    ServiceUnregistered(ServiceInfoSnapshot),
    /// A fresh snapshot for a service was accepted.
    ServiceInfoUpdated(ServiceInfoSnapshot),

    /// The component's assigned runtime configuration changed.
    ConfigurationUpdated(Document),

    /// Extension point fired while a new snapshot is being assembled:
    /// listeners may mutate `properties` before the snapshot becomes
    /// current.
    ServiceInfoConfigure {
        /// Properties the snapshot will carry.
        properties: Document,
    },

    /// A cross-process channel message arrived for this component.
    ChannelMessageReceived(ChannelMessage),

    /// A transport channel to a peer was established.
    ChannelConnected {
        /// Remote peer address.
        peer: SocketAddr,
    },
    /// A transport channel to a peer closed.
    ChannelClosed {
        /// Remote peer address.
        peer: SocketAddr,
    },

    /// A session asks to log in. Cancelable.
    SessionPreLogin {
        /// Tier the login arrives at.
        tier: SessionTier,
        /// The session attempting to log in.
        session: SessionInfo,
        /// Set by a listener to reject the login.
        cancelled: bool,
    },
    /// A session completed login.
    SessionLogin {
        /// Tier the login completed at.
        tier: SessionTier,
        /// The logged-in session.
        session: SessionInfo,
    },
    /// A session moved between services.
    SessionSwitch {
        /// The moving session.
        session: SessionInfo,
        /// Name of the service the session left.
        from_service: String,
        /// Name of the service the session joined.
        to_service: String,
    },
    /// A session disconnected.
    SessionDisconnect {
        /// Tier the disconnect was observed at.
        tier: SessionTier,
        /// The departed session.
        session: SessionInfo,
    },

    /// A console/command line is about to be processed. Cancelable.
    CommandPreProcess {
        /// The raw command line.
        command_line: String,
        /// Set by a listener to suppress execution.
        cancelled: bool,
    },
}

/// Dispatch key for [`ClusterEvent`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// `ServiceRegistered`.
    ServiceRegistered,
    /// `ServiceStarted`.
    ServiceStarted,
    /// `ServiceConnected`.
    ServiceConnected,
    /// `ServiceDisconnected`.
    ServiceDisconnected,
    /// `ServiceStopped`.
    ServiceStopped,
    /// `ServiceUnregistered`.
    ServiceUnregistered,
    /// `ServiceInfoUpdated`.
    ServiceInfoUpdated,
    /// `ConfigurationUpdated`.
    ConfigurationUpdated,
    /// `ServiceInfoConfigure`.
    ServiceInfoConfigure,
    /// `ChannelMessageReceived`.
    ChannelMessageReceived,
    /// `ChannelConnected`.
    ChannelConnected,
    /// `ChannelClosed`.
    ChannelClosed,
    /// `SessionPreLogin`.
    SessionPreLogin,
    /// `SessionLogin`.
    SessionLogin,
    /// `SessionSwitch`.
    SessionSwitch,
    /// `SessionDisconnect`.
    SessionDisconnect,
    /// `CommandPreProcess`.
    CommandPreProcess,
}

impl ClusterEvent {
    /// The dispatch key of this event.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ServiceRegistered(_) => EventKind::ServiceRegistered,
            Self::ServiceStarted(_) => EventKind::ServiceStarted,
            Self::ServiceConnected(_) => EventKind::ServiceConnected,
            Self::ServiceDisconnected(_) => EventKind::ServiceDisconnected,
            Self::ServiceStopped(_) => EventKind::ServiceStopped,
            Self::ServiceUnregistered(_) => EventKind::ServiceUnregistered,
            Self::ServiceInfoUpdated(_) => EventKind::ServiceInfoUpdated,
            Self::ConfigurationUpdated(_) => EventKind::ConfigurationUpdated,
            Self::ServiceInfoConfigure { .. } => EventKind::ServiceInfoConfigure,
            Self::ChannelMessageReceived(_) => EventKind::ChannelMessageReceived,
            Self::ChannelConnected { .. } => EventKind::ChannelConnected,
            Self::ChannelClosed { .. } => EventKind::ChannelClosed,
            Self::SessionPreLogin { .. } => EventKind::SessionPreLogin,
            Self::SessionLogin { .. } => EventKind::SessionLogin,
            Self::SessionSwitch { .. } => EventKind::SessionSwitch,
            Self::SessionDisconnect { .. } => EventKind::SessionDisconnect,
            Self::CommandPreProcess { .. } => EventKind::CommandPreProcess,
        }
    }

    /// Whether this variant carries a cancellation flag.
    #[must_use]
    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            Self::SessionPreLogin { .. } | Self::CommandPreProcess { .. }
        )
    }

    /// The cancellation flag, `false` for non-cancelable variants.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::SessionPreLogin { cancelled, .. }
            | Self::CommandPreProcess { cancelled, .. } => *cancelled,
            _ => false,
        }
    }

    /// Set the cancellation flag. No-op for non-cancelable variants.
    pub fn set_cancelled(&mut self, value: bool) {
        match self {
            Self::SessionPreLogin { cancelled, .. }
            | Self::CommandPreProcess { cancelled, .. } => *cancelled = value,
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionInfo {
        SessionInfo { unique_id: Uuid::new_v4(), name: "derklaro".into() }
    }

    #[test]
    fn test_kind_mapping() {
        let event = ClusterEvent::ConfigurationUpdated(Document::new());
        assert_eq!(event.kind(), EventKind::ConfigurationUpdated);
    }

    #[test]
    fn test_cancellable_subset() {
        let login = ClusterEvent::SessionPreLogin {
            tier: SessionTier::Proxy,
            session: session(),
            cancelled: false,
        };
        let plain = ClusterEvent::SessionLogin { tier: SessionTier::Proxy, session: session() };

        assert!(login.is_cancellable());
        assert!(!plain.is_cancellable());
    }

    #[test]
    fn test_cancel_flag_round_trip() {
        let mut event = ClusterEvent::CommandPreProcess {
            command_line: "stop Lobby-1".into(),
            cancelled: false,
        };
        assert!(!event.is_cancelled());
        event.set_cancelled(true);
        assert!(event.is_cancelled());
    }

    #[test]
    fn test_set_cancelled_on_plain_event_is_noop() {
        let mut event = ClusterEvent::ConfigurationUpdated(Document::new());
        event.set_cancelled(true);
        assert!(!event.is_cancelled());
    }
}
