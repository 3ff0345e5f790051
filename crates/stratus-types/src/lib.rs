//! # Stratus Shared Types
//!
//! Domain types shared between the node (authority) and the wrapper
//! (in-worker agent): service identity and snapshots, permission
//! entities, channel messages, property documents, and the driver-API
//! payload catalogue.
//!
//! ## Design Principles
//!
//! - **Single source of truth**: every type that crosses the wire or a
//!   crate boundary is defined here.
//! - **Value objects**: snapshots and messages are immutable once built;
//!   an update is a new instance, never an in-place mutation.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod api;
pub mod channel_message;
pub mod document;
pub mod permission;
pub mod service;

pub use api::{DriverRequest, DriverResponse, PermissionUpdate};
pub use channel_message::{ChannelMessage, MessageTarget};
pub use document::Document;
pub use permission::{
    Permission, PermissionGroup, PermissionUser, PermissionUserGroupInfo,
};
pub use service::{
    EnvironmentKind, ProcessSnapshot, ServiceConfiguration, ServiceId,
    ServiceInfoSnapshot, ServiceLifecycle, ServiceTemplate, ThreadSnapshot,
};
