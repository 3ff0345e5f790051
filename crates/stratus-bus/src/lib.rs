//! # Stratus Event Bus
//!
//! Typed in-process events for node and wrapper collaborators.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │ Core layer   │                    │ Collaborator │
//! │              │   call_event()     │   module     │
//! │              │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │ ─────────┘
//!                  └──────────────┘  register()
//! ```
//!
//! Dispatch is synchronous and ordered: listeners run on the calling
//! task, in registration order, so a collaborator observing
//! `ServiceStopped` after `ServiceStarted` can rely on having seen them
//! in that order. Cross-process messaging is not handled here — that is
//! the channel-message relay in the node/wrapper runtimes.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod bus;
pub mod events;

pub use bus::{EventBus, EventListener, EventListenerResult, EventOwner};
pub use events::{ClusterEvent, EventKind, SessionInfo, SessionTier};
