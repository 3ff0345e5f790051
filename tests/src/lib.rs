//! # Stratus Test Suite
//!
//! Unified test crate exercising the node and wrapper together over
//! real TCP sockets.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── support.rs        # Node/wrapper fixtures and event recorders
//! └── integration/      # Cross-crate flows
//!     ├── handshake_flows.rs
//!     ├── query_flows.rs
//!     ├── permission_flows.rs
//!     ├── snapshot_flows.rs
//!     └── messaging_flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p stratus-tests
//! cargo test -p stratus-tests integration::
//! ```

pub mod integration;
pub mod support;
