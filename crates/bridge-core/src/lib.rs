//! # avb-bridge-core
//!
//! Per-connection bridging between an AVB datastore and websocket clients.
//!
//! This crate provides the two building blocks every connection gets:
//!
//! - **PollLoop** - Long-polls one datastore resource and emits each changed payload
//! - **Bridge** - Owns a PollLoop for the lifetime of a connection and relays
//!   client updates back to the datastore
//! - **Upstream** - The HTTP seam to the datastore, with a reqwest implementation
//!
//! ## Architecture
//!
//! ```text
//!                 PATCH (update)
//! ┌────────────┐ ─────────────▶ ┌─────────────┐
//! │   Bridge   │                │  Datastore  │
//! └────────────┘                └─────────────┘
//!       ▲   │ spawns                   │
//!       │   ▼                          │ GET + If-None-Match
//!       │ ┌────────────┐ ◀─────────────┘
//!       └─│  PollLoop  │  payloads via outbound channel
//!         └────────────┘
//! ```

pub mod bridge;
pub mod context;
pub mod error;
pub mod poller;
pub mod upstream;

#[cfg(test)]
mod testing;

pub use bridge::{Bridge, BridgeConfig, BridgeState, Shutdown};
pub use context::{random_client_id, ConnectionId};
pub use error::BridgeError;
pub use poller::{PollLoop, PollState};
pub use upstream::{HttpUpstream, PollResponse, Upstream};
