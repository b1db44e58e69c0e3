//! # connmux - A Readiness-Multiplexed Connection Manager
//!
//! connmux is the core runtime for small socket servers. A single thread
//! accepts inbound TCP connections, reads from whichever ones are ready,
//! evicts idle ones, and hands every lifecycle and data event to a list of
//! subscribed listeners. It defines no wire protocol: listeners receive raw
//! byte chunks and decide what they mean.
//!
//! ## Features
//!
//! - **One Loop, No Locks**: A `mio` readiness wait multiplexes the listening
//!   socket and every connection on one thread
//! - **Addressing**: Reach connections by numeric id or by an
//!   application-assigned identifier, kept unique across live connections
//! - **Idle Eviction**: A periodic sweep closes connections that have been
//!   silent longer than the keepalive timeout
//! - **Fault-Isolated Listeners**: A failing listener is logged and skipped;
//!   any listener can stop an event from reaching later ones
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ConnectionManager                             │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────┐    ┌───────────────┐   │
//! │  │ServerSocket │───>│ registry                 │───>│  Listeners    │   │
//! │  │ (accept)    │    │  Token ──▶ Connection    │    │  (in order)   │   │
//! │  └─────────────┘    │             └─ Socket    │    └───────────────┘   │
//! │         ▲           └──────────────────────────┘                        │
//! │         │                        ▲                                      │
//! │  ┌──────┴────────────────────────┴──────┐    ┌──────────────────────┐   │
//! │  │        readiness wait (mio)          │    │  idle sweep          │   │
//! │  └──────────────────────────────────────┘    └──────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use bytes::Bytes;
//! use connmux::{ConnectionInfo, ConnectionListener, ConnectionManager};
//! use connmux::{ListenerResult, ManagerConfig, Propagation};
//! use std::sync::Arc;
//!
//! struct Echo;
//!
//! impl ConnectionListener for Echo {
//!     fn on_connection_data_received(
//!         &self,
//!         manager: &mut ConnectionManager,
//!         conn: &ConnectionInfo,
//!         data: &Bytes,
//!     ) -> ListenerResult {
//!         manager.send_to_connection(conn, data.clone())?;
//!         Ok(Propagation::Continue)
//!     }
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut manager = ConnectionManager::new(ManagerConfig::with_port(7000))?;
//!     manager.add_connection_listener(Arc::new(Echo));
//!     manager.run()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`net`]: Non-blocking socket wrappers (`Socket`, `ServerSocket`)
//! - [`connection`]: The `Connection` entity, its snapshot, and statistics
//! - [`manager`]: The event loop, registry, listeners, and configuration
//! - [`error`]: Error types
//!
//! ## Design Highlights
//!
//! ### Snapshot Before Mutate
//!
//! Closing a connection fires listeners, and listeners may close or message
//! other connections. The idle sweep, shutdown, and event dispatch all work
//! from a copy of the ids or listeners they iterate, so none of them is
//! disturbed by what a listener does.
//!
//! ### Sweeps Without Traffic
//!
//! The readiness wait is bounded by the time left until the next sweep, so
//! idle connections are evicted on schedule even when no socket becomes
//! ready.

pub mod connection;
pub mod error;
pub mod manager;
pub mod net;

// Re-export commonly used types for convenience
pub use connection::{Connection, ConnectionId, ConnectionInfo, ConnectionStats};
pub use error::{CloseReason, ManagerError, Result};
pub use manager::{
    ConnectionListener, ConnectionManager, ListenerResult, ManagerConfig, Propagation,
    SharedListener, StopHandle,
};

/// The default port connmux listens on
pub const DEFAULT_PORT: u16 = 8000;

/// The default host the demo server binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of connmux
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
