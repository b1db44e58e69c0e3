//! Connection Module
//!
//! This module holds the per-client side of the connection manager: the
//! [`Connection`] entity that wraps one accepted socket, the detached
//! [`ConnectionInfo`] snapshot handed to listeners, and the shared
//! [`ConnectionStats`] counters.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   ConnectionManager                         │
//! │                                                             │
//! │   registry: Token ──▶ Connection                            │
//! │                         │                                   │
//! │                         ├── id          (0001, 0002, ...)   │
//! │                         ├── identifier  ("alice", None)     │
//! │                         ├── socket      (owned stream)      │
//! │                         └── last_activity                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use connmux::connection::{ConnectionId, ConnectionInfo};
//!
//! fn describe(conn: &ConnectionInfo) -> String {
//!     format!("{} from {}", conn.id, conn.ip())
//! }
//! ```

pub mod state;
pub mod stats;

// Re-export commonly used types
pub use state::{Connection, ConnectionId, ConnectionInfo};
pub use stats::ConnectionStats;
