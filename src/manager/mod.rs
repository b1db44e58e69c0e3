//! Connection Manager Module
//!
//! This module implements the orchestrating half of connmux: the event loop
//! that accepts connections, reads from them, sweeps idle ones, and fans
//! every lifecycle and data event out to the registered listeners.
//!
//! ## Architecture
//!
//! ```text
//!                ┌───────────────────────────┐
//!                │     readiness wait        │
//!                │  (listener + connections) │
//!                └─────────────┬─────────────┘
//!                              │ ready handles
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!     ┌─────────────────┐             ┌─────────────────┐
//!     │ accept one      │             │ read one chunk  │
//!     │ → registry      │             │ from Connection │
//!     └────────┬────────┘             └────────┬────────┘
//!              │ added                         │ data_received
//!              └───────────────┬───────────────┘
//!                              ▼
//!                ┌───────────────────────────┐
//!                │  listeners, in order      │
//!                │  Continue │ Stop │ Err    │
//!                └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use connmux::manager::{ConnectionManager, ManagerConfig};
//! use std::time::Duration;
//!
//! let config = ManagerConfig {
//!     keepalive_timeout: Duration::from_secs(60),
//!     ..ManagerConfig::with_port(9000)
//! };
//! let mut manager = ConnectionManager::new(config)?;
//! manager.run()?;
//! # Ok::<(), connmux::ManagerError>(())
//! ```

pub mod config;
pub mod listener;
pub mod runtime;

// Re-export commonly used types
pub use config::ManagerConfig;
pub use listener::{
    ConnectionEvent, ConnectionListener, ListenerList, ListenerResult, Propagation, SharedListener,
};
pub use runtime::{ConnectionManager, StopHandle};
