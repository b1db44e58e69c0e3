//! Socket Module
//!
//! Thin, non-blocking wrappers around `mio` sockets. These are the only types
//! in the crate that touch the operating system's networking API; the
//! connection manager sees them as two capabilities:
//!
//! - [`ServerSocket`]: a listening socket that yields one accepted stream per
//!   `accept()` call.
//! - [`Socket`]: one connected byte stream with chunked reads, writes that
//!   keep their unaccepted tail for the next write-readiness, and an
//!   idempotent close.
//!
//! Both expose their readiness handle (a `mio::Token`) so the manager can key
//! its registry and its readiness wait on the same value.

pub mod server;
pub mod socket;

// Re-export commonly used types
pub use server::ServerSocket;
pub use socket::{ReadOutcome, Socket};
