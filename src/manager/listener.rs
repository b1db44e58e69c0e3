//! Connection Listeners
//!
//! A [`ConnectionListener`] subscribes to the four events the manager emits:
//!
//! | Event | Fired when |
//! |-------|------------|
//! | added | an accepted connection has been registered |
//! | removed | a connection has been closed and unregistered |
//! | data received | one chunk was read from a connection |
//! | data sent | a payload was accepted for writing on a connection |
//!
//! Listeners run in registration order. A hook returning
//! [`Propagation::Stop`] ends delivery of that one event; a hook returning
//! `Err` is logged and delivery moves on to the next listener.
//!
//! Hooks get `&mut ConnectionManager`, so they can reply, tag, or close
//! connections directly:
//!
//! ```
//! # use bytes::Bytes;
//! # use connmux::{ConnectionInfo, ConnectionListener, ConnectionManager, ListenerResult, Propagation};
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
//! ```

use super::ConnectionManager;
use crate::connection::ConnectionInfo;
use bytes::Bytes;
use std::fmt;
use std::sync::Arc;

/// Whether an event continues on to later listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Propagation {
    /// Deliver the event to the next listener
    Continue,
    /// Skip the remaining listeners for this event
    Stop,
}

/// Return type of every listener hook.
pub type ListenerResult = anyhow::Result<Propagation>;

/// Subscriber to connection lifecycle and data events.
///
/// Every hook defaults to [`Propagation::Continue`], so implementors only
/// override what they care about.
pub trait ConnectionListener: Send + Sync {
    fn on_connection_added(
        &self,
        _manager: &mut ConnectionManager,
        _conn: &ConnectionInfo,
    ) -> ListenerResult {
        Ok(Propagation::Continue)
    }

    fn on_connection_removed(
        &self,
        _manager: &mut ConnectionManager,
        _conn: &ConnectionInfo,
    ) -> ListenerResult {
        Ok(Propagation::Continue)
    }

    fn on_connection_data_received(
        &self,
        _manager: &mut ConnectionManager,
        _conn: &ConnectionInfo,
        _data: &Bytes,
    ) -> ListenerResult {
        Ok(Propagation::Continue)
    }

    fn on_connection_data_sent(
        &self,
        _manager: &mut ConnectionManager,
        _conn: &ConnectionInfo,
        _data: &Bytes,
    ) -> ListenerResult {
        Ok(Propagation::Continue)
    }
}

/// A listener as stored by the manager.
pub type SharedListener = Arc<dyn ConnectionListener>;

/// The four dispatchable events (used for logging).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Added,
    Removed,
    DataReceived,
    DataSent,
}

impl ConnectionEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionEvent::Added => "added",
            ConnectionEvent::Removed => "removed",
            ConnectionEvent::DataReceived => "data_received",
            ConnectionEvent::DataSent => "data_sent",
        }
    }
}

impl fmt::Display for ConnectionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered listener list. Duplicates are allowed.
#[derive(Clone, Default)]
pub struct ListenerList {
    listeners: Vec<SharedListener>,
}

impl ListenerList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener.
    pub fn push(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Removes the first occurrence of `listener`. Returns false if absent.
    pub fn remove(&mut self, listener: &SharedListener) -> bool {
        match self
            .listeners
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, listener))
        {
            Some(index) => {
                self.listeners.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copies the current list so dispatch is unaffected by hooks that add
    /// or remove listeners.
    pub fn snapshot(&self) -> Vec<SharedListener> {
        self.listeners.clone()
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn clear(&mut self) {
        self.listeners.clear();
    }
}

impl fmt::Debug for ListenerList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerList")
            .field("len", &self.listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    impl ConnectionListener for Noop {}

    #[test]
    fn test_remove_first_occurrence() {
        let a: SharedListener = Arc::new(Noop);
        let b: SharedListener = Arc::new(Noop);

        let mut list = ListenerList::new();
        list.push(Arc::clone(&a));
        list.push(Arc::clone(&b));
        list.push(Arc::clone(&a));
        assert_eq!(list.len(), 3);

        assert!(list.remove(&a));
        let remaining = list.snapshot();
        assert_eq!(remaining.len(), 2);
        assert!(Arc::ptr_eq(&remaining[0], &b));
        assert!(Arc::ptr_eq(&remaining[1], &a));

        assert!(list.remove(&a));
        assert!(!list.remove(&a));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut list = ListenerList::new();
        list.push(Arc::new(Noop));

        let snapshot = list.snapshot();
        list.clear();

        assert!(list.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(ConnectionEvent::Added.to_string(), "added");
        assert_eq!(ConnectionEvent::DataSent.as_str(), "data_sent");
    }
}
