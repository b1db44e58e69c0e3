//! Connection State
//!
//! A [`Connection`] wraps one [`Socket`] and adds what the manager needs to
//! route and evict it: a process-local numeric id, an optional logical
//! identifier, and an activity clock.
//!
//! ## Lifecycle
//!
//! ```text
//!   accept()            read/write failure,
//!      │                explicit close, idle eviction
//!      ▼                        │
//!  ┌────────┐                   ▼
//!  │  Open  │──────────────▶┌────────┐
//!  └────────┘               │ Closed │  (terminal)
//!                           └────────┘
//! ```
//!
//! The registry-facing half of each operation (event fan-out, identifier
//! uniqueness, unregistering) lives on the manager; this type only performs
//! the I/O and keeps its own state consistent.

use crate::error::CloseReason;
use crate::net::{ReadOutcome, Socket};
use bytes::Bytes;
use mio::{Registry, Token};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

/// Process-local connection id. Ids start at 1 and are never reused by the
/// manager that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The readiness handle a connection with this id is registered under.
    pub(crate) fn token(self) -> Token {
        Token(self.0 as usize)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}", self.0)
    }
}

/// A live client connection owned by the manager's registry.
#[derive(Debug)]
pub struct Connection {
    /// Process-local numeric id
    id: ConnectionId,

    /// Application-assigned logical name
    identifier: Option<String>,

    /// The owned stream
    socket: Socket,

    /// When the connection was accepted
    connected_at: Instant,

    /// Last successful read or write
    last_activity: Instant,
}

impl Connection {
    pub(crate) fn new(id: ConnectionId, socket: Socket) -> Self {
        let now = Instant::now();
        Self {
            id,
            identifier: None,
            socket,
            connected_at: now,
            last_activity: now,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn identifier(&self) -> Option<&str> {
        self.identifier.as_deref()
    }

    pub fn socket(&self) -> &Socket {
        &self.socket
    }

    pub fn ip(&self) -> IpAddr {
        self.socket.ip()
    }

    pub fn port(&self) -> u16 {
        self.socket.port()
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// Time elapsed since the last successful read or write.
    pub fn idle_time(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_activity)
    }

    /// Returns true if the connection has been idle for longer than `timeout`.
    #[inline]
    pub fn is_idle(&self, now: Instant, timeout: Duration) -> bool {
        self.idle_time(now) > timeout
    }

    /// Returns a detached copy of the connection's routing data.
    pub fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id,
            identifier: self.identifier.clone(),
            peer_addr: self.socket.peer_addr(),
            local_addr: self.socket.local_addr(),
            connected_at: self.connected_at,
            last_activity: self.last_activity,
        }
    }

    pub(crate) fn bind_identifier(&mut self, identifier: String) {
        self.identifier = Some(identifier);
    }

    /// Reads one chunk. `Ok(None)` means nothing was available.
    pub(crate) fn read(&mut self) -> Result<Option<Bytes>, CloseReason> {
        match self.socket.read() {
            ReadOutcome::Data(data) => {
                self.touch();
                Ok(Some(data))
            }
            ReadOutcome::WouldBlock => Ok(None),
            ReadOutcome::Closed => Err(CloseReason::PeerClosed),
            ReadOutcome::Failed(err) => Err(CloseReason::ReadFailed(err.kind())),
        }
    }

    /// Writes `data`, queueing what the socket cannot take yet.
    ///
    /// Only bytes that reach the stream count as activity.
    pub(crate) fn write(&mut self, data: &[u8]) -> Result<usize, CloseReason> {
        let written = self.socket.send(data).map_err(write_failure)?;
        if written > 0 {
            self.touch();
        }
        Ok(written)
    }

    /// Flushes queued output after a write-readiness event.
    pub(crate) fn flush(&mut self) -> Result<usize, CloseReason> {
        let written = self.socket.flush_pending().map_err(write_failure)?;
        if written > 0 {
            self.touch();
        }
        Ok(written)
    }

    pub(crate) fn sync_interest(&mut self, registry: &Registry) -> std::io::Result<()> {
        self.socket.sync_interest(registry)
    }

    pub(crate) fn close(&mut self, registry: &Registry) {
        self.socket.close(registry);
    }

    fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    #[cfg(test)]
    pub(crate) fn set_last_activity(&mut self, at: Instant) {
        self.last_activity = at;
    }
}

fn write_failure(err: std::io::Error) -> CloseReason {
    match err.kind() {
        std::io::ErrorKind::WriteZero => CloseReason::WriteZero,
        kind => CloseReason::WriteFailed(kind),
    }
}

/// Snapshot of a connection handed to listeners and returned by
/// `ConnectionManager::connections()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub identifier: Option<String>,
    pub peer_addr: SocketAddr,
    pub local_addr: SocketAddr,
    pub connected_at: Instant,
    pub last_activity: Instant,
}

impl ConnectionInfo {
    pub fn ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    pub fn port(&self) -> u16 {
        self.peer_addr.port()
    }
}

fn fmt_connection(
    f: &mut fmt::Formatter<'_>,
    id: ConnectionId,
    identifier: Option<&str>,
    peer: SocketAddr,
) -> fmt::Result {
    match identifier {
        Some(identifier) if !identifier.is_empty() => {
            write!(f, "[{}] {:0>5}@{}", id, identifier, peer)
        }
        _ => write!(f, "[{}] ?????@{}", id, peer),
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_connection(f, self.id, self.identifier(), self.socket.peer_addr())
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt_connection(f, self.id, self.identifier.as_deref(), self.peer_addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::socket::tests::{fill_send_buffer, socket_pair};
    use std::io::Write;

    fn test_connection(id: u64) -> (Connection, std::net::TcpStream) {
        let (stream, client) = socket_pair();
        let id = ConnectionId::new(id);
        let socket = Socket::new(stream, id.token(), 1024, 4 * 1024 * 1024).unwrap();
        (Connection::new(id, socket), client)
    }

    #[test]
    fn test_display_format() {
        let (mut conn, client) = test_connection(7);
        let peer = client.local_addr().unwrap();

        assert_eq!(conn.to_string(), format!("[0007] ?????@{}", peer));

        conn.bind_identifier("42".to_string());
        assert_eq!(conn.to_string(), format!("[0007] 00042@{}", peer));

        conn.bind_identifier("alice-laptop".to_string());
        assert_eq!(conn.to_string(), format!("[0007] alice-laptop@{}", peer));
        assert_eq!(conn.info().to_string(), conn.to_string());
    }

    #[test]
    fn test_idle_time() {
        let (mut conn, _client) = test_connection(1);
        let now = Instant::now();

        conn.set_last_activity(now - Duration::from_secs(10));
        assert!(conn.is_idle(now, Duration::from_secs(5)));
        assert!(!conn.is_idle(now, Duration::from_secs(10)));
        assert!(!conn.is_idle(now, Duration::from_secs(30)));
    }

    #[test]
    fn test_write_resets_activity() {
        let (mut conn, _client) = test_connection(1);
        let stale = Instant::now() - Duration::from_secs(60);
        conn.set_last_activity(stale);

        conn.write(b"hello").unwrap();
        assert!(conn.last_activity() > stale);
    }

    #[test]
    fn test_queued_write_keeps_idle_clock() {
        let (mut conn, _client) = test_connection(1);
        fill_send_buffer(&mut conn.socket, &[b'x'; 64 * 1024]);

        let stale = Instant::now() - Duration::from_secs(60);
        conn.set_last_activity(stale);

        // Nothing reaches a peer that has stopped reading
        assert_eq!(conn.write(b"more"), Ok(0));
        assert_eq!(conn.last_activity(), stale);
    }

    #[test]
    fn test_overflowing_write_is_a_write_failure() {
        let (stream, _client) = socket_pair();
        let id = ConnectionId::new(2);
        let socket = Socket::new(stream, id.token(), 1024, 128 * 1024).unwrap();
        let mut conn = Connection::new(id, socket);
        let chunk = vec![b'x'; 64 * 1024];

        let reason = (0..4096)
            .find_map(|_| conn.write(&chunk).err())
            .expect("send buffer limit never reached");
        assert_eq!(
            reason,
            CloseReason::WriteFailed(std::io::ErrorKind::OutOfMemory)
        );
    }

    #[test]
    fn test_read_resets_activity() {
        let (mut conn, mut client) = test_connection(1);
        let stale = Instant::now() - Duration::from_secs(60);
        conn.set_last_activity(stale);

        assert_eq!(conn.read(), Ok(None));
        assert_eq!(conn.last_activity(), stale);

        client.write_all(b"PING").unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        let data = loop {
            match conn.read() {
                Ok(Some(data)) => break data,
                Ok(None) if Instant::now() < deadline => {
                    std::thread::sleep(Duration::from_millis(5))
                }
                other => panic!("unexpected read: {:?}", other),
            }
        };

        assert_eq!(&data[..], b"PING");
        assert!(conn.last_activity() > stale);
    }

    #[test]
    fn test_info_snapshot() {
        let (mut conn, client) = test_connection(9);
        conn.bind_identifier("bob".to_string());

        let info = conn.info();
        assert_eq!(info.id, ConnectionId::new(9));
        assert_eq!(info.identifier.as_deref(), Some("bob"));
        assert_eq!(info.peer_addr, client.local_addr().unwrap());
        assert_eq!(info.port(), conn.port());
        assert_eq!(info.ip(), conn.ip());
    }
}
