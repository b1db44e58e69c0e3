//! Connection Manager
//!
//! [`ConnectionManager`] owns the listening socket, the registry of live
//! connections, the listener list, and the readiness loop that drives them.
//!
//! ## Loop Body
//!
//! ```text
//! check_connections()
//!   │
//!   ├── 1. bind the listening socket (first call only)
//!   ├── 2. wait for readiness on {listener, every connection}
//!   │       timeout = time until the next sweep is due
//!   ├── 3. for each ready handle
//!   │       ├── listener   → accept one connection, fire `added`
//!   │       └── connection → flush queued output / read one chunk,
//!   │                        fire `data_received`
//!   └── 4. sweep idle connections if the sweep interval has elapsed
//! ```
//!
//! Failures on one connection (read, write, accept) are logged at debug level
//! and never leave the loop. Only a failed readiness wait or a failed bind
//! ends `run()`.
//!
//! ## Lookups
//!
//! Connection ids double as readiness tokens, so id lookups are a single
//! hash lookup. Identifier lookups scan the live connections; identifiers are
//! reassigned rarely and servers built on this hold modest connection
//! counts.

use super::config::ManagerConfig;
use super::listener::{
    ConnectionEvent, ConnectionListener, ListenerList, ListenerResult, Propagation, SharedListener,
};
use crate::connection::{Connection, ConnectionId, ConnectionInfo, ConnectionStats};
use crate::error::{CloseReason, ManagerError, Result};
use crate::net::{ServerSocket, Socket};
use bytes::Bytes;
use mio::{Events, Poll, Registry, Token, Waker};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Readiness handle of the listening socket. Connection ids start at 1.
const LISTENER_TOKEN: Token = Token(0);

/// Readiness handle of the cross-thread waker
const WAKER_TOKEN: Token = Token(usize::MAX);

/// Stops a running manager from any thread.
#[derive(Debug, Clone)]
pub struct StopHandle {
    running: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl StopHandle {
    /// Clears the running flag and wakes the readiness wait so the loop
    /// observes it without waiting for I/O.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Err(err) = self.waker.wake() {
            warn!(error = %err, "Failed to wake connection manager");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Readiness {
    readable: bool,
    writable: bool,
}

/// Single-threaded, readiness-multiplexed connection manager.
#[derive(Debug)]
pub struct ConnectionManager {
    config: ManagerConfig,

    /// Readiness poller over the listener and every connection
    poll: Poll,

    /// Reused event buffer for the readiness wait
    events: Events,

    waker: Arc<Waker>,

    /// Created lazily on the first loop iteration (or by `listen()`)
    server: Option<ServerSocket>,

    /// Live connections keyed by readiness handle
    registry: HashMap<Token, Connection>,

    listeners: ListenerList,

    /// Handles whose last read or accept produced something. The poller is
    /// edge-triggered, so these are serviced again until they would block.
    backlog: Vec<Token>,

    next_id: u64,

    last_sweep: Instant,

    running: Arc<AtomicBool>,

    stats: Arc<ConnectionStats>,
}

impl ConnectionManager {
    /// Creates a manager. Nothing is bound until the first loop iteration.
    pub fn new(config: ManagerConfig) -> Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        let events = Events::with_capacity(config.event_capacity.max(1));

        Ok(Self {
            config,
            poll,
            events,
            waker,
            server: None,
            registry: HashMap::new(),
            listeners: ListenerList::new(),
            backlog: Vec::new(),
            next_id: 1,
            last_sweep: Instant::now(),
            running: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(ConnectionStats::new()),
        })
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn port(&self) -> u16 {
        self.config.port
    }

    /// Sets the listening port. Has no effect once the socket is bound.
    pub fn set_port(&mut self, port: u16) {
        if let Some(server) = &self.server {
            warn!(
                addr = %server.local_addr(),
                requested = port,
                "Listening socket already bound, port change ignored"
            );
            return;
        }
        self.config.port = port;
    }

    pub fn set_keepalive_timeout(&mut self, timeout: Duration) {
        self.config.keepalive_timeout = timeout;
    }

    pub fn set_sweep_interval(&mut self, interval: Duration) {
        self.config.sweep_interval = interval;
    }

    /// The bound listening address, once the socket exists.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().map(ServerSocket::local_addr)
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        Arc::clone(&self.stats)
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            running: Arc::clone(&self.running),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Event Loop
    // ========================================================================

    /// Creates and registers the listening socket if it does not exist yet.
    ///
    /// Returns the bound address.
    pub fn listen(&mut self) -> Result<SocketAddr> {
        if let Some(server) = &self.server {
            return Ok(server.local_addr());
        }

        let addr = self.config.bind_address();
        let bind_error = |source| ManagerError::Bind {
            addr: addr.clone(),
            source,
        };

        let mut server = ServerSocket::bind(&addr, LISTENER_TOKEN).map_err(bind_error)?;
        server.register(self.poll.registry()).map_err(bind_error)?;

        let local_addr = server.local_addr();
        info!(addr = %local_addr, "Listening for connections");

        self.server = Some(server);
        self.last_sweep = Instant::now();
        Ok(local_addr)
    }

    /// Runs the loop until [`stop`](Self::stop) is called.
    ///
    /// A stop takes effect at the top of the next iteration.
    pub fn run(&mut self) -> Result<()> {
        self.running.store(true, Ordering::SeqCst);
        info!("Connection manager running");

        while self.running.load(Ordering::SeqCst) {
            if let Err(err) = self.check_connections() {
                self.running.store(false, Ordering::SeqCst);
                error!(error = %err, "Connection manager loop failed");
                return Err(err);
            }
        }

        info!("Connection manager stopped");
        Ok(())
    }

    /// Requests the loop to stop after the current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs one loop iteration.
    pub fn check_connections(&mut self) -> Result<()> {
        self.listen()?;

        let timeout = if self.backlog.is_empty() {
            self.time_until_sweep()
        } else {
            Duration::ZERO
        };

        if let Err(err) = self.poll.poll(&mut self.events, Some(timeout)) {
            if err.kind() != ErrorKind::Interrupted {
                return Err(ManagerError::ReadinessWait(err));
            }
        }

        for (token, readiness) in self.collect_ready() {
            match token {
                LISTENER_TOKEN => self.accept_connection(),
                WAKER_TOKEN => trace!("Readiness wait woken"),
                _ => self.service_connection(token, readiness),
            }
        }

        if self.last_sweep.elapsed() > self.config.sweep_interval {
            self.close_idle_connections();
            self.last_sweep = Instant::now();
        }

        Ok(())
    }

    fn time_until_sweep(&self) -> Duration {
        self.config
            .sweep_interval
            .saturating_sub(self.last_sweep.elapsed())
    }

    /// Merges this wait's events with the backlog, one entry per handle.
    fn collect_ready(&mut self) -> Vec<(Token, Readiness)> {
        let mut ready: Vec<(Token, Readiness)> = Vec::new();

        for event in self.events.iter() {
            ready.push((
                event.token(),
                Readiness {
                    // Errors and hang-ups surface through the read itself
                    readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                    writable: event.is_writable() || event.is_write_closed(),
                },
            ));
        }

        for token in self.backlog.drain(..) {
            match ready.iter_mut().find(|(ready_token, _)| *ready_token == token) {
                Some((_, readiness)) => readiness.readable = true,
                None => ready.push((
                    token,
                    Readiness {
                        readable: true,
                        writable: false,
                    },
                )),
            }
        }

        ready
    }

    fn accept_connection(&mut self) {
        let Some(server) = self.server.as_mut() else {
            return;
        };

        let (stream, peer_addr) = match server.accept() {
            Ok(Some(accepted)) => accepted,
            Ok(None) => return,
            Err(err) => {
                warn!(error = %err, "Failed to accept connection");
                return;
            }
        };

        // More connections may be queued behind this one
        self.backlog.push(LISTENER_TOKEN);

        let id = ConnectionId::new(self.next_id);
        let mut socket = match Socket::new(
            stream,
            id.token(),
            self.config.read_buffer_size,
            self.config.max_pending_bytes,
        ) {
            Ok(socket) => socket,
            Err(err) => {
                warn!(peer = %peer_addr, error = %err, "Failed to set up accepted socket");
                return;
            }
        };
        if let Err(err) = socket.register(self.poll.registry()) {
            warn!(peer = %peer_addr, error = %err, "Failed to register accepted socket");
            return;
        }

        self.next_id += 1;
        self.add_connection(Connection::new(id, socket));
    }

    fn service_connection(&mut self, token: Token, readiness: Readiness) {
        // Closed earlier in this iteration
        let Some(id) = self.registry.get(&token).map(Connection::id) else {
            return;
        };

        if readiness.writable {
            if let Err(err) = self.flush_connection(id) {
                debug!(id = %id, error = %err, "Connection flush failed");
                return;
            }
        }

        if readiness.readable {
            if let Err(err) = self.process_connection(id) {
                debug!(id = %id, error = %err, "Connection processing failed");
            }
        }
    }

    // ========================================================================
    // Connection I/O
    // ========================================================================

    /// Reads one chunk from a connection and fans it out to listeners.
    ///
    /// A closed or failed read closes the connection and returns
    /// [`ManagerError::ConnectionClosed`].
    pub fn process_connection(&mut self, id: ConnectionId) -> Result<()> {
        let token = id.token();
        let conn = self
            .registry
            .get_mut(&token)
            .ok_or(ManagerError::UnknownConnection(id))?;

        match conn.read() {
            Ok(Some(data)) => {
                let info = conn.info();
                self.stats.bytes_read(data.len());
                self.backlog.push(token);
                self.fire_data_received(&info, &data);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(reason) => {
                debug!(id = %id, %reason, "Connection read ended");
                self.close_connection(id);
                Err(ManagerError::ConnectionClosed { id, reason })
            }
        }
    }

    /// Sends `data` on the connection described by `conn`.
    pub fn send_to_connection(
        &mut self,
        conn: &ConnectionInfo,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        self.send_to_connection_id(conn.id, data)
    }

    /// Sends `data` on connection `id` and fires `data_sent`.
    ///
    /// A write failure closes the connection and returns
    /// [`ManagerError::ConnectionClosed`], as does a send that would hold
    /// more than `max_pending_bytes` unsent for a peer that stopped reading.
    /// `data_sent` fires once the payload is accepted, even if part of it is
    /// still queued.
    pub fn send_to_connection_id(&mut self, id: ConnectionId, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        let outcome = match self.registry.get_mut(&id.token()) {
            Some(conn) => write_and_sync(conn, self.poll.registry(), &data)
                .map(|written| (written, conn.info())),
            None => return Err(ManagerError::UnknownConnection(id)),
        };

        match outcome {
            Ok((written, info)) => {
                self.stats.bytes_written(written);
                trace!(id = %id, bytes = data.len(), written = written, "Sent data");
                self.fire_data_sent(&info, &data);
                Ok(())
            }
            Err(reason) => {
                debug!(id = %id, %reason, "Connection write failed");
                self.close_connection(id);
                Err(ManagerError::ConnectionClosed { id, reason })
            }
        }
    }

    /// Sends `data` to the connection carrying `identifier`.
    pub fn send_to_connection_identifier(
        &mut self,
        identifier: &str,
        data: impl Into<Bytes>,
    ) -> Result<()> {
        let id = self
            .find_id_by_identifier(identifier)
            .ok_or_else(|| ManagerError::UnknownIdentifier(identifier.to_string()))?;
        self.send_to_connection_id(id, data)
    }

    fn flush_connection(&mut self, id: ConnectionId) -> Result<()> {
        let outcome = match self.registry.get_mut(&id.token()) {
            Some(conn) => flush_and_sync(conn, self.poll.registry()),
            None => return Err(ManagerError::UnknownConnection(id)),
        };

        match outcome {
            Ok(written) => {
                self.stats.bytes_written(written);
                Ok(())
            }
            Err(reason) => {
                self.close_connection(id);
                Err(ManagerError::ConnectionClosed { id, reason })
            }
        }
    }

    // ========================================================================
    // Identity
    // ========================================================================

    /// Binds `identifier` to connection `id`.
    ///
    /// Empty identifiers and the connection's current identifier are
    /// ignored. Any other connection holding `identifier` is closed first.
    pub fn set_identifier(&mut self, id: ConnectionId, identifier: impl Into<String>) -> Result<()> {
        let identifier = identifier.into();
        let conn = self
            .registry
            .get(&id.token())
            .ok_or(ManagerError::UnknownConnection(id))?;

        if identifier.is_empty() || conn.identifier() == Some(identifier.as_str()) {
            return Ok(());
        }

        if let Some(holder) = self.find_id_by_identifier(&identifier) {
            info!(
                id = %holder,
                identifier = %identifier,
                "Identifier reassigned, closing previous holder"
            );
            self.close_connection(holder);
        }

        // A removal listener may have closed this connection too
        let conn = self
            .registry
            .get_mut(&id.token())
            .ok_or(ManagerError::UnknownConnection(id))?;
        debug!(id = %id, identifier = %identifier, "Identifier bound");
        conn.bind_identifier(identifier);
        Ok(())
    }

    fn find_id_by_identifier(&self, identifier: &str) -> Option<ConnectionId> {
        self.get_connection_by_identifier(identifier)
            .map(Connection::id)
    }

    // ========================================================================
    // Registry
    // ========================================================================

    fn add_connection(&mut self, conn: Connection) {
        let info = conn.info();
        self.registry.insert(conn.id().token(), conn);
        self.stats.connection_opened();
        info!(id = %info.id, peer = %info.peer_addr, "Connection accepted");
        self.fire_added(&info);
    }

    fn remove_connection(&mut self, id: ConnectionId) -> Option<Connection> {
        let token = id.token();
        let conn = self.registry.remove(&token)?;
        self.backlog.retain(|pending| *pending != token);
        self.stats.connection_closed();

        let info = conn.info();
        info!(id = %id, peer = %info.peer_addr, "Connection closed");
        self.fire_removed(&info);
        Some(conn)
    }

    /// Closes the connection's socket and unregisters it, firing `removed`.
    ///
    /// Returns false if no such connection is registered; closing twice is
    /// harmless and fires nothing the second time.
    pub fn close_connection(&mut self, id: ConnectionId) -> bool {
        let Some(conn) = self.registry.get_mut(&id.token()) else {
            trace!(id = %id, "Close of unregistered connection ignored");
            return false;
        };
        conn.close(self.poll.registry());
        self.remove_connection(id).is_some()
    }

    /// Closes connection `id`, failing if it does not exist.
    pub fn close_connection_by_id(&mut self, id: ConnectionId) -> Result<()> {
        if self.close_connection(id) {
            Ok(())
        } else {
            Err(ManagerError::UnknownConnection(id))
        }
    }

    /// Closes the connection carrying `identifier`, failing if none does.
    pub fn close_connection_by_identifier(&mut self, identifier: &str) -> Result<()> {
        let id = self
            .find_id_by_identifier(identifier)
            .ok_or_else(|| ManagerError::UnknownIdentifier(identifier.to_string()))?;
        self.close_connection_by_id(id)
    }

    /// Closes every connection idle for longer than the keepalive timeout.
    ///
    /// Returns the number of connections closed.
    pub fn close_idle_connections(&mut self) -> usize {
        let timeout = self.config.keepalive_timeout;
        let snapshot: Vec<ConnectionId> = self.registry.values().map(Connection::id).collect();

        let mut closed = 0;
        for id in snapshot {
            // Earlier closes fire listeners, which may touch or close others
            let idle = self
                .registry
                .get(&id.token())
                .is_some_and(|conn| conn.is_idle(Instant::now(), timeout));

            if idle && self.close_connection(id) {
                self.stats.connection_evicted();
                closed += 1;
            }
        }

        if closed > 0 {
            debug!(
                closed = closed,
                remaining = self.registry.len(),
                "Idle connections swept"
            );
        } else {
            trace!(remaining = self.registry.len(), "Idle sweep found nothing");
        }
        closed
    }

    pub fn get_connection(&self, id: ConnectionId) -> Option<&Connection> {
        self.registry.get(&id.token())
    }

    pub fn get_connection_by_identifier(&self, identifier: &str) -> Option<&Connection> {
        self.registry
            .values()
            .find(|conn| conn.identifier() == Some(identifier))
    }

    /// Point-in-time snapshot of the live connections, ordered by id.
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        let mut connections: Vec<ConnectionInfo> =
            self.registry.values().map(Connection::info).collect();
        connections.sort_by_key(|conn| conn.id);
        connections
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    /// Closes every connection (newest first) and the listening socket, and
    /// drops all listeners. Safe to call more than once.
    pub fn shutdown(&mut self) {
        loop {
            let Some(id) = self.registry.values().map(Connection::id).max() else {
                break;
            };
            self.close_connection(id);
        }

        if let Some(mut server) = self.server.take() {
            server.close(self.poll.registry());
            info!(addr = %server.local_addr(), "Listening socket closed");
        }

        self.backlog.clear();
        self.listeners.clear();
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    pub fn add_connection_listener(&mut self, listener: SharedListener) {
        self.listeners.push(listener);
    }

    /// Removes the first registration of `listener`.
    pub fn remove_connection_listener(&mut self, listener: &SharedListener) -> bool {
        self.listeners.remove(listener)
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }

    fn fire_added(&mut self, conn: &ConnectionInfo) {
        self.dispatch(ConnectionEvent::Added, conn.id, |listener, manager| {
            listener.on_connection_added(manager, conn)
        });
    }

    fn fire_removed(&mut self, conn: &ConnectionInfo) {
        self.dispatch(ConnectionEvent::Removed, conn.id, |listener, manager| {
            listener.on_connection_removed(manager, conn)
        });
    }

    fn fire_data_received(&mut self, conn: &ConnectionInfo, data: &Bytes) {
        self.dispatch(ConnectionEvent::DataReceived, conn.id, |listener, manager| {
            listener.on_connection_data_received(manager, conn, data)
        });
    }

    fn fire_data_sent(&mut self, conn: &ConnectionInfo, data: &Bytes) {
        self.dispatch(ConnectionEvent::DataSent, conn.id, |listener, manager| {
            listener.on_connection_data_sent(manager, conn, data)
        });
    }

    /// Delivers one event to the listeners registered when it was fired.
    fn dispatch<F>(&mut self, event: ConnectionEvent, id: ConnectionId, mut hook: F)
    where
        F: FnMut(&dyn ConnectionListener, &mut ConnectionManager) -> ListenerResult,
    {
        for (index, listener) in self.listeners.snapshot().iter().enumerate() {
            match hook(&**listener, &mut *self) {
                Ok(Propagation::Continue) => {}
                Ok(Propagation::Stop) => {
                    trace!(%event, id = %id, listener = index, "Event propagation stopped");
                    break;
                }
                Err(err) => {
                    self.stats.listener_failed();
                    warn!(
                        %event,
                        id = %id,
                        listener = index,
                        error = %err,
                        "Connection listener failed"
                    );
                }
            }
        }
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn write_and_sync(
    conn: &mut Connection,
    registry: &Registry,
    data: &[u8],
) -> std::result::Result<usize, CloseReason> {
    let written = conn.write(data)?;
    conn.sync_interest(registry)
        .map_err(|err| CloseReason::WriteFailed(err.kind()))?;
    Ok(written)
}

fn flush_and_sync(
    conn: &mut Connection,
    registry: &Registry,
) -> std::result::Result<usize, CloseReason> {
    let written = conn.flush()?;
    conn.sync_interest(registry)
        .map_err(|err| CloseReason::WriteFailed(err.kind()))?;
    Ok(written)
}
