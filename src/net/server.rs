//! Listening Socket

use mio::net::{TcpListener, TcpStream};
use mio::{Interest, Registry, Token};
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use tracing::trace;

/// A non-blocking listening socket.
#[derive(Debug)]
pub struct ServerSocket {
    listener: TcpListener,
    token: Token,
    local_addr: SocketAddr,
    closed: bool,
}

impl ServerSocket {
    /// Binds a listening socket to `addr` (e.g. `"0.0.0.0:8000"`).
    ///
    /// The first resolved address is used.
    pub fn bind(addr: &str, token: Token) -> io::Result<Self> {
        let addr = addr.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(ErrorKind::InvalidInput, format!("{} resolved to no address", addr))
        })?;

        let listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            listener,
            token,
            local_addr,
            closed: false,
        })
    }

    /// Registers the listener for read readiness (pending accepts).
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.listener, self.token, Interest::READABLE)
    }

    /// Accepts one pending connection.
    ///
    /// Returns `Ok(None)` when no connection is waiting.
    pub fn accept(&mut self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        loop {
            match self.listener.accept() {
                Ok(accepted) => return Ok(Some(accepted)),
                Err(err) if err.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }

    /// Stops watching the listener. The port is released on drop.
    pub fn close(&mut self, registry: &Registry) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(err) = registry.deregister(&mut self.listener) {
            trace!(addr = %self.local_addr, error = %err, "Deregister failed");
        }
    }

    /// The readiness handle
    pub fn handle(&self) -> Token {
        self.token
    }

    /// The bound address (resolves port 0 to the assigned port)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
