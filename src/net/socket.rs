//! Connected Socket
//!
//! [`Socket`] owns one accepted, non-blocking TCP stream. Reads return exactly
//! one chunk per call. Writes push as much as the kernel accepts right away
//! and hold the remainder until the stream becomes writable again, at which
//! point the manager calls [`Socket::flush_pending`]. The held remainder is
//! capped; a send that would grow it past the cap fails with
//! [`ErrorKind::OutOfMemory`].
//!
//! ## Read Outcomes
//!
//! ```text
//! read() ──┬── Data(bytes)   one chunk, at most `chunk_size` bytes
//!          ├── WouldBlock    nothing buffered (spurious wakeup)
//!          ├── Closed        zero-length read, peer is gone
//!          └── Failed(err)   any other I/O error
//! ```

use bytes::{Buf, Bytes, BytesMut};
use mio::net::TcpStream;
use mio::{Interest, Registry, Token};
use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr};
use tracing::{debug, trace};

/// Result of a single read from a [`Socket`].
#[derive(Debug)]
pub enum ReadOutcome {
    /// One chunk of data
    Data(Bytes),
    /// No data is available right now
    WouldBlock,
    /// The stream reached end-of-file
    Closed,
    /// The read failed
    Failed(io::Error),
}

/// One connected byte stream.
pub struct Socket {
    /// The underlying non-blocking stream
    stream: TcpStream,

    /// Readiness handle this socket is registered under
    token: Token,

    /// Remote address
    peer_addr: SocketAddr,

    /// Local address
    local_addr: SocketAddr,

    /// Interest currently registered with the poller
    interest: Interest,

    /// Maximum bytes returned by one read
    chunk_size: usize,

    /// Bytes accepted by `send` but not yet written to the stream
    pending: BytesMut,

    /// Upper bound on `pending`
    max_pending: usize,

    closed: bool,
}

impl Socket {
    /// Wraps an accepted stream.
    ///
    /// # Arguments
    ///
    /// * `stream` - The accepted, non-blocking stream
    /// * `token` - The readiness handle to register the stream under
    /// * `chunk_size` - Maximum number of bytes returned by one `read()`
    /// * `max_pending` - Maximum number of unsent bytes held for later
    pub fn new(
        stream: TcpStream,
        token: Token,
        chunk_size: usize,
        max_pending: usize,
    ) -> io::Result<Self> {
        let peer_addr = stream.peer_addr()?;
        let local_addr = stream.local_addr()?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            token,
            peer_addr,
            local_addr,
            interest: Interest::READABLE,
            chunk_size: chunk_size.max(1),
            pending: BytesMut::new(),
            max_pending,
            closed: false,
        })
    }

    /// Registers the stream with the poller for read readiness.
    pub fn register(&mut self, registry: &Registry) -> io::Result<()> {
        registry.register(&mut self.stream, self.token, self.interest)
    }

    /// Performs one read of at most `chunk_size` bytes.
    pub fn read(&mut self) -> ReadOutcome {
        if self.closed {
            return ReadOutcome::Closed;
        }

        let mut buf = BytesMut::zeroed(self.chunk_size);
        loop {
            match self.stream.read(&mut buf[..]) {
                Ok(0) => return ReadOutcome::Closed,
                Ok(n) => {
                    buf.truncate(n);
                    trace!(peer = %self.peer_addr, bytes = n, "Read chunk");
                    return ReadOutcome::Data(buf.freeze());
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return ReadOutcome::WouldBlock,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return ReadOutcome::Failed(err),
            }
        }
    }

    /// Writes `data`, keeping whatever the stream does not accept now.
    ///
    /// Returns the number of bytes written immediately. Data queued behind
    /// earlier pending bytes is never written out of order.
    ///
    /// # Errors
    ///
    /// Fails with [`ErrorKind::OutOfMemory`] if the unsent bytes would exceed
    /// `max_pending`; the peer has stopped reading.
    pub fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        if self.closed {
            return Err(io::Error::from(ErrorKind::NotConnected));
        }
        if data.is_empty() {
            return Ok(0);
        }
        if !self.pending.is_empty() {
            self.check_pending_room(data.len())?;
            self.pending.extend_from_slice(data);
            return Ok(0);
        }

        let written = self.write_some(data)?;
        if written < data.len() {
            self.check_pending_room(data.len() - written)?;
            self.pending.extend_from_slice(&data[written..]);
            trace!(
                peer = %self.peer_addr,
                queued = data.len() - written,
                "Write would block, queued remainder"
            );
        }
        Ok(written)
    }

    /// Writes as much pending data as the stream accepts.
    pub fn flush_pending(&mut self) -> io::Result<usize> {
        if self.pending.is_empty() || self.closed {
            return Ok(0);
        }

        let mut pending = std::mem::take(&mut self.pending);
        let written = self.write_some(&pending)?;
        pending.advance(written);
        self.pending = pending;
        Ok(written)
    }

    fn check_pending_room(&self, extra: usize) -> io::Result<()> {
        if self.pending.len().saturating_add(extra) > self.max_pending {
            debug!(
                peer = %self.peer_addr,
                pending = self.pending.len(),
                extra = extra,
                limit = self.max_pending,
                "Send buffer limit exceeded"
            );
            return Err(io::Error::new(
                ErrorKind::OutOfMemory,
                "send buffer limit exceeded",
            ));
        }
        Ok(())
    }

    /// Number of bytes waiting for write readiness
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn write_some(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut written = 0;
        while written < data.len() {
            match self.stream.write(&data[written..]) {
                Ok(0) => return Err(io::Error::from(ErrorKind::WriteZero)),
                Ok(n) => written += n,
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(written)
    }

    /// Returns true while written-but-unsent bytes are held.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Re-registers the stream if write interest must be turned on or off.
    pub fn sync_interest(&mut self, registry: &Registry) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }

        let wanted = if self.pending.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };

        if wanted != self.interest {
            registry.reregister(&mut self.stream, self.token, wanted)?;
            self.interest = wanted;
        }
        Ok(())
    }

    /// Deregisters and shuts down the stream. Safe to call more than once.
    ///
    /// The descriptor itself is released when the socket is dropped.
    pub fn close(&mut self, registry: &Registry) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.pending.clear();

        // Either call can fail once the peer has reset the stream.
        if let Err(err) = registry.deregister(&mut self.stream) {
            trace!(peer = %self.peer_addr, error = %err, "Deregister failed");
        }
        if let Err(err) = self.stream.shutdown(Shutdown::Both) {
            trace!(peer = %self.peer_addr, error = %err, "Shutdown failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// The readiness handle
    pub fn handle(&self) -> Token {
        self.token
    }

    /// Remote IP address
    pub fn ip(&self) -> IpAddr {
        self.peer_addr.ip()
    }

    /// Remote port
    pub fn port(&self) -> u16 {
        self.peer_addr.port()
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl fmt::Display for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.peer_addr)
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("token", &self.token)
            .field("peer_addr", &self.peer_addr)
            .field("pending", &self.pending.len())
            .field("closed", &self.closed)
            .finish()
    }
}
