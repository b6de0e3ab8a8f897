//! mio event loop implementation.
//!
//! Readiness-based model: poll tells us when sockets are ready,
//! then we perform non-blocking read/write syscalls.
//!
//! ## Framing across notifications
//!
//! A readable notification may carry part of a frame, exactly one frame, or
//! several. Each connection keeps a `FrameDecoder`; the socket is drained
//! until `WouldBlock` and every frame completed along the way is dispatched
//! in arrival order.
//!
//! ## Output queue
//!
//! Replies are appended to a per-connection outbound buffer and written
//! until `WouldBlock`. Leftover bytes switch the connection to
//! `READABLE | WRITABLE` until the buffer drains.

use crate::config::Config;
use crate::runtime::connection::{Connection, ConnectionError, ConnectionRegistry, SessionState};
use crate::runtime::dispatch::DispatchTable;
use crate::runtime::frame::{FrameDecoder, READ_CHUNK};
use crate::runtime::{log_disconnect, serve_frame};
use bytes::{Buf, BytesMut};
use mio::event::Event;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

const LISTENER_TOKEN: Token = Token(usize::MAX);
const WAKER_TOKEN: Token = Token(usize::MAX - 1);

/// Per-connection I/O state owned by the registry entry.
#[derive(Debug)]
pub struct MioConnection {
    stream: TcpStream,
    decoder: FrameDecoder,
    outbound: BytesMut,
    /// Whether WRITABLE interest is currently registered.
    write_interest: bool,
}

impl MioConnection {
    fn new(stream: TcpStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
            write_interest: false,
        }
    }
}

/// Counters kept by the reactor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactorStats {
    /// Connections accepted and registered.
    pub accepted: u64,
    /// Connections closed by the peer between frames.
    pub closed: u64,
    /// Connections torn down because of an error.
    pub dropped: u64,
    /// Frames dispatched to a handler successfully.
    pub frames: u64,
}

/// Stops a running reactor from another thread.
#[derive(Clone)]
pub struct ShutdownHandle {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.flag.store(true, Ordering::Release);
        self.waker.wake()
    }
}

/// Single-threaded reactor serving one listener.
pub struct Reactor {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    connections: ConnectionRegistry<MioConnection>,
    table: DispatchTable,
    stats: ReactorStats,
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Reactor {
    /// Bind the listener and register it for readability.
    pub fn bind(config: &Config, table: DispatchTable) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let mut listener = TcpListener::from_std(create_listener(config.listen)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        Ok(Self {
            poll,
            events: Events::with_capacity(config.events_capacity),
            listener,
            local_addr,
            connections: ConnectionRegistry::new(config.max_connections),
            table,
            stats: ReactorStats::default(),
            shutdown: Arc::new(AtomicBool::new(false)),
            waker,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            flag: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn stats(&self) -> ReactorStats {
        self.stats
    }

    /// Number of live connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Session state of every live connection.
    pub fn sessions(&self) -> impl Iterator<Item = (usize, &SessionState)> {
        self.connections.iter().map(|(id, conn)| (id, &conn.session))
    }

    /// Serve until a `ShutdownHandle` fires, then close every connection.
    pub fn run(&mut self) -> io::Result<()> {
        info!(
            addr = %self.local_addr,
            max_connections = self.connections.capacity(),
            handlers = self.table.len(),
            "Reactor listening"
        );

        while !self.shutdown.load(Ordering::Acquire) {
            self.turn(None)?;
        }

        self.close_all();
        info!(stats = ?self.stats, "Reactor stopped");
        Ok(())
    }

    /// Wait for one batch of readiness events and handle them in order.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        for event in self.events.iter() {
            match event.token() {
                LISTENER_TOKEN => accept_connections(
                    &self.listener,
                    self.poll.registry(),
                    &mut self.connections,
                    &mut self.stats,
                ),
                WAKER_TOKEN => trace!("Reactor woken"),
                Token(conn_id) => {
                    if let Err(e) = handle_connection_event(
                        conn_id,
                        event,
                        self.poll.registry(),
                        &mut self.connections,
                        &self.table,
                        &mut self.stats,
                    ) {
                        close_connection(
                            self.poll.registry(),
                            &mut self.connections,
                            &mut self.stats,
                            conn_id,
                            &e,
                        );
                    }
                }
            }
        }

        Ok(())
    }

    fn close_all(&mut self) {
        let registry = self.poll.registry();
        for mut conn in self.connections.drain() {
            let _ = registry.deregister(&mut conn.io.stream);
        }
    }
}

fn accept_connections(
    listener: &TcpListener,
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
    stats: &mut ReactorStats,
) {
    loop {
        match listener.accept() {
            Ok((stream, peer)) => {
                // Accepted mio streams are already non-blocking.
                let conn = Connection::new(peer, MioConnection::new(stream));
                let conn_id = match connections.register(conn) {
                    Ok(id) => id,
                    Err(e) => {
                        warn!(%peer, error = %e, "Rejecting connection");
                        continue;
                    }
                };

                let registered = match connections.get_mut(conn_id) {
                    Some(conn) => {
                        registry.register(&mut conn.io.stream, Token(conn_id), Interest::READABLE)
                    }
                    None => continue,
                };
                if let Err(e) = registered {
                    error!(conn_id, %peer, error = %e, "Failed to register connection");
                    connections.remove(conn_id);
                    continue;
                }

                stats.accepted += 1;
                debug!(conn_id, %peer, "Accepted connection");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(error = %e, "Accept error");
                break;
            }
        }
    }
}

fn handle_connection_event(
    conn_id: usize,
    event: &Event,
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
    table: &DispatchTable,
    stats: &mut ReactorStats,
) -> Result<(), ConnectionError> {
    let conn = match connections.get_mut(conn_id) {
        Some(conn) => conn,
        // Already closed earlier in this batch
        None => return Ok(()),
    };

    if event.is_readable() || event.is_read_closed() || event.is_error() {
        handle_readable(conn_id, conn, registry, table, stats)?;
    }

    if event.is_writable() {
        flush(conn_id, conn, registry)?;
    }

    Ok(())
}

fn handle_readable(
    conn_id: usize,
    conn: &mut Connection<MioConnection>,
    registry: &Registry,
    table: &DispatchTable,
    stats: &mut ReactorStats,
) -> Result<(), ConnectionError> {
    let mut chunk = [0u8; READ_CHUNK];
    let mut eof = false;

    loop {
        match conn.io.stream.read(&mut chunk) {
            Ok(0) => {
                eof = true;
                break;
            }
            Ok(n) => {
                conn.io.decoder.extend(&chunk[..n]);
                // Dispatch as frames complete so the decoder holds at most one.
                while let Some(frame) = conn.io.decoder.next_frame()? {
                    trace!(
                        conn_id,
                        message_type = frame.message_type,
                        body_len = frame.body.len(),
                        "Frame received"
                    );
                    serve_frame(table, &mut conn.session, &frame, &mut conn.io.outbound)?;
                    stats.frames += 1;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    flush(conn_id, conn, registry)?;

    if eof {
        conn.io.decoder.finish()?;
        return Err(ConnectionError::PeerClosed);
    }
    Ok(())
}

/// Write queued replies until done or the socket would block, and keep the
/// WRITABLE interest in step with whether anything is left.
fn flush(
    conn_id: usize,
    conn: &mut Connection<MioConnection>,
    registry: &Registry,
) -> io::Result<()> {
    let state = &mut conn.io;

    while !state.outbound.is_empty() {
        match state.stream.write(&state.outbound) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => state.outbound.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }

    let pending = !state.outbound.is_empty();
    if pending != state.write_interest {
        let interest = if pending {
            Interest::READABLE | Interest::WRITABLE
        } else {
            Interest::READABLE
        };
        registry.reregister(&mut state.stream, Token(conn_id), interest)?;
        state.write_interest = pending;
        trace!(conn_id, pending = state.outbound.len(), "Write interest updated");
    }

    Ok(())
}

/// Remove the registry entry and close its socket.
///
/// Closing a handle that is already gone is a no-op.
fn close_connection(
    registry: &Registry,
    connections: &mut ConnectionRegistry<MioConnection>,
    stats: &mut ReactorStats,
    conn_id: usize,
    reason: &ConnectionError,
) {
    if let Some(mut conn) = connections.remove(conn_id) {
        let _ = registry.deregister(&mut conn.io.stream);
        if reason.is_clean() {
            stats.closed += 1;
        } else {
            stats.dropped += 1;
        }
        log_disconnect(conn_id, conn.peer, &conn.session, reason);
    }
}

/// Create a non-blocking TCP listener.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
