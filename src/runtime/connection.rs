//! Connection registry.
//!
//! Every accepted connection gets a slab slot whose index is its handle.
//! The slot owns whatever I/O resources the runtime attaches to it, so
//! removing the entry and releasing the socket happen together.

use crate::runtime::dispatch::HandlerError;
use crate::runtime::frame::FrameError;
use slab::Slab;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Reasons a connection is torn down.
///
/// Every variant is local to its connection and ends it; none is retried.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Peer closed between frames.
    #[error("peer closed")]
    PeerClosed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("unknown message type: {0}")]
    UnknownMessageType(i32),
    #[error(transparent)]
    Handler(#[from] HandlerError),
    #[error("socket fault: {0}")]
    Socket(#[from] io::Error),
}

impl ConnectionError {
    /// True for an ordinary close that should not be reported as a failure.
    pub fn is_clean(&self) -> bool {
        matches!(self, ConnectionError::PeerClosed)
    }
}

/// Application-level identity of a connection.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No login yet.
    #[default]
    Pending,
    /// Login succeeded for this account.
    Identified(String),
}

impl SessionState {
    pub fn account(&self) -> Option<&str> {
        match self {
            SessionState::Pending => None,
            SessionState::Identified(account) => Some(account),
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Pending => f.write_str("pending"),
            SessionState::Identified(account) => write!(f, "identified({account})"),
        }
    }
}

/// A single client connection.
///
/// `io` is the runtime-specific attachment (socket, buffers). Runtimes that
/// keep the socket elsewhere attach `()`.
#[derive(Debug)]
pub struct Connection<T> {
    /// Remote address, kept for diagnostics.
    pub peer: SocketAddr,
    /// Current session state.
    pub session: SessionState,
    pub io: T,
}

impl<T> Connection<T> {
    /// Create a new connection in the `Pending` state.
    pub fn new(peer: SocketAddr, io: T) -> Self {
        Self {
            peer,
            session: SessionState::Pending,
            io,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection registry is at capacity ({0})")]
    AtCapacity(usize),
}

/// Registry of live connections using slab allocation.
///
/// Provides O(1) insert, lookup, and remove operations. Handles are reused
/// only after the previous holder was removed.
pub struct ConnectionRegistry<T> {
    connections: Slab<Connection<T>>,
    max_connections: usize,
}

impl<T> ConnectionRegistry<T> {
    /// Create a new registry with specified maximum capacity.
    pub fn new(max_connections: usize) -> Self {
        Self {
            connections: Slab::with_capacity(max_connections.min(1024)),
            max_connections,
        }
    }

    /// Register a connection and return its handle.
    pub fn register(&mut self, conn: Connection<T>) -> Result<usize, RegistryError> {
        if self.connections.len() >= self.max_connections {
            return Err(RegistryError::AtCapacity(self.max_connections));
        }
        Ok(self.connections.insert(conn))
    }

    /// Transition the session state of a live connection.
    ///
    /// Returns `false` if the handle is not registered.
    pub fn set_state(&mut self, id: usize, state: SessionState) -> bool {
        match self.connections.get_mut(id) {
            Some(conn) => {
                conn.session = state;
                true
            }
            None => false,
        }
    }

    /// Get an immutable reference to a connection.
    pub fn get(&self, id: usize) -> Option<&Connection<T>> {
        self.connections.get(id)
    }

    /// Get a mutable reference to a connection.
    pub fn get_mut(&mut self, id: usize) -> Option<&mut Connection<T>> {
        self.connections.get_mut(id)
    }

    /// Remove a connection, handing back the entry (and its session state).
    ///
    /// Removing an absent handle is a no-op returning `None`.
    pub fn remove(&mut self, id: usize) -> Option<Connection<T>> {
        self.connections.try_remove(id)
    }

    /// Check if a connection exists.
    pub fn contains(&self, id: usize) -> bool {
        self.connections.contains(id)
    }

    /// Number of active connections.
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Check if there are no connections.
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Maximum number of connections allowed.
    pub fn capacity(&self) -> usize {
        self.max_connections
    }

    /// Iterate over all connections.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<T>)> {
        self.connections.iter()
    }

    /// Remove every connection.
    pub fn drain(&mut self) -> impl Iterator<Item = Connection<T>> + '_ {
        self.connections.drain()
    }
}
