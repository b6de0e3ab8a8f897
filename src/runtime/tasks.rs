//! Task-per-connection runtime.
//!
//! Each accepted connection gets its own tokio task that reads frames with
//! awaited reads, one at a time. The connection registry is shared between
//! tasks behind a single mutex; the lock is only taken for registration,
//! handler invocation and removal, never across an await.

use crate::config::Config;
use crate::runtime::connection::{Connection, ConnectionError, ConnectionRegistry, SessionState};
use crate::runtime::dispatch::DispatchTable;
use crate::runtime::frame::{read_body_async, read_header_async, Frame};
use crate::runtime::{log_disconnect, serve_frame};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, trace, warn};

/// Registry shared by all connection tasks.
pub type SharedRegistry = Arc<Mutex<ConnectionRegistry<()>>>;

fn lock(registry: &Mutex<ConnectionRegistry<()>>) -> MutexGuard<'_, ConnectionRegistry<()>> {
    // Handlers do not panic while holding the lock; a poisoned registry is
    // still structurally valid.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Run the task runtime on a fresh multi-threaded tokio runtime.
pub fn run(config: Config, table: DispatchTable) -> io::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let server = TaskServer::bind(&config, table).await?;
        server.serve().await
    })
}

/// Listener plus the state shared with connection tasks.
pub struct TaskServer {
    listener: TcpListener,
    table: Arc<DispatchTable>,
    registry: SharedRegistry,
    connection_limit: Arc<Semaphore>,
}

impl TaskServer {
    pub async fn bind(config: &Config, table: DispatchTable) -> io::Result<Self> {
        let listener = TcpListener::bind(config.listen).await?;
        Ok(Self {
            listener,
            table: Arc::new(table),
            registry: Arc::new(Mutex::new(ConnectionRegistry::new(config.max_connections))),
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> SharedRegistry {
        Arc::clone(&self.registry)
    }

    /// Accept connections forever.
    pub async fn serve(self) -> io::Result<()> {
        info!(addr = %self.local_addr()?, "Task server listening");

        loop {
            // Wait for a connection slot
            let permit = Arc::clone(&self.connection_limit)
                .acquire_owned()
                .await
                .map_err(io::Error::other)?;

            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let registered = lock(&self.registry).register(Connection::new(peer, ()));
                    let conn_id = match registered {
                        Ok(id) => id,
                        Err(e) => {
                            warn!(%peer, error = %e, "Rejecting connection");
                            continue;
                        }
                    };
                    debug!(conn_id, %peer, "Accepted connection");

                    let guard = ConnectionGuard::new(Arc::clone(&self.registry), conn_id, peer);
                    let table = Arc::clone(&self.table);
                    tokio::spawn(async move {
                        serve_connection(stream, guard, table).await;
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Removes the registry entry when the connection task ends, however it ends.
struct ConnectionGuard {
    registry: SharedRegistry,
    conn_id: usize,
    peer: SocketAddr,
}

impl ConnectionGuard {
    fn new(registry: SharedRegistry, conn_id: usize, peer: SocketAddr) -> Self {
        Self {
            registry,
            conn_id,
            peer,
        }
    }

    /// Remove the entry and log why. Safe to call more than once.
    fn disconnect(&self, reason: &ConnectionError) {
        let removed = lock(&self.registry).remove(self.conn_id);
        if let Some(conn) = removed {
            log_disconnect(self.conn_id, self.peer, &conn.session, reason);
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        // Usually a no-op: the task already disconnected with a reason.
        let reason = ConnectionError::Socket(io::ErrorKind::ConnectionAborted.into());
        self.disconnect(&reason);
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    guard: ConnectionGuard,
    table: Arc<DispatchTable>,
) {
    if let Err(e) = connection_loop(&mut stream, &guard, &table).await {
        guard.disconnect(&e);
    }
    // Socket closes when `stream` drops, right after the entry is removed.
}

/// Serve frames until the connection ends. Always returns the reason.
async fn connection_loop(
    stream: &mut TcpStream,
    guard: &ConnectionGuard,
    table: &DispatchTable,
) -> Result<(), ConnectionError> {
    let mut out = BytesMut::new();

    loop {
        let header = match read_header_async(stream).await? {
            Some(header) => header,
            None => return Err(ConnectionError::PeerClosed),
        };
        let body_len = header.validate()?;
        let body = read_body_async(stream, body_len).await?;
        let frame = Frame {
            message_type: header.message_type,
            body: body.into(),
        };
        trace!(
            conn_id = guard.conn_id,
            message_type = frame.message_type,
            body_len,
            "Frame received"
        );

        out.clear();
        {
            let mut registry = lock(&guard.registry);
            let session: &mut SessionState = match registry.get_mut(guard.conn_id) {
                Some(conn) => &mut conn.session,
                None => return Err(ConnectionError::Socket(io::ErrorKind::NotConnected.into())),
            };
            serve_frame(table, session, &frame, &mut out)?;
        }

        stream.write_all(&out).await?;
    }
}
