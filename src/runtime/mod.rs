//! Connection runtimes.
//!
//! Two interchangeable backends serve the same dispatch table:
//! - `mio`: single-threaded readiness reactor (epoll on Linux, kqueue on macOS)
//! - `tasks`: one tokio task per connection
//!
//! Both share common abstractions:
//! - `frame`: wire framing
//! - `ConnectionRegistry`: live connections and their session state
//! - `DispatchTable`: message type to handler mapping

pub mod connection;
pub mod dispatch;
pub mod frame;
pub mod mio;
pub mod tasks;

pub use connection::{Connection, ConnectionError, ConnectionRegistry, RegistryError, SessionState};
pub use dispatch::{DispatchTable, Handler, HandlerError, Reply};
pub use frame::{Frame, FrameDecoder, FrameError, FrameHeader, HEADER_LEN, MAX_BODY, READ_CHUNK};

use crate::config::{Config, RuntimeType};
use crate::protocols;
use bytes::BytesMut;
use std::net::SocketAddr;

/// Run the server with the configured backend until it fails.
pub fn run(config: Config) -> std::io::Result<()> {
    let table = protocols::dispatch_table(&config.login);

    match config.runtime {
        RuntimeType::Mio => mio::Reactor::bind(&config, table)?.run(),
        RuntimeType::Tasks => tasks::run(config, table),
    }
}

/// Dispatch one complete frame and append the encoded reply to `out`.
///
/// Shared by both runtimes; the handler sees the connection's session.
pub(crate) fn serve_frame(
    table: &DispatchTable,
    session: &mut SessionState,
    frame: &Frame,
    out: &mut BytesMut,
) -> Result<(), ConnectionError> {
    let handler = table
        .lookup(frame.message_type)
        .ok_or(ConnectionError::UnknownMessageType(frame.message_type))?;
    let reply = handler(session, &frame.body[..])?;
    reply.encode_into(out)?;
    Ok(())
}

/// Log a torn-down connection, naming the account if it had logged in.
pub(crate) fn log_disconnect(
    conn_id: usize,
    peer: SocketAddr,
    session: &SessionState,
    error: &ConnectionError,
) {
    match (session.account(), error.is_clean()) {
        (Some(account), true) => tracing::debug!(conn_id, %peer, account, "Connection closed"),
        (None, true) => tracing::debug!(conn_id, %peer, "Connection closed"),
        (Some(account), false) => {
            tracing::debug!(conn_id, %peer, account, error = %error, "Connection dropped")
        }
        (None, false) => tracing::debug!(conn_id, %peer, error = %error, "Connection dropped"),
    }
}
