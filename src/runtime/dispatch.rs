//! Message dispatch.
//!
//! Maps a message type to the handler that turns a request body into a
//! reply. The table is filled once at startup and only read afterwards.

use crate::protocols::MessageType;
use crate::runtime::connection::SessionState;
use crate::runtime::frame::{encode_frame_into, FrameError};
use bytes::BytesMut;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Failure raised by a handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The body could not be decoded as the expected payload.
    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

/// Response produced by a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub message_type: MessageType,
    pub body: Vec<u8>,
}

impl Reply {
    /// Append the reply as a wire frame.
    pub fn encode_into(&self, out: &mut BytesMut) -> Result<(), FrameError> {
        encode_frame_into(self.message_type.into(), &self.body, out)
    }
}

/// Handler signature: may update the session, must produce a reply.
pub type Handler =
    Box<dyn Fn(&mut SessionState, &[u8]) -> Result<Reply, HandlerError> + Send + Sync>;

/// Immutable-after-startup table of handlers keyed by message type.
#[derive(Default)]
pub struct DispatchTable {
    handlers: HashMap<MessageType, Handler>,
}

impl DispatchTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `message_type`, replacing any earlier one.
    pub fn register(&mut self, message_type: MessageType, handler: Handler) -> &mut Self {
        self.handlers.insert(message_type, handler);
        self
    }

    /// Look up the handler for a raw wire message type.
    ///
    /// Unknown numbers and known types without a handler both yield `None`.
    pub fn lookup(&self, message_type: i32) -> Option<&Handler> {
        let message_type = MessageType::try_from(message_type).ok()?;
        self.handlers.get(&message_type)
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.handlers.keys()).finish()
    }
}
