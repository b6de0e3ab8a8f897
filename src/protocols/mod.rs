//! Message types and their handlers.
//!
//! The set of message types is closed: both peers share this enumeration
//! and a number outside it is never dispatched.
//!
//! ## Protocols
//! - `login`: account identification, answered with a greeting and an id

pub mod login;

use crate::config::LoginConfig;
use crate::runtime::DispatchTable;

/// Wire message type identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum MessageType {
    /// Client to server: login request.
    C2sLogin = 1,
    /// Server to client: login response.
    S2cLogin = 2,
}

impl TryFrom<i32> for MessageType {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(MessageType::C2sLogin),
            2 => Ok(MessageType::S2cLogin),
            other => Err(other),
        }
    }
}

impl From<MessageType> for i32 {
    fn from(message_type: MessageType) -> Self {
        message_type as i32
    }
}

/// Build the dispatch table served by every runtime.
pub fn dispatch_table(login: &LoginConfig) -> DispatchTable {
    let mut table = DispatchTable::new();
    table.register(MessageType::C2sLogin, login::handler(login.clone()));
    table
}
