//! msgframe: a length-prefixed, type-tagged binary message server.
//!
//! Clients send frames of `message_type:i32 | body_len:i32 | body`; the
//! server dispatches each complete frame to the handler registered for its
//! type and writes the handler's reply back as a frame.
//!
//! - `runtime`: framing, connection registry, dispatch and the two runtimes
//! - `protocols`: message types and their handlers
//! - `config`: CLI and TOML configuration

pub mod config;
pub mod protocols;
pub mod runtime;
