//! Login payloads.

use bincode::{Decode, Encode};

use crate::runtime::{HandlerError, MAX_BODY};

/// Decode budget. Integers count at full width against the limit, not at
/// their varint size, so leave headroom over the largest body.
const DECODE_LIMIT: usize = 2 * MAX_BODY;

/// Body of a `C2sLogin` frame.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LoginRequest {
    pub account: String,
}

/// Body of an `S2cLogin` frame.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct LoginResponse {
    pub result_code: i32,
    pub message: String,
    pub assigned_id: i64,
}

/// Encode a payload with the standard bincode configuration.
pub fn encode<T: Encode>(value: &T) -> Result<Vec<u8>, HandlerError> {
    bincode::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| HandlerError::MalformedPayload(e.to_string()))
}

/// Decode a payload, rejecting trailing bytes.
///
/// Decoding is capped at `DECODE_LIMIT` bytes, so a length prefix larger
/// than any legal body fails instead of allocating.
pub fn decode<T: Decode<()>>(body: &[u8]) -> Result<T, HandlerError> {
    let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
    let (value, consumed) = bincode::decode_from_slice(body, config)
        .map_err(|e| HandlerError::MalformedPayload(e.to_string()))?;
    if consumed != body.len() {
        return Err(HandlerError::MalformedPayload(format!(
            "{} trailing bytes",
            body.len() - consumed
        )));
    }
    Ok(value)
}
