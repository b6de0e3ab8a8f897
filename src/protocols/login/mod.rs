//! Login protocol.
//!
//! A client identifies itself with an account name; the server marks the
//! connection as identified and answers with a greeting and an id.
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  C2sLogin { account }
//! Response: S2cLogin { result_code: 999, message: "<greeting><account>", assigned_id }
//! ```
//!
//! Bodies are bincode-encoded (standard configuration).

pub mod handler;
pub mod message;

pub use handler::{handle_login, handler, LOGIN_OK};
pub use message::{LoginRequest, LoginResponse};
