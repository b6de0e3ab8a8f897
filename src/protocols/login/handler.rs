//! Login handler.

use super::message::{decode, encode, LoginRequest, LoginResponse};
use crate::config::LoginConfig;
use crate::protocols::MessageType;
use crate::runtime::{Handler, HandlerError, Reply, SessionState};
use tracing::debug;

/// Result code of a successful login.
pub const LOGIN_OK: i32 = 999;

/// Build the boxed login handler for the dispatch table.
pub fn handler(config: LoginConfig) -> Handler {
    Box::new(move |session, body| handle_login(&config, session, body))
}

/// Identify the session as the requested account and greet it.
pub fn handle_login(
    config: &LoginConfig,
    session: &mut SessionState,
    body: &[u8],
) -> Result<Reply, HandlerError> {
    let request: LoginRequest = decode(body)?;

    debug!(account = %request.account, previous = %session, "Login");

    let response = LoginResponse {
        result_code: LOGIN_OK,
        message: format!("{}{}", config.greeting, request.account),
        assigned_id: config.assigned_id,
    };
    *session = SessionState::Identified(request.account);

    Ok(Reply {
        message_type: MessageType::S2cLogin,
        body: encode(&response)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn login_body(account: &str) -> Vec<u8> {
        encode(&LoginRequest {
            account: account.to_string(),
        })
        .unwrap()
    }

    #[test]
    fn test_login_identifies_session() {
        let config = LoginConfig::default();
        let mut session = SessionState::Pending;

        let reply = handle_login(&config, &mut session, &login_body("alice")).unwrap();
        assert_eq!(reply.message_type, MessageType::S2cLogin);
        assert_eq!(session, SessionState::Identified("alice".to_string()));

        let response: LoginResponse = decode(&reply.body).unwrap();
        assert_eq!(response.result_code, LOGIN_OK);
        assert_eq!(response.message, "Hey you!alice");
        assert_eq!(response.assigned_id, 123_456);
    }

    #[test]
    fn test_login_uses_configured_values() {
        let config = LoginConfig {
            assigned_id: 7,
            greeting: "hello ".to_string(),
        };
        let mut session = SessionState::Identified("old".to_string());

        let reply = handler(config)(&mut session, login_body("bob").as_slice()).unwrap();
        let response: LoginResponse = decode(&reply.body).unwrap();
        assert_eq!(response.message, "hello bob");
        assert_eq!(response.assigned_id, 7);
        assert_eq!(session.account(), Some("bob"));
    }

    #[test]
    fn test_malformed_body_leaves_session_alone() {
        let mut session = SessionState::Pending;
        let result = handle_login(&LoginConfig::default(), &mut session, &[0xff, 0xff]);
        assert!(matches!(result, Err(HandlerError::MalformedPayload(_))));
        assert_eq!(session, SessionState::Pending);
    }
}
