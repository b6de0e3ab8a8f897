//! Login client for the msgframe server.
//!
//! Opens one or more sessions, each sending a single login frame and
//! printing the decoded response.

use clap::Parser;
use msgframe::protocols::login::{message, LoginRequest, LoginResponse};
use msgframe::protocols::MessageType;
use msgframe::runtime::frame::{encode_frame, read_body, read_header};
use msgframe::runtime::{FrameError, HandlerError};
use rand::Rng;
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "msgframe-client")]
#[command(version = "0.1.0")]
#[command(about = "Send login requests to a msgframe server", long_about = None)]
struct Args {
    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:12345")]
    server: SocketAddr,

    /// Number of concurrent sessions
    #[arg(short = 'n', long, default_value_t = 1)]
    sessions: usize,

    /// Account name prefix; a random number is appended per session
    #[arg(short, long, default_value = "player")]
    account: String,

    /// Send the account name as given, without a random suffix
    #[arg(long)]
    exact: bool,

    /// Read timeout in seconds
    #[arg(long, default_value_t = 5)]
    timeout: u64,
}

#[derive(Debug, Error)]
enum ClientError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Payload(#[from] HandlerError),
    #[error("server closed the connection")]
    Closed,
    #[error("unexpected message type {0}")]
    UnexpectedType(i32),
}

/// Run one login session.
fn login(
    server: SocketAddr,
    account: String,
    timeout: Duration,
) -> Result<LoginResponse, ClientError> {
    let mut stream = TcpStream::connect(server)?;
    stream.set_read_timeout(Some(timeout))?;

    let body = message::encode(&LoginRequest { account })?;
    stream.write_all(&encode_frame(MessageType::C2sLogin.into(), &body)?)?;

    let header = read_header(&mut stream)?.ok_or(ClientError::Closed)?;
    if header.message_type != i32::from(MessageType::S2cLogin) {
        return Err(ClientError::UnexpectedType(header.message_type));
    }
    let body = read_body(&mut stream, header.validate()?)?;
    Ok(message::decode(&body)?)
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let timeout = Duration::from_secs(args.timeout);
    let mut rng = rand::thread_rng();
    let handles: Vec<_> = (0..args.sessions)
        .map(|session| {
            let account = if args.exact {
                args.account.clone()
            } else {
                format!("{}{}", args.account, rng.gen_range(0..=9999))
            };
            let server = args.server;
            thread::Builder::new()
                .name(format!("session-{session}"))
                .spawn(move || match login(server, account.clone(), timeout) {
                    Ok(response) => info!(
                        session,
                        account = %account,
                        result_code = response.result_code,
                        message = %response.message,
                        assigned_id = response.assigned_id,
                        "Login response"
                    ),
                    Err(e) => error!(session, account = %account, error = %e, "Login failed"),
                })
        })
        .collect::<Result<_, _>>()?;

    for handle in handles {
        let _ = handle.join();
    }

    Ok(())
}
