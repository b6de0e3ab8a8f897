//! End-to-end tests driving a real reactor over loopback sockets.
//!
//! The reactor is turned on the test thread so every scenario is
//! deterministic: clients write into kernel buffers, the test turns the
//! reactor until the expected state is reached, then clients read.

use msgframe::config::{Config, LoginConfig};
use msgframe::protocols::login::{message, LoginRequest, LoginResponse, LOGIN_OK};
use msgframe::protocols::{self, MessageType};
use msgframe::runtime::frame::{encode_frame, read_body, read_header, HEADER_LEN};
use msgframe::runtime::mio::Reactor;
use msgframe::runtime::{DispatchTable, Reply};
use std::io::{ErrorKind, Read, Write};
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config() -> Config {
    Config {
        listen: "127.0.0.1:0".parse().unwrap(),
        ..Config::default()
    }
}

fn reactor() -> Reactor {
    Reactor::bind(&config(), protocols::dispatch_table(&LoginConfig::default())).unwrap()
}

fn drive_until(reactor: &mut Reactor, what: &str, mut done: impl FnMut(&Reactor) -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done(reactor) {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        reactor.turn(Some(Duration::from_millis(10))).unwrap();
    }
}

fn connect(reactor: &Reactor) -> TcpStream {
    let stream = TcpStream::connect(reactor.local_addr()).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    stream
}

fn login_frame(account: &str) -> Vec<u8> {
    let body = message::encode(&LoginRequest {
        account: account.to_string(),
    })
    .unwrap();
    encode_frame(MessageType::C2sLogin.into(), &body)
        .unwrap()
        .to_vec()
}

fn read_login_response(stream: &mut TcpStream) -> LoginResponse {
    let header = read_header(stream).unwrap().unwrap();
    assert_eq!(header.message_type, i32::from(MessageType::S2cLogin));
    let body = read_body(stream, header.validate().unwrap()).unwrap();
    message::decode(&body).unwrap()
}

/// True once the server has closed its end: EOF or reset.
fn server_closed(stream: &mut TcpStream) -> bool {
    let mut buf = [0u8; 16];
    match stream.read(&mut buf) {
        Ok(0) => true,
        Ok(_) => false,
        Err(e) => matches!(e.kind(), ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted),
    }
}

fn has_account(reactor: &Reactor, account: &str) -> bool {
    reactor
        .sessions()
        .any(|(_, session)| session.account() == Some(account))
}

#[test]
fn login_end_to_end() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    client.write_all(&login_frame("alice")).unwrap();
    drive_until(&mut reactor, "login", |r| has_account(r, "alice"));

    let response = read_login_response(&mut client);
    assert_eq!(response.result_code, LOGIN_OK);
    assert!(response.message.contains("alice"));
    assert_eq!(response.assigned_id, 123_456);
    assert_eq!(reactor.stats().frames, 1);

    drop(client);
    drive_until(&mut reactor, "clean close", |r| r.connection_count() == 0);
    let stats = reactor.stats();
    assert_eq!((stats.accepted, stats.closed, stats.dropped), (1, 1, 0));
}

#[test]
fn frame_split_across_notifications() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);
    client.set_nodelay(true).unwrap();

    let frame = login_frame("bob");
    client.write_all(&frame[..3]).unwrap();
    drive_until(&mut reactor, "accept", |r| r.connection_count() == 1);

    for byte in &frame[3..] {
        client.write_all(std::slice::from_ref(byte)).unwrap();
        reactor.turn(Some(Duration::from_millis(5))).unwrap();
    }
    drive_until(&mut reactor, "login", |r| has_account(r, "bob"));

    let response = read_login_response(&mut client);
    assert!(response.message.contains("bob"));
    assert_eq!(reactor.stats().frames, 1);
}

#[test]
fn pipelined_frames_answered_in_order() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    let mut wire = login_frame("first");
    wire.extend_from_slice(&login_frame("second"));
    client.write_all(&wire).unwrap();

    drive_until(&mut reactor, "both frames", |r| r.stats().frames == 2);

    assert!(read_login_response(&mut client).message.ends_with("first"));
    assert!(read_login_response(&mut client).message.ends_with("second"));
    assert!(has_account(&reactor, "second"));
}

#[test]
fn many_replies_drain_through_output_queue() {
    const FRAMES: usize = 2000;

    let mut reactor = reactor();
    let mut client = connect(&reactor);

    let frame = login_frame("carol");
    let wire: Vec<u8> = frame.iter().copied().cycle().take(frame.len() * FRAMES).collect();
    client.write_all(&wire).unwrap();

    let expected = read_login_response_len() * FRAMES;
    client.set_nonblocking(true).unwrap();
    let mut received = Vec::with_capacity(expected);
    let mut buf = [0u8; 4096];
    drive_until(&mut reactor, "all replies", |_| {
        loop {
            match client.read(&mut buf) {
                Ok(0) => panic!("server closed early"),
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("read failed: {e}"),
            }
        }
        received.len() >= expected
    });

    assert_eq!(received.len(), expected);
    assert_eq!(reactor.stats().frames, FRAMES as u64);
    let mut rest = &received[..];
    for _ in 0..FRAMES {
        let response = read_login_response_from(&mut rest);
        assert_eq!(response.message, "Hey you!carol");
    }
}

fn read_login_response_len() -> usize {
    let body = message::encode(&LoginResponse {
        result_code: LOGIN_OK,
        message: "Hey you!carol".to_string(),
        assigned_id: 123_456,
    })
    .unwrap();
    HEADER_LEN + body.len()
}

fn read_login_response_from(rest: &mut &[u8]) -> LoginResponse {
    let header = read_header(rest).unwrap().unwrap();
    let body = read_body(rest, header.validate().unwrap()).unwrap();
    message::decode(&body).unwrap()
}

#[test]
fn unknown_message_type_terminates_without_dispatch() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut table = DispatchTable::new();
    let counter = Arc::clone(&calls);
    table.register(
        MessageType::C2sLogin,
        Box::new(move |_session, _body| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Reply {
                message_type: MessageType::S2cLogin,
                body: vec![1],
            })
        }),
    );
    let mut reactor = Reactor::bind(&config(), table).unwrap();
    let mut client = connect(&reactor);

    client.write_all(&encode_frame(9999, b"payload").unwrap()).unwrap();
    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);

    assert_eq!(reactor.connection_count(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(server_closed(&mut client));
}

#[test]
fn response_type_sent_by_client_is_rejected() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    // A known type with no handler is still a protocol error.
    client
        .write_all(&encode_frame(MessageType::S2cLogin.into(), b"x").unwrap())
        .unwrap();
    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);
    assert!(server_closed(&mut client));
}

#[test]
fn short_header_then_close_is_cleaned_up() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    client.write_all(&[1, 0, 0]).unwrap();
    drop(client);

    drive_until(&mut reactor, "cleanup", |r| {
        r.stats().accepted == 1 && r.connection_count() == 0
    });
    assert_eq!(reactor.stats().dropped, 1);
}

#[test]
fn oversized_length_disconnects_without_reading_body() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&1i32.to_le_bytes());
    header.extend_from_slice(&100_000i32.to_le_bytes());
    client.write_all(&header).unwrap();

    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);
    assert_eq!(reactor.connection_count(), 0);
    assert!(server_closed(&mut client));
}

#[test]
fn truncated_body_then_close_is_dropped() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    let frame = login_frame("dave");
    client.write_all(&frame[..frame.len() - 2]).unwrap();
    drop(client);

    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);
    assert_eq!(reactor.connection_count(), 0);
    assert_eq!(reactor.stats().frames, 0);
}

#[test]
fn malformed_payload_disconnects() {
    let mut reactor = reactor();
    let mut client = connect(&reactor);

    client
        .write_all(&encode_frame(MessageType::C2sLogin.into(), &[0xff, 0xff]).unwrap())
        .unwrap();
    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);
    assert!(server_closed(&mut client));
}

#[test]
fn huge_string_prefix_drops_only_its_connection() {
    let mut reactor = reactor();
    let mut good = connect(&reactor);
    let mut hostile = connect(&reactor);

    // Login body claiming a 2^60-byte account.
    let mut body = vec![0xfd];
    body.extend_from_slice(&(1u64 << 60).to_le_bytes());
    body.push(b'a');
    hostile
        .write_all(&encode_frame(MessageType::C2sLogin.into(), &body).unwrap())
        .unwrap();
    drive_until(&mut reactor, "drop", |r| r.stats().dropped == 1);
    assert!(server_closed(&mut hostile));

    good.write_all(&login_frame("heidi")).unwrap();
    drive_until(&mut reactor, "login", |r| has_account(r, "heidi"));
    assert!(read_login_response(&mut good).message.contains("heidi"));
    assert_eq!(reactor.connection_count(), 1);
}

#[test]
fn connections_are_independent() {
    let mut reactor = reactor();
    let mut good = connect(&reactor);
    let mut bad = connect(&reactor);

    bad.write_all(&encode_frame(4242, b"x").unwrap()).unwrap();
    good.write_all(&login_frame("erin")).unwrap();

    drive_until(&mut reactor, "both handled", |r| {
        r.stats().dropped == 1 && has_account(r, "erin")
    });

    assert_eq!(reactor.connection_count(), 1);
    assert!(read_login_response(&mut good).message.contains("erin"));
    assert!(server_closed(&mut bad));
}

#[test]
fn capacity_limit_rejects_extra_connections() {
    let config = Config {
        max_connections: 1,
        ..config()
    };
    let mut reactor =
        Reactor::bind(&config, protocols::dispatch_table(&LoginConfig::default())).unwrap();

    let _first = connect(&reactor);
    drive_until(&mut reactor, "first accept", |r| r.stats().accepted == 1);

    let mut second = connect(&reactor);
    // Give the reactor a chance to accept and reject.
    for _ in 0..20 {
        reactor.turn(Some(Duration::from_millis(5))).unwrap();
    }
    assert_eq!(reactor.connection_count(), 1);
    assert_eq!(reactor.stats().accepted, 1);
    assert!(server_closed(&mut second));
}

#[test]
fn independent_reactors_do_not_share_state() {
    let mut a = reactor();
    let mut b = reactor();
    let mut client = connect(&a);

    client.write_all(&login_frame("frank")).unwrap();
    drive_until(&mut a, "login", |r| has_account(r, "frank"));
    b.turn(Some(Duration::from_millis(10))).unwrap();

    assert_eq!(a.connection_count(), 1);
    assert_eq!(b.connection_count(), 0);
}

#[test]
fn run_stops_on_shutdown() {
    let mut reactor = reactor();
    let addr = reactor.local_addr();
    let handle = reactor.shutdown_handle();

    let runner = std::thread::spawn(move || {
        reactor.run().unwrap();
        reactor
    });

    let mut client = TcpStream::connect(addr).unwrap();
    client
        .set_read_timeout(Some(Duration::from_secs(5)))
        .unwrap();
    client.write_all(&login_frame("grace")).unwrap();
    let response = read_login_response(&mut client);
    assert!(response.message.contains("grace"));

    handle.shutdown().unwrap();
    let reactor = runner.join().unwrap();
    assert_eq!(reactor.connection_count(), 0);
    assert!(server_closed(&mut client));
}
