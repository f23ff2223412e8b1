//! Session lifecycle against the in-process HTTP/2 server.

use bytes::Bytes;
use mock_h2::{COMMON_NAME, MockResponse, MockServer, grpc_frame};
use std::net::TcpListener;
use std::thread;
use std::time::{Duration, Instant};
use transport::{Error, ErrorKind, PoolConfig, Request, TransportPool};

fn pool_for(server: &MockServer) -> TransportPool {
    let config = PoolConfig {
        tls: server.tls_config(),
        ..PoolConfig::default()
    };
    TransportPool::new(config).unwrap()
}

fn echo_server() -> MockServer {
    MockServer::start(|request| MockResponse::grpc(request.grpc_message().unwrap_or_default()))
        .unwrap()
}

#[test]
fn test_two_sequential_sessions() {
    let server = echo_server();
    let pool = pool_for(&server);

    for message in [&b"first"[..], &b"second"[..]] {
        let mut session = pool.acquire(Some(Duration::from_secs(5))).unwrap();
        session
            .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
            .unwrap();

        let request = Request::grpc("localhost", "/test.Echo/Say", grpc_frame(message).into());
        let response = session.perform(request).unwrap();

        assert_eq!(response.status, 0);
        assert_eq!(&response.body[5..], message);
        session.release();
    }

    assert_eq!(server.connections(), 2);
    assert_eq!(server.requests().len(), 2);
}

#[test]
fn test_request_headers_on_the_wire() {
    let server = echo_server();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let request = Request::grpc("api.local", "/test.Echo/Say", grpc_frame(b"x").into())
        .with_authorization("Bearer secret");
    session.perform(request).unwrap();
    drop(session);

    let recorded = &server.requests()[0];
    assert_eq!(
        recorded.header_names(),
        vec![
            ":method",
            ":scheme",
            ":path",
            ":authority",
            "content-length",
            "content-type",
            "authorization",
            "user-agent",
            "te",
        ]
    );
    assert_eq!(recorded.header(":method"), Some("POST"));
    assert_eq!(recorded.header(":scheme"), Some("https"));
    assert_eq!(recorded.header(":authority"), Some("api.local"));
    assert_eq!(recorded.header("content-length"), Some("6"));
    assert_eq!(recorded.header("content-type"), Some("application/grpc+proto"));
    assert_eq!(recorded.header("authorization"), Some("Bearer secret"));
    assert_eq!(recorded.header("te"), Some("trailers"));
    assert!(recorded
        .header("user-agent")
        .is_some_and(|ua| ua.starts_with("ganymede-device/")));
    assert_eq!(recorded.grpc_message(), Some(&b"x"[..]));
}

#[test]
fn test_several_requests_on_one_session() {
    let server = MockServer::start(|_| MockResponse::json(200, "{}")).unwrap();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    for _ in 0..3 {
        let request = Request::json("localhost", "/oauth/token", Bytes::from_static(b"{}"));
        let response = session.perform(request).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(&response.body[..], b"{}");
    }
    drop(session);

    assert_eq!(server.connections(), 1);
    assert_eq!(server.requests().len(), 3);
}

#[test]
fn test_acquire_release_without_connect() {
    let pool = TransportPool::new(PoolConfig::default()).unwrap();

    let session = pool.acquire(Some(Duration::from_secs(1))).unwrap();
    session.release();

    let session = pool.acquire(Some(Duration::from_secs(1))).unwrap();
    drop(session);
}

#[test]
fn test_acquire_times_out_while_held() {
    let pool = TransportPool::new(PoolConfig::default()).unwrap();
    let held = pool.acquire(None).unwrap();

    let other = pool.clone();
    let waiter = thread::spawn(move || {
        let start = Instant::now();
        let result = other.acquire(Some(Duration::from_millis(100)));
        (result.err(), start.elapsed())
    });

    let (error, elapsed) = waiter.join().unwrap();
    assert!(matches!(error, Some(Error::PoolTimeout(_))));
    assert!(elapsed >= Duration::from_millis(100));

    drop(held);
    assert!(pool.acquire(Some(Duration::from_secs(1))).is_ok());
}

#[test]
fn test_waiting_caller_gets_slot_after_release() {
    let pool = TransportPool::new(PoolConfig::default()).unwrap();
    let held = pool.acquire(None).unwrap();

    let other = pool.clone();
    let waiter = thread::spawn(move || other.acquire(Some(Duration::from_secs(5))).is_ok());

    thread::sleep(Duration::from_millis(50));
    held.release();
    assert!(waiter.join().unwrap());
}

#[test]
fn test_perform_without_connect_is_local_error() {
    let pool = TransportPool::new(PoolConfig::default()).unwrap();
    let mut session = pool.acquire(None).unwrap();

    let error = session
        .perform(Request::grpc("localhost", "/x", Bytes::new()))
        .unwrap_err();
    assert!(matches!(error, Error::NotConnected));
    assert_eq!(error.kind(), ErrorKind::Local);
}

#[test]
fn test_second_connect_is_rejected() {
    let server = echo_server();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let error = session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Local);
}

#[test]
fn test_response_larger_than_capacity() {
    let server = MockServer::start(|_| MockResponse::grpc(&[0xAB; 4096])).unwrap();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let request = Request::grpc("localhost", "/x", grpc_frame(b"").into())
        .with_response_capacity(1024);
    let error = session.perform(request).unwrap_err();

    assert!(matches!(error, Error::ResponseTooLarge { capacity: 1024 }));
    assert_eq!(error.kind(), ErrorKind::Protocol);
}

#[test]
fn test_missing_grpc_status() {
    let server = MockServer::start(|_| MockResponse::status(200)).unwrap();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let error = session
        .perform(Request::grpc("localhost", "/x", grpc_frame(b"").into()))
        .unwrap_err();

    assert!(matches!(error, Error::MissingStatus));
}

#[test]
fn test_trailers_only_status() {
    let server =
        MockServer::start(|_| MockResponse::grpc_status(16, "token expired")).unwrap();
    let pool = pool_for(&server);

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let response = session
        .perform(Request::grpc("localhost", "/x", grpc_frame(b"").into()))
        .unwrap();

    assert_eq!(response.status, 16);
    assert!(response.body.is_empty());
    assert_eq!(response.message.as_deref(), Some("token expired"));
}

#[test]
fn test_slow_handler_hits_perform_deadline() {
    let server = MockServer::start(|_| {
        thread::sleep(Duration::from_millis(600));
        MockResponse::json(200, "{}")
    })
    .unwrap();
    let pool = TransportPool::new(PoolConfig {
        tls: server.tls_config(),
        perform_timeout: Duration::from_millis(200),
        ..PoolConfig::default()
    })
    .unwrap();

    let mut session = pool.acquire(None).unwrap();
    session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap();
    let error = session
        .perform(Request::json("localhost", "/slow", Bytes::new()))
        .unwrap_err();

    assert!(matches!(error, Error::DeadlineExceeded(_)));
    assert_eq!(error.kind(), ErrorKind::Transport);

    let error = session
        .perform(Request::json("localhost", "/slow", Bytes::new()))
        .unwrap_err();
    assert!(matches!(error, Error::NotConnected));
}

#[test]
fn test_connect_to_silent_server_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let silent = thread::spawn(move || {
        let held = listener.accept();
        thread::sleep(Duration::from_secs(2));
        drop(held);
    });

    let pool = TransportPool::new(PoolConfig {
        handshake_timeout: Duration::from_millis(250),
        ..PoolConfig::default()
    })
    .unwrap();

    let mut session = pool.acquire(None).unwrap();
    let start = Instant::now();
    let error = session.connect("127.0.0.1", port, None).unwrap_err();

    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(start.elapsed() < Duration::from_secs(2));
    drop(session);
    silent.join().unwrap();
}

#[test]
fn test_untrusted_certificate_fails_connect() {
    let server = echo_server();
    let pool = TransportPool::new(PoolConfig::default()).unwrap();

    let mut session = pool.acquire(None).unwrap();
    let error = session
        .connect("127.0.0.1", server.port(), Some(COMMON_NAME))
        .unwrap_err();
    assert!(matches!(error, Error::Tls(_)));
}
