//! Unary calls against the in-process HTTP/2 server.

use bytes::Bytes;
use grpc::{Client, Code, Endpoint, TokenSource};
use mock_h2::{COMMON_NAME, MockResponse, MockServer};
use std::sync::Arc;
use transport::{PoolConfig, TransportPool};

struct Static(Option<&'static str>);

impl TokenSource for Static {
    fn bearer(&self) -> Option<String> {
        self.0.map(|t| format!("Bearer {t}"))
    }
}

fn client(server: &MockServer, token: Option<&'static str>) -> Client {
    let pool = TransportPool::new(PoolConfig {
        tls: server.tls_config(),
        ..PoolConfig::default()
    })
    .unwrap();
    let endpoint = Endpoint::new("127.0.0.1", server.port()).with_authority(COMMON_NAME);
    Client::new(pool, endpoint, Arc::new(Static(token)))
}

#[test]
fn test_unary_round_trip() {
    let server = MockServer::start(|request| {
        let mut reply = b"echo:".to_vec();
        reply.extend_from_slice(request.grpc_message().unwrap_or_default());
        MockResponse::grpc(&reply)
    })
    .unwrap();
    let client = client(&server, Some("abc"));

    let response: Bytes = client
        .unary("/test.Echo/Say", &Bytes::from_static(b"hi"))
        .unwrap();
    assert_eq!(&response[..], b"echo:hi");

    let recorded = &server.requests()[0];
    assert_eq!(recorded.path(), Some("/test.Echo/Say"));
    assert_eq!(recorded.header(":authority"), Some("localhost"));
    assert_eq!(recorded.header("authorization"), Some("Bearer abc"));
    assert_eq!(recorded.body, vec![0, 0, 0, 0, 2, b'h', b'i']);
}

/// Fails to decode anything, so any decode attempt shows up in the status.
#[derive(Debug)]
struct Strict;

impl grpc::Message for Strict {
    fn encoded_len(&self) -> usize {
        0
    }
    fn encode(&self, _buf: &mut Vec<u8>) {}
    fn decode(_buf: &[u8]) -> Result<Self, grpc::DecodeError> {
        Err(grpc::DecodeError::Invalid("decode attempted"))
    }
}

#[test]
fn test_error_status_skips_decode() {
    let server = MockServer::start(|_| MockResponse {
        trailers: vec![
            ("grpc-status".into(), "16".into()),
            ("grpc-message".into(), "bad token".into()),
        ],
        ..MockResponse::grpc(b"\xff\xff not a message")
    })
    .unwrap();
    let client = client(&server, Some("abc"));

    let status = client
        .unary::<Bytes, Strict>("/test.Echo/Say", &Bytes::new())
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), Some("bad token"));
}

#[test]
fn test_decode_failure_is_internal() {
    let server = MockServer::start(|_| MockResponse::grpc(b"anything")).unwrap();
    let client = client(&server, Some("abc"));

    let status = client
        .unary::<Bytes, Strict>("/test.Echo/Say", &Bytes::new())
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
}

#[test]
fn test_missing_token_is_local_error() {
    let server = MockServer::start(|_| MockResponse::grpc(b"")).unwrap();
    let client = client(&server, None);

    let status = client
        .unary_empty("/test.Echo/Say", &Bytes::new())
        .unwrap_err();
    assert_eq!(status.code(), Code::LocalError);
    assert!(server.requests().is_empty());
}

#[test]
fn test_oversized_response_is_local_error() {
    let server = MockServer::start(|_| MockResponse::grpc(&[1u8; 3000])).unwrap();
    let client = client(&server, Some("abc"));

    let status = client
        .unary::<Bytes, Bytes>("/test.Echo/Say", &Bytes::new())
        .unwrap_err();
    assert_eq!(status.code(), Code::LocalError);

    let big = client.clone().with_response_capacity(4096);
    let response: Bytes = big.unary("/test.Echo/Say", &Bytes::new()).unwrap();
    assert_eq!(response.len(), 3000);
}

#[test]
fn test_connect_failure_releases_session() {
    let server = MockServer::start(|_| MockResponse::grpc(b"")).unwrap();
    let port = server.port();
    drop(server);

    let pool = TransportPool::new(PoolConfig::default()).unwrap();
    let endpoint = Endpoint::new("127.0.0.1", port);
    let client = Client::new(pool.clone(), endpoint, Arc::new(Static(Some("t"))));

    let status = client.unary_empty("/x", &Bytes::new()).unwrap_err();
    assert_eq!(status.code(), Code::LocalError);

    // The slot is free again.
    assert!(pool
        .acquire(Some(std::time::Duration::from_secs(1)))
        .is_ok());
}

#[test]
fn test_unary_empty_ignores_body() {
    let server = MockServer::start(|_| MockResponse::grpc(b"whatever")).unwrap();
    let client = client(&server, Some("abc"));
    assert!(client.unary_empty("/test.Echo/Say", &Bytes::new()).is_ok());
}
