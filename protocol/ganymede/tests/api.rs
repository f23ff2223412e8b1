//! Device RPCs against the in-process HTTP/2 server.

use grpc::{Client, Code, Endpoint, Message};
use mock_h2::{COMMON_NAME, MockResponse, MockServer};
use protocol_ganymede::{
    AtmosphericMeasurements, Bearer, DeviceApi, LightConfig, Luminaire, Measurement, MemoryStore,
    POLL_PATH, PUSH_MEASUREMENTS_PATH, PollRequest, PollResponse, PushMeasurementsRequest,
    Timestamp,
};
use std::sync::Arc;
use std::time::Duration;
use transport::{PoolConfig, TransportPool};

fn api(server: &MockServer) -> DeviceApi {
    let pool = TransportPool::new(PoolConfig {
        tls: server.tls_config(),
        ..PoolConfig::default()
    })
    .unwrap();
    let endpoint = Endpoint::new("127.0.0.1", server.port()).with_authority(COMMON_NAME);
    let tokens = Bearer(Arc::new(MemoryStore::with_tokens("access-1", Some("refresh-1"))));
    DeviceApi::new(Client::new(pool, endpoint, Arc::new(tokens)))
}

#[test]
fn test_poll_device() {
    let server = MockServer::start(|request| {
        let poll = PollRequest::decode(request.grpc_message().unwrap_or_default()).unwrap();
        let response = PollResponse {
            device_uid: if poll.device_mac == "aa:bb:cc:dd:ee:ff" {
                "xyz".into()
            } else {
                "unknown".into()
            },
            timezone_offset_minutes: 60,
            light_config: Some(LightConfig {
                luminaires: vec![Luminaire {
                    port: 2,
                    active_high: true,
                    photo_period: Vec::new(),
                }],
            }),
            ..PollResponse::default()
        };
        MockResponse::grpc(&response.encode_to_vec())
    })
    .unwrap();

    let response = api(&server)
        .poll_device("aa:bb:cc:dd:ee:ff", Duration::from_secs(42))
        .unwrap();
    assert_eq!(response.device_uid, "xyz");
    assert_eq!(response.timezone_offset_minutes, 60);
    assert_eq!(response.light_config.unwrap().luminaires[0].port, 2);

    let recorded = &server.requests()[0];
    assert_eq!(recorded.path(), Some(POLL_PATH));
    assert_eq!(recorded.header("authorization"), Some("Bearer access-1"));
    let sent = PollRequest::decode(recorded.grpc_message().unwrap()).unwrap();
    assert_eq!(sent.uptime.unwrap().seconds, 42);
}

#[test]
fn test_poll_device_unauthenticated() {
    let server = MockServer::start(|_| MockResponse::grpc_status(16, "token expired")).unwrap();

    let status = api(&server)
        .poll_device("aa:bb:cc:dd:ee:ff", Duration::ZERO)
        .unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(status.message(), Some("token expired"));
}

#[test]
fn test_push_measurements() {
    let server = MockServer::start(|_| MockResponse::grpc(b"")).unwrap();

    let measurement = Measurement {
        timestamp: Some(Timestamp {
            seconds: 1_700_000_000,
            nanos: 0,
        }),
        device_id: "xyz".into(),
        atmosphere: Some(AtmosphericMeasurements {
            temperature: 22.5,
            humidity: 51.0,
        }),
    };
    api(&server)
        .push_measurements(vec![measurement.clone()])
        .unwrap();

    let recorded = &server.requests()[0];
    assert_eq!(recorded.path(), Some(PUSH_MEASUREMENTS_PATH));
    let sent = PushMeasurementsRequest::decode(recorded.grpc_message().unwrap()).unwrap();
    assert_eq!(sent.measurements, vec![measurement]);
}
