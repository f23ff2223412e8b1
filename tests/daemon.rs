//! Poller, reporter and console against the in-process HTTP/2 server.

use ganymede_device::config::Config;
use ganymede_device::console::Console;
use ganymede_device::daemon::{Daemon, Services};
use ganymede_device::lights::LightsEvent;
use ganymede_device::measurements::Reporter;
use ganymede_device::storage::{DEVICE_ID_KEY, POLL_RESPONSE_KEY};
use grpc::{Code, Message};
use mock_h2::{COMMON_NAME, MockResponse, MockServer, RecordedRequest};
use protocol_ganymede::{
    AtmosphericMeasurements, CredentialStore, Duration, LightConfig, Luminaire, POLL_PATH,
    PUSH_MEASUREMENTS_PATH, PollRequest, PollResponse, PushMeasurementsRequest, TokenKind,
};
use std::io::Cursor;
use tempfile::TempDir;
use transport::PoolConfig;

const MAC: &str = "aa:bb:cc:dd:ee:ff";

fn poll_response(poll_period_secs: i64) -> PollResponse {
    PollResponse {
        device_uid: "xyz".into(),
        device_display_name: "bench".into(),
        config_display_name: "veg".into(),
        timezone_offset_minutes: -300,
        light_config: Some(LightConfig {
            luminaires: vec![Luminaire {
                port: 5,
                active_high: true,
                photo_period: Vec::new(),
            }],
        }),
        poll_period: Some(Duration {
            seconds: poll_period_secs,
            nanos: 0,
        }),
    }
}

/// Answers polls from `MAC` with `response`, everything else with an
/// empty message.
fn device_server(response: PollResponse) -> MockServer {
    MockServer::start(move |request: &RecordedRequest| {
        if request.path() == Some(POLL_PATH) {
            let poll = PollRequest::decode(request.grpc_message().unwrap_or_default()).unwrap();
            if poll.device_mac != MAC {
                return MockResponse::grpc_status(5, "unknown device");
            }
            MockResponse::grpc(&response.encode_to_vec())
        } else {
            MockResponse::grpc(b"")
        }
    })
    .unwrap()
}

fn services(server: &MockServer, dir: &TempDir) -> Services {
    let mut config = Config::default();
    config.api.host = "127.0.0.1".into();
    config.api.port = server.port();
    config.api.authority = Some(COMMON_NAME.into());
    config.auth.host = "127.0.0.1".into();
    config.auth.port = server.port();
    config.storage.path = dir.path().to_path_buf();
    config.device.mac = MAC.to_uppercase();

    let pool = PoolConfig {
        tls: server.tls_config(),
        ..PoolConfig::default()
    };
    let services = Services::build_with_pool(config, Some(pool)).unwrap();
    services
        .store
        .write(TokenKind::AccessToken, "token-1")
        .unwrap();
    services
}

#[test]
fn test_poll_applies_and_persists_response() {
    let server = device_server(poll_response(900));
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);

    let (lights_tx, lights_rx) = crossbeam_channel::unbounded();
    let mut poller = services.poller(lights_tx);
    let response = poller.poll_once().unwrap();

    assert_eq!(response.device_uid, "xyz");
    assert_eq!(services.identity.device_id().as_deref(), Some("xyz"));
    assert_eq!(services.clock.offset_minutes(), -300);
    assert_eq!(poller.period(), std::time::Duration::from_secs(900));
    match lights_rx.try_recv() {
        Ok(LightsEvent::Config(config)) => assert_eq!(config.luminaires[0].port, 5),
        _ => panic!("light config was not forwarded"),
    }

    let stored = services.store.read_blob(POLL_RESPONSE_KEY).unwrap().unwrap();
    assert_eq!(PollResponse::decode(&stored).unwrap(), response);
    assert_eq!(
        services.store.read_string(DEVICE_ID_KEY).unwrap().as_deref(),
        Some("xyz")
    );

    let recorded = &server.requests()[0];
    assert_eq!(recorded.header("authorization"), Some("Bearer token-1"));
}

#[test]
fn test_short_poll_period_is_ignored() {
    let server = device_server(poll_response(30));
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);

    let (lights_tx, _lights_rx) = crossbeam_channel::unbounded();
    let mut poller = services.poller(lights_tx);
    poller.poll_once().unwrap();
    assert_eq!(poller.period(), std::time::Duration::from_secs(3600));
}

#[test]
fn test_restore_applies_stored_response() {
    let server = MockServer::start(|_| MockResponse::grpc_status(14, "down")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);
    services
        .store
        .write_blob(POLL_RESPONSE_KEY, &poll_response(1200).encode_to_vec())
        .unwrap();

    let (lights_tx, lights_rx) = crossbeam_channel::unbounded();
    let mut poller = services.poller(lights_tx);
    assert!(poller.restore());
    assert_eq!(services.identity.device_id().as_deref(), Some("xyz"));
    assert_eq!(poller.period(), std::time::Duration::from_secs(1200));
    assert!(matches!(lights_rx.try_recv(), Ok(LightsEvent::Config(_))));

    // The live poll fails and leaves the restored state alone.
    let status = poller.poll_once().unwrap_err();
    assert_eq!(status.code(), Code::Unavailable);
    assert_eq!(services.identity.device_id().as_deref(), Some("xyz"));
}

#[test]
fn test_corrupt_stored_response_is_skipped() {
    let server = device_server(poll_response(900));
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);
    services
        .store
        .write_blob(POLL_RESPONSE_KEY, &[0x0A, 0x7F])
        .unwrap();

    let (lights_tx, _lights_rx) = crossbeam_channel::unbounded();
    assert!(!services.poller(lights_tx).restore());
}

#[test]
fn test_unauthenticated_poll_persists_nothing() {
    let server = MockServer::start(|_| MockResponse::grpc_status(16, "expired")).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);

    let (lights_tx, _lights_rx) = crossbeam_channel::unbounded();
    let status = services.poller(lights_tx).poll_once().unwrap_err();
    assert_eq!(status.code(), Code::Unauthenticated);
    assert_eq!(services.store.read_blob(POLL_RESPONSE_KEY).unwrap(), None);
    assert_eq!(services.identity.device_id(), None);
}

#[test]
fn test_reporter_needs_device_id() {
    let server = device_server(poll_response(900));
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);
    let reporter = Reporter::new(services.api.clone(), services.identity.clone());
    let reading = AtmosphericMeasurements {
        temperature: 20.0,
        humidity: 45.0,
    };

    let status = reporter.report(reading).unwrap_err();
    assert_eq!(status.code(), Code::LocalError);
    assert!(server.requests().is_empty());

    services.identity.set_device_id("xyz").unwrap();
    reporter.report(reading).unwrap();

    let recorded = &server.requests()[0];
    assert_eq!(recorded.path(), Some(PUSH_MEASUREMENTS_PATH));
    let sent = PushMeasurementsRequest::decode(recorded.grpc_message().unwrap()).unwrap();
    assert_eq!(sent.measurements.len(), 1);
    assert_eq!(sent.measurements[0].device_id, "xyz");
    assert_eq!(sent.measurements[0].atmosphere, Some(reading));
    assert!(sent.measurements[0].timestamp.is_some());
}

#[test]
fn test_console_drives_running_daemon() {
    let server = device_server(poll_response(900));
    let dir = tempfile::tempdir().unwrap();
    let services = services(&server, &dir);
    services.identity.set_device_id("xyz").unwrap();

    let daemon = Daemon::start(&services).unwrap();
    let console = Console::new(daemon.handles(), services.auth.clone());

    let mut output = Vec::new();
    console
        .run(Cursor::new("help\npush 21.5 40\nbogus\nquit\n"), &mut output)
        .unwrap();
    daemon.join();

    let output = String::from_utf8(output).unwrap();
    assert!(output.contains("push <t> <h>"));
    assert!(output.contains("unknown command \"bogus\""));
    assert!(output.ends_with("stopping\n"));

    let paths: Vec<_> = server
        .requests()
        .iter()
        .filter_map(|r| r.path().map(str::to_string))
        .collect();
    assert!(paths.iter().any(|p| p == POLL_PATH));
    assert!(paths.iter().any(|p| p == PUSH_MEASUREMENTS_PATH));
}
