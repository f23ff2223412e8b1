//! mock-h2 - in-process TLS + HTTP/2 server for integration tests.
//!
//! Generates a self-signed certificate for `localhost`, listens on an
//! ephemeral loopback port and answers each request with whatever the
//! handler returns. Requests are recorded for later inspection.
//!
//! The server ignores flow control, so response bodies should stay below
//! the default 64 KiB window.

mod conn;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use std::io;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tls_channel::TlsConfig;

/// Name on the generated certificate.
pub const COMMON_NAME: &str = "localhost";

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// One request as the server received it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordedRequest {
    /// Header fields in arrival order, pseudo-headers included.
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn path(&self) -> Option<&str> {
        self.header(":path")
    }

    /// Header names in arrival order.
    pub fn header_names(&self) -> Vec<&str> {
        self.headers.iter().map(|(n, _)| n.as_str()).collect()
    }

    /// Body with the 5-byte gRPC length prefix removed.
    pub fn grpc_message(&self) -> Option<&[u8]> {
        let header = self.body.get(..5)?;
        let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        self.body.get(5..5 + len)
    }
}

/// What the server sends back for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockResponse {
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Sent as a trailing HEADERS frame when non-empty.
    pub trailers: Vec<(String, String)>,
}

impl MockResponse {
    /// A successful unary gRPC response carrying `message`.
    pub fn grpc(message: &[u8]) -> Self {
        Self {
            headers: vec![
                (":status".into(), "200".into()),
                ("content-type".into(), "application/grpc".into()),
            ],
            body: grpc_frame(message),
            trailers: vec![("grpc-status".into(), "0".into())],
        }
    }

    /// A trailers-only gRPC response with the given status code.
    pub fn grpc_status(code: u32, message: &str) -> Self {
        let mut headers = vec![
            (":status".to_string(), "200".to_string()),
            ("content-type".to_string(), "application/grpc".to_string()),
            ("grpc-status".to_string(), code.to_string()),
        ];
        if !message.is_empty() {
            headers.push(("grpc-message".into(), message.into()));
        }
        Self {
            headers,
            body: Vec::new(),
            trailers: Vec::new(),
        }
    }

    /// A plain HTTP response with a JSON body.
    pub fn json(status: u16, body: &str) -> Self {
        Self {
            headers: vec![
                (":status".into(), status.to_string()),
                ("content-type".into(), "application/json".into()),
            ],
            body: body.as_bytes().to_vec(),
            trailers: Vec::new(),
        }
    }

    /// An HTTP response with no status-bearing headers besides `:status`.
    pub fn status(status: u16) -> Self {
        Self {
            headers: vec![(":status".into(), status.to_string())],
            ..Self::default()
        }
    }

    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    pub fn with_trailer(mut self, name: &str, value: &str) -> Self {
        self.trailers.push((name.into(), value.into()));
        self
    }
}

/// Prefix `message` with an uncompressed gRPC frame header.
pub fn grpc_frame(message: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(5 + message.len());
    out.push(0);
    out.extend_from_slice(&(message.len() as u32).to_be_bytes());
    out.extend_from_slice(message);
    out
}

type Handler = dyn Fn(&RecordedRequest) -> MockResponse + Send + Sync;

pub(crate) struct Shared {
    pub(crate) handler: Box<Handler>,
    pub(crate) requests: Mutex<Vec<RecordedRequest>>,
    pub(crate) connections: AtomicUsize,
}

/// A running mock server. Stops accepting when dropped.
pub struct MockServer {
    addr: SocketAddr,
    certificate: CertificateDer<'static>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Start a server answering every request with `handler`.
    pub fn start<F>(handler: F) -> io::Result<Self>
    where
        F: Fn(&RecordedRequest) -> MockResponse + Send + Sync + 'static,
    {
        let (certificate, key) = self_signed()?;
        let config = server_config(certificate.clone(), key)?;

        let listener = TcpListener::bind("127.0.0.1:0")?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;

        let shared = Arc::new(Shared {
            handler: Box::new(handler),
            requests: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
        });
        let shutdown = Arc::new(AtomicBool::new(false));

        let acceptor = {
            let shared = shared.clone();
            let shutdown = shutdown.clone();
            thread::Builder::new()
                .name("mock-h2-accept".into())
                .spawn(move || accept_loop(listener, config, shared, shutdown))?
        };

        tracing::debug!(%addr, "mock h2 server listening");

        Ok(Self {
            addr,
            certificate,
            shared,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// The server certificate, for building a trusting client.
    pub fn certificate(&self) -> CertificateDer<'static> {
        self.certificate.clone()
    }

    /// Client TLS configuration trusting only this server.
    pub fn tls_config(&self) -> TlsConfig {
        match TlsConfig::with_root_certificates([self.certificate()]) {
            Ok(config) => config,
            Err(e) => panic!("generated certificate rejected: {e}"),
        }
    }

    /// Requests received so far, in completion order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.shared
            .requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of TCP connections accepted.
    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.acceptor.take() {
            let _ = handle.join();
        }
    }
}

fn accept_loop(
    listener: TcpListener,
    config: Arc<rustls::ServerConfig>,
    shared: Arc<Shared>,
    shutdown: Arc<AtomicBool>,
) {
    while !shutdown.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, peer)) => {
                shared.connections.fetch_add(1, Ordering::SeqCst);
                let config = config.clone();
                let shared = shared.clone();
                let _ = thread::Builder::new()
                    .name("mock-h2-conn".into())
                    .spawn(move || {
                        if let Err(e) = conn::serve(stream, config, &shared) {
                            tracing::debug!(%peer, error = %e, "mock connection ended");
                        }
                    });
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(ACCEPT_POLL_INTERVAL);
            }
            Err(e) => {
                tracing::warn!(error = %e, "mock accept failed");
                return;
            }
        }
    }
}

fn self_signed() -> io::Result<(CertificateDer<'static>, PrivateKeyDer<'static>)> {
    let generated = rcgen::generate_simple_self_signed(vec![COMMON_NAME.to_string()])
        .map_err(io::Error::other)?;
    let key = PrivatePkcs8KeyDer::from(generated.key_pair.serialize_der());
    Ok((CertificateDer::from(generated.cert), key.into()))
}

fn server_config(
    certificate: CertificateDer<'static>,
    key: PrivateKeyDer<'static>,
) -> io::Result<Arc<rustls::ServerConfig>> {
    let mut config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![certificate], key)
        .map_err(io::Error::other)?;
    config.alpn_protocols = vec![tls_channel::ALPN_H2.to_vec()];
    Ok(Arc::new(config))
}
