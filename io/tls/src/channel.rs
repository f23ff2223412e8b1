//! TLS byte channel over a non-blocking TCP socket.

use crate::config::TlsConfig;
use crate::error::{ChannelError, TlsError};
use rustls::ClientConnection;
use rustls::pki_types::ServerName;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// Maximum plaintext bytes handed to rustls per write step.
pub const WRITE_CHUNK_LEN: usize = 1000;

/// Sleep between handshake steps that made no progress.
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Connection lifecycle of a [`TlsChannel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Created, never connected.
    Idle,
    /// Handshake in progress.
    Handshaking,
    /// Handshake done; application data may flow.
    Connected,
    /// Connect or I/O failed.
    Failed,
    /// Closed locally or by the peer.
    Closed,
}

/// Options for [`TlsChannel::connect`].
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Name used for SNI and certificate validation instead of the
    /// hostname the socket connects to.
    pub common_name: Option<String>,
    /// Bound on the TCP connect.
    pub connect_timeout: Duration,
    /// Bound on the whole TLS handshake.
    pub handshake_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            common_name: None,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// A TLS client channel.
///
/// The socket is non-blocking once connected: `read` and `write` return
/// [`ChannelError::WouldBlock`] instead of parking the thread, so the
/// caller owns the retry policy.
pub struct TlsChannel {
    config: TlsConfig,
    stream: Option<TcpStream>,
    conn: Option<ClientConnection>,
    state: ChannelState,
}

impl TlsChannel {
    /// Create an unconnected channel.
    pub fn new(config: TlsConfig) -> Self {
        Self {
            config,
            stream: None,
            conn: None,
            state: ChannelState::Idle,
        }
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ChannelState::Connected
    }

    /// The ALPN protocol agreed during the handshake.
    pub fn alpn_protocol(&self) -> Option<&[u8]> {
        self.conn.as_ref().and_then(|c| c.alpn_protocol())
    }

    /// Connect to `hostname:port` and complete the TLS handshake.
    ///
    /// A channel connects at most once; a second call returns
    /// [`TlsError::AlreadyConnected`].
    pub fn connect(
        &mut self,
        hostname: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<(), TlsError> {
        if self.state != ChannelState::Idle {
            return Err(TlsError::AlreadyConnected);
        }

        match self.establish(hostname, port, options) {
            Ok(()) => {
                self.state = ChannelState::Connected;
                tracing::debug!(
                    host = hostname,
                    port,
                    alpn = ?self.alpn_protocol().map(String::from_utf8_lossy),
                    "tls channel connected"
                );
                Ok(())
            }
            Err(e) => {
                self.state = ChannelState::Failed;
                self.conn = None;
                self.stream = None;
                tracing::warn!(host = hostname, port, error = %e, "tls connect failed");
                Err(e)
            }
        }
    }

    fn establish(
        &mut self,
        hostname: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> Result<(), TlsError> {
        let stream = tcp_connect(hostname, port, options.connect_timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        let name = options.common_name.as_deref().unwrap_or(hostname);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| TlsError::InvalidServerName(name.to_string()))?;

        let conn = ClientConnection::new(self.config.client_config(), server_name)?;

        self.state = ChannelState::Handshaking;
        let stream = self.stream.insert(stream);
        let conn = self.conn.insert(conn);

        let deadline = Instant::now() + options.handshake_timeout;
        handshake(conn, stream, deadline, options.handshake_timeout)?;

        if !self.config.alpn_protocols().is_empty() && conn.alpn_protocol().is_none() {
            return Err(TlsError::AlpnMismatch);
        }

        Ok(())
    }

    /// Write plaintext in chunks of at most [`WRITE_CHUNK_LEN`] bytes.
    ///
    /// Returns the number of bytes accepted. Accepted bytes are owned by
    /// the channel from then on; any that could not reach the socket yet
    /// go out with the next `write`, `flush` or `read`.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let result = self.write_chunks(data);
        self.track(result)
    }

    fn write_chunks(&mut self, data: &[u8]) -> Result<usize, ChannelError> {
        let (conn, stream) = self.parts()?;

        // Nothing new is accepted while earlier records are still queued.
        flush_records(conn, stream)?;

        let mut written = 0;
        for chunk in data.chunks(WRITE_CHUNK_LEN) {
            let n = conn
                .writer()
                .write(chunk)
                .map_err(ChannelError::from_io)?;
            written += n;

            match flush_records(conn, stream) {
                Ok(()) => {}
                Err(ChannelError::WouldBlock) => break,
                Err(e) => return Err(e),
            }

            if n < chunk.len() {
                break;
            }
        }

        Ok(written)
    }

    /// Push queued TLS records to the socket.
    pub fn flush(&mut self) -> Result<(), ChannelError> {
        let result = match self.parts() {
            Ok((conn, stream)) => flush_records(conn, stream),
            Err(e) => Err(e),
        };
        self.track(result)
    }

    /// True if TLS records are waiting for the socket.
    pub fn wants_write(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.wants_write())
    }

    /// Read decrypted bytes into `buf`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let result = self.read_plaintext(buf);
        self.track(result)
    }

    fn read_plaintext(&mut self, buf: &mut [u8]) -> Result<usize, ChannelError> {
        let (conn, stream) = self.parts()?;

        loop {
            match conn.reader().read(buf) {
                Ok(0) if !buf.is_empty() => return Err(ChannelError::Closed),
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(ChannelError::from_io(e)),
            }

            match conn.read_tls(stream) {
                Ok(0) => return Err(ChannelError::Closed),
                Ok(_) => {
                    if let Err(e) = conn.process_new_packets() {
                        // Best effort: deliver the alert rustls queued.
                        let _ = conn.write_tls(stream);
                        return Err(ChannelError::Fatal(io::Error::new(
                            io::ErrorKind::InvalidData,
                            e,
                        )));
                    }
                    match flush_records(conn, stream) {
                        Ok(()) | Err(ChannelError::WouldBlock) => {}
                        Err(e) => return Err(e),
                    }
                }
                Err(e) => return Err(ChannelError::from_io(e)),
            }
        }
    }

    /// Send close_notify and drop the socket.
    ///
    /// Safe on a channel in any state, including one that never connected.
    pub fn close(&mut self) {
        if let (Some(conn), Some(stream)) = (self.conn.as_mut(), self.stream.as_mut()) {
            conn.send_close_notify();
            let _ = conn.write_tls(stream);
            let _ = stream.shutdown(Shutdown::Both);
        }

        self.conn = None;
        self.stream = None;

        if self.state != ChannelState::Idle {
            self.state = ChannelState::Closed;
        }
    }

    fn parts(&mut self) -> Result<(&mut ClientConnection, &mut TcpStream), ChannelError> {
        if self.state != ChannelState::Connected {
            return Err(ChannelError::Fatal(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls channel is not connected",
            )));
        }

        match (self.conn.as_mut(), self.stream.as_mut()) {
            (Some(conn), Some(stream)) => Ok((conn, stream)),
            _ => Err(ChannelError::Fatal(io::Error::new(
                io::ErrorKind::NotConnected,
                "tls channel is not connected",
            ))),
        }
    }

    fn track<T>(&mut self, result: Result<T, ChannelError>) -> Result<T, ChannelError> {
        if self.state == ChannelState::Connected {
            match &result {
                Err(ChannelError::Closed) => self.state = ChannelState::Closed,
                Err(ChannelError::Fatal(_)) => self.state = ChannelState::Failed,
                _ => {}
            }
        }
        result
    }
}

impl Drop for TlsChannel {
    fn drop(&mut self) {
        self.close();
    }
}

fn tcp_connect(hostname: &str, port: u16, timeout: Duration) -> Result<TcpStream, TlsError> {
    let addrs = (hostname, port)
        .to_socket_addrs()
        .map_err(|source| TlsError::Resolve {
            host: hostname.to_string(),
            source,
        })?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                tracing::debug!(%addr, error = %e, "tcp connect attempt failed");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(TlsError::Connect(e)),
        None => Err(TlsError::NoAddress(hostname.to_string())),
    }
}

fn handshake(
    conn: &mut ClientConnection,
    stream: &mut TcpStream,
    deadline: Instant,
    timeout: Duration,
) -> Result<(), TlsError> {
    while conn.is_handshaking() {
        let mut progress = false;

        if conn.wants_write() {
            match conn.write_tls(stream) {
                Ok(n) => progress |= n > 0,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        if conn.is_handshaking() && conn.wants_read() {
            match conn.read_tls(stream) {
                Ok(0) => return Err(TlsError::HandshakeEof),
                Ok(_) => {
                    progress = true;
                    if let Err(e) = conn.process_new_packets() {
                        let _ = conn.write_tls(stream);
                        return Err(e.into());
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {}
                Err(e) => return Err(e.into()),
            }
        }

        if !conn.is_handshaking() {
            break;
        }

        if Instant::now() >= deadline {
            return Err(TlsError::HandshakeTimeout(timeout));
        }

        if !progress {
            std::thread::sleep(HANDSHAKE_POLL_INTERVAL);
        }
    }

    // The final handshake flight may still be queued.
    while conn.wants_write() {
        match conn.write_tls(stream) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                if Instant::now() >= deadline {
                    return Err(TlsError::HandshakeTimeout(timeout));
                }
                std::thread::sleep(HANDSHAKE_POLL_INTERVAL);
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}

fn flush_records(conn: &mut ClientConnection, stream: &mut TcpStream) -> Result<(), ChannelError> {
    while conn.wants_write() {
        match conn.write_tls(stream) {
            Ok(0) => return Err(ChannelError::Closed),
            Ok(_) => {}
            Err(e) => return Err(ChannelError::from_io(e)),
        }
    }
    Ok(())
}
