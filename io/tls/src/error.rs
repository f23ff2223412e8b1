use std::io;
use std::time::Duration;

/// Errors raised while configuring or establishing a TLS channel.
#[derive(Debug, thiserror::Error)]
pub enum TlsError {
    #[error("failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },

    #[error("no addresses found for {0}")]
    NoAddress(String),

    #[error("tcp connect failed: {0}")]
    Connect(#[source] io::Error),

    #[error("invalid server name: {0}")]
    InvalidServerName(String),

    #[error("tls error: {0}")]
    Tls(#[from] rustls::Error),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("handshake did not complete within {0:?}")]
    HandshakeTimeout(Duration),

    #[error("peer closed the connection during the handshake")]
    HandshakeEof,

    #[error("peer did not negotiate an offered ALPN protocol")]
    AlpnMismatch,

    #[error("channel has already been connected")]
    AlreadyConnected,

    #[error("invalid certificate: {0}")]
    Certificate(String),
}

/// Outcome of a failed `read`/`write` on an established channel.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// Retryable: no progress was possible without blocking.
    #[error("operation would block")]
    WouldBlock,

    /// The peer closed the connection (close_notify or TCP EOF).
    #[error("connection closed by peer")]
    Closed,

    /// Unrecoverable; the current call must be aborted.
    #[error("fatal channel error: {0}")]
    Fatal(#[source] io::Error),
}

impl ChannelError {
    pub(crate) fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::WouldBlock => ChannelError::WouldBlock,
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ChannelError::Closed,
            _ => ChannelError::Fatal(e),
        }
    }
}
