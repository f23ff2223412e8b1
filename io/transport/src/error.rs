use http2::{ErrorCode, SessionError};
use std::time::Duration;
use tls_channel::{ChannelError, TlsError};

/// Broad failure classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Failed before any network I/O; never the server's doing.
    Local,
    /// TLS handshake or HTTP/2 send/recv failure.
    Transport,
    /// The response could not be accepted as received.
    Protocol,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Local(&'static str),

    #[error("session is not connected")]
    NotConnected,

    #[error("no transport session available within {0:?}")]
    PoolTimeout(Duration),

    #[error("transport worker has stopped")]
    WorkerGone,

    #[error("tls connect failed: {0}")]
    Tls(#[from] TlsError),

    #[error("tls channel failed: {0}")]
    Channel(#[from] ChannelError),

    #[error("http/2 session failed: {0}")]
    Session(#[from] SessionError),

    #[error("stream reset by peer ({0})")]
    Reset(ErrorCode),

    #[error("no response within {0:?}")]
    DeadlineExceeded(Duration),

    #[error("response body exceeds the {capacity} byte buffer")]
    ResponseTooLarge { capacity: usize },

    #[error("response carried no status header")]
    MissingStatus,

    #[error("unparseable status header {0:?}")]
    InvalidStatus(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Local(_) | Error::NotConnected | Error::PoolTimeout(_) | Error::WorkerGone => {
                ErrorKind::Local
            }
            Error::Tls(_)
            | Error::Channel(_)
            | Error::Session(_)
            | Error::Reset(_)
            | Error::DeadlineExceeded(_) => ErrorKind::Transport,
            Error::ResponseTooLarge { .. } | Error::MissingStatus | Error::InvalidStatus(_) => {
                ErrorKind::Protocol
            }
        }
    }
}
