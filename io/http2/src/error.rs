use crate::callbacks::CallbackError;
use crate::frame::{ErrorCode, FrameError};
use crate::hpack::HpackError;

/// Fatal session errors. After any of these the connection is unusable.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("callback failed: {0}")]
    Callback(CallbackError),

    #[error("connection closed by peer")]
    Eof,

    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    #[error("header compression error: {0}")]
    Hpack(#[from] HpackError),

    #[error("protocol error: {0}")]
    Protocol(&'static str),

    #[error("flow control error: {0}")]
    FlowControl(&'static str),

    #[error("peer sent GOAWAY ({0})")]
    GoAway(ErrorCode),

    #[error("session is shutting down")]
    GoingAway,
}

impl SessionError {
    /// Error code to report to the peer in GOAWAY.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            SessionError::Frame(e) => e.error_code(),
            SessionError::Hpack(_) => ErrorCode::COMPRESSION_ERROR,
            SessionError::Protocol(_) => ErrorCode::PROTOCOL_ERROR,
            SessionError::FlowControl(_) => ErrorCode::FLOW_CONTROL_ERROR,
            SessionError::Callback(_) => ErrorCode::INTERNAL_ERROR,
            SessionError::Eof | SessionError::GoAway(_) | SessionError::GoingAway => {
                ErrorCode::NO_ERROR
            }
        }
    }
}
