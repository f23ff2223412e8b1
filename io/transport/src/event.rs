use crate::error::Error;
use crate::request::{Request, Response};
use tokio::sync::oneshot;

/// Identifies the session an event refers to.
pub(crate) type SessionId = u64;

/// Work shipped from a caller to the transport worker.
pub(crate) enum Event {
    Open {
        reply: oneshot::Sender<Result<SessionId, Error>>,
    },
    Connect {
        session: SessionId,
        host: String,
        port: u16,
        common_name: Option<String>,
        reply: oneshot::Sender<Result<(), Error>>,
    },
    Perform {
        session: SessionId,
        request: Request,
        reply: oneshot::Sender<Result<Response, Error>>,
    },
    Close {
        session: SessionId,
    },
    Shutdown,
}

impl Event {
    pub(crate) fn name(&self) -> &'static str {
        match self {
            Event::Open { .. } => "open",
            Event::Connect { .. } => "connect",
            Event::Perform { .. } => "perform",
            Event::Close { .. } => "close",
            Event::Shutdown => "shutdown",
        }
    }
}
