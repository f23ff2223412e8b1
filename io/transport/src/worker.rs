//! The thread that owns the live session and does all network I/O.

use crate::adapter::Http2Session;
use crate::config::PoolConfig;
use crate::error::Error;
use crate::event::{Event, SessionId};
use crossbeam_channel::Receiver;

pub(crate) struct Worker {
    config: PoolConfig,
    next_id: SessionId,
    current: Option<(SessionId, Http2Session)>,
}

impl Worker {
    pub(crate) fn new(config: PoolConfig) -> Self {
        Self {
            config,
            next_id: 1,
            current: None,
        }
    }

    /// Process events one at a time until shutdown or every sender is gone.
    pub(crate) fn run(mut self, events: Receiver<Event>) {
        tracing::debug!("transport worker started");

        while let Ok(event) = events.recv() {
            tracing::trace!(event = event.name(), "transport event");
            match event {
                Event::Open { reply } => {
                    let _ = reply.send(Ok(self.open()));
                }
                Event::Connect {
                    session,
                    host,
                    port,
                    common_name,
                    reply,
                } => {
                    let result = self
                        .session(session)
                        .and_then(|s| s.connect(&host, port, common_name));
                    let _ = reply.send(result);
                }
                Event::Perform {
                    session,
                    request,
                    reply,
                } => {
                    let result = self.session(session).and_then(|s| s.perform(&request));
                    let _ = reply.send(result);
                }
                Event::Close { session } => self.close(session),
                Event::Shutdown => break,
            }
        }

        if let Some((_, mut session)) = self.current.take() {
            session.close();
        }
        tracing::debug!("transport worker stopped");
    }

    fn open(&mut self) -> SessionId {
        if let Some((id, mut stale)) = self.current.take() {
            tracing::warn!(session = id, "replacing a session that was never closed");
            stale.close();
        }

        let id = self.next_id;
        self.next_id += 1;
        self.current = Some((id, Http2Session::new(&self.config)));
        id
    }

    fn session(&mut self, id: SessionId) -> Result<&mut Http2Session, Error> {
        match self.current.as_mut() {
            Some((current, session)) if *current == id => Ok(session),
            _ => Err(Error::Local("session is no longer open")),
        }
    }

    fn close(&mut self, id: SessionId) {
        match self.current.take() {
            Some((current, mut session)) if current == id => session.close(),
            other => self.current = other,
        }
    }
}
