use crate::config::PoolConfig;
use crate::error::Error;
use crate::event::{Event, SessionId};
use crate::request::{Request, Response};
use crate::worker::Worker;
use crossbeam_channel::Sender;
use parking_lot::{ArcMutexGuard, Mutex, RawMutex};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Depth of the worker's event queue. The session mutex keeps at most one
/// caller event in flight; the spare slot carries `Close`/`Shutdown`.
const EVENT_QUEUE_DEPTH: usize = 2;

struct Inner {
    slot: Arc<Mutex<()>>,
    events: Sender<Event>,
    worker: Option<JoinHandle<()>>,
}

impl Inner {
    /// Send `event` and block until the worker replies on `rx`.
    fn call<T>(
        &self,
        event: Event,
        rx: oneshot::Receiver<Result<T, Error>>,
    ) -> Result<T, Error> {
        self.events.send(event).map_err(|_| Error::WorkerGone)?;
        rx.blocking_recv().map_err(|_| Error::WorkerGone)?
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

/// Capacity-one pool of HTTP/2 over TLS sessions.
///
/// Cloning shares the same slot and worker. The worker stops once the
/// last clone and the last [`Session`] are dropped.
#[derive(Clone)]
pub struct TransportPool {
    inner: Arc<Inner>,
}

impl TransportPool {
    /// Spawn the transport worker.
    pub fn new(config: PoolConfig) -> Result<Self, Error> {
        let (tx, rx) = crossbeam_channel::bounded(EVENT_QUEUE_DEPTH);
        let worker = Worker::new(config);

        let handle = std::thread::Builder::new()
            .name("transport-worker".to_string())
            .spawn(move || worker.run(rx))
            .map_err(|_| Error::Local("failed to spawn transport worker"))?;

        Ok(Self {
            inner: Arc::new(Inner {
                slot: Arc::new(Mutex::new(())),
                events: tx,
                worker: Some(handle),
            }),
        })
    }

    /// Take the session slot, waiting at most `timeout` (`None` waits
    /// forever), and open a fresh, unconnected session in it.
    ///
    /// On failure the slot is left free.
    pub fn acquire(&self, timeout: Option<Duration>) -> Result<Session, Error> {
        let guard = match timeout {
            Some(timeout) => self
                .inner
                .slot
                .try_lock_arc_for(timeout)
                .ok_or(Error::PoolTimeout(timeout))?,
            None => self.inner.slot.lock_arc(),
        };

        let (reply, rx) = oneshot::channel();
        let id = self.inner.call(Event::Open { reply }, rx)?;

        tracing::debug!(session = id, "transport session acquired");
        Ok(Session {
            id,
            pool: self.inner.clone(),
            guard: Some(guard),
        })
    }
}

/// Exclusive handle on the pool's single session.
///
/// Releasing (explicitly or by drop) tears the session down on the worker
/// and frees the slot for the next `acquire`.
pub struct Session {
    id: SessionId,
    pool: Arc<Inner>,
    guard: Option<ArcMutexGuard<RawMutex, ()>>,
}

impl Session {
    /// Connect to `host:port`, validating the certificate against
    /// `common_name` when given. Allowed once per session.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        common_name: Option<&str>,
    ) -> Result<(), Error> {
        let (reply, rx) = oneshot::channel();
        let event = Event::Connect {
            session: self.id,
            host: host.to_string(),
            port,
            common_name: common_name.map(str::to_string),
            reply,
        };
        self.pool.call(event, rx)
    }

    /// Run one request/response exchange on the connected session.
    pub fn perform(&mut self, request: Request) -> Result<Response, Error> {
        let (reply, rx) = oneshot::channel();
        let event = Event::Perform {
            session: self.id,
            request,
            reply,
        };
        self.pool.call(event, rx)
    }

    /// Close the session and free the slot. Same as dropping it.
    pub fn release(self) {}
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(guard) = self.guard.take() {
            let _ = self.pool.events.send(Event::Close { session: self.id });
            drop(guard);
            tracing::debug!(session = self.id, "transport session released");
        }
    }
}
