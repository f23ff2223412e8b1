//! transport - one HTTP/2 over TLS session, serialized across threads.
//!
//! A [`TransportPool`] owns a single session slot guarded by a mutex and a
//! dedicated `transport-worker` thread that performs every piece of network
//! I/O. Callers [`acquire`](TransportPool::acquire) the slot, then
//! [`connect`](Session::connect) and [`perform`](Session::perform) requests;
//! each of those is shipped to the worker as an event carrying a oneshot
//! reply, and the caller blocks until the worker answers.
//!
//! ```ignore
//! use transport::{PoolConfig, Request, TransportPool};
//!
//! let pool = TransportPool::new(PoolConfig::default())?;
//! let mut session = pool.acquire(None)?;
//! session.connect("api.example.com", 443, None)?;
//! let response = session.perform(Request::grpc("api.example.com", "/pkg.Svc/Method", payload))?;
//! session.release();
//! ```

mod adapter;
mod config;
mod error;
mod event;
mod pool;
mod request;
mod worker;

pub use config::PoolConfig;
pub use error::{Error, ErrorKind};
pub use pool::{Session, TransportPool};
pub use request::{DEFAULT_RESPONSE_CAPACITY, Request, RequestOptions, Response, StatusSource};
