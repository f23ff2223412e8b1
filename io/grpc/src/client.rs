//! Unary gRPC client.

use crate::frame::{pack, unpack};
use crate::message::Message;
use crate::status::{Code, Status};
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use transport::{DEFAULT_RESPONSE_CAPACITY, Request, TransportPool};

/// Supplies the `authorization` header for each call.
pub trait TokenSource: Send + Sync {
    /// Complete header value, e.g. `Bearer <token>`. `None` if no token
    /// is available.
    fn bearer(&self) -> Option<String>;
}

impl<T: TokenSource + ?Sized> TokenSource for Arc<T> {
    fn bearer(&self) -> Option<String> {
        (**self).bearer()
    }
}

/// Where calls go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Host the socket connects to.
    pub host: String,
    pub port: u16,
    /// `:authority`, also the certificate name.
    pub authority: String,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        let host = host.into();
        Self {
            authority: host.clone(),
            host,
            port,
        }
    }

    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }
}

/// Issues unary calls, one session per call.
#[derive(Clone)]
pub struct Client {
    pool: TransportPool,
    endpoint: Endpoint,
    tokens: Arc<dyn TokenSource>,
    response_capacity: usize,
    acquire_timeout: Option<Duration>,
}

impl Client {
    pub fn new(pool: TransportPool, endpoint: Endpoint, tokens: Arc<dyn TokenSource>) -> Self {
        Self {
            pool,
            endpoint,
            tokens,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            acquire_timeout: None,
        }
    }

    /// Largest response frame accepted.
    pub fn with_response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = capacity;
        self
    }

    /// Bound the wait for the session slot. Unbounded by default.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Call `path` and decode the response message.
    pub fn unary<Req: Message, Resp: Message>(
        &self,
        path: &str,
        request: &Req,
    ) -> Result<Resp, Status> {
        let body = self.call(path, request)?;
        unpack::<Resp>(&body).map_err(|e| {
            tracing::warn!(path, step = "unpack", error = %e, "grpc call failed");
            Status::new(Code::Internal, format!("failed to decode response: {e}"))
        })
    }

    /// Call `path`, discarding any response message.
    pub fn unary_empty<Req: Message>(&self, path: &str, request: &Req) -> Result<(), Status> {
        self.call(path, request).map(|_| ())
    }

    /// One full acquire/connect/perform cycle. The session is released
    /// when it goes out of scope on every path.
    fn call<Req: Message>(&self, path: &str, request: &Req) -> Result<Bytes, Status> {
        let fail = |step: &'static str, error: &dyn std::fmt::Display| {
            tracing::warn!(path, step, error = %error, "grpc call failed");
            Status::local(format!("{step}: {error}"))
        };

        let mut session = self
            .pool
            .acquire(self.acquire_timeout)
            .map_err(|e| fail("acquire", &e))?;

        tracing::debug!(
            path,
            host = %self.endpoint.host,
            port = self.endpoint.port,
            "grpc connecting"
        );
        session
            .connect(
                &self.endpoint.host,
                self.endpoint.port,
                Some(&self.endpoint.authority),
            )
            .map_err(|e| fail("connect", &e))?;

        let authorization = self
            .tokens
            .bearer()
            .ok_or_else(|| fail("auth", &"no access token available"))?;

        let payload = pack(request).map_err(|e| fail("pack", &e))?;
        let request = Request::grpc(&self.endpoint.authority, path, payload)
            .with_authorization(authorization)
            .with_response_capacity(self.response_capacity);

        tracing::debug!(path, "grpc performing");
        let response = session.perform(request).map_err(|e| fail("perform", &e))?;

        let status = Status::from_wire(response.status, response.message);
        if !status.is_ok() {
            tracing::warn!(path, status = %status, "grpc call returned error status");
            return Err(status);
        }

        tracing::debug!(path, len = response.body.len(), "grpc call complete");
        Ok(response.body)
    }
}
