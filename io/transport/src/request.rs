use bytes::Bytes;

/// Response buffer size used when a request does not set one.
pub const DEFAULT_RESPONSE_CAPACITY: usize = 2048;

/// Which header carries a call's result code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusSource {
    /// `:status`
    Http,
    /// `grpc-status`, usually in the trailers.
    Grpc,
}

impl StatusSource {
    pub fn header_name(self) -> &'static [u8] {
        match self {
            StatusSource::Http => b":status",
            StatusSource::Grpc => b"grpc-status",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    pub content_type: String,
    /// Complete `authorization` header value, e.g. `Bearer <token>`.
    pub authorization: Option<String>,
    pub status_source: StatusSource,
}

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub authority: String,
    pub path: String,
    pub payload: Bytes,
    /// Largest response body accepted; more is a protocol error.
    pub response_capacity: usize,
    pub options: RequestOptions,
}

impl Request {
    /// A gRPC unary call: `POST`, `application/grpc+proto`, `grpc-status`.
    pub fn grpc(authority: &str, path: &str, payload: Bytes) -> Self {
        Self {
            method: "POST".to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            payload,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            options: RequestOptions {
                content_type: "application/grpc+proto".to_string(),
                authorization: None,
                status_source: StatusSource::Grpc,
            },
        }
    }

    /// A JSON `POST` whose result code is `:status`.
    pub fn json(authority: &str, path: &str, body: Bytes) -> Self {
        Self {
            method: "POST".to_string(),
            authority: authority.to_string(),
            path: path.to_string(),
            payload: body,
            response_capacity: DEFAULT_RESPONSE_CAPACITY,
            options: RequestOptions {
                content_type: "application/json".to_string(),
                authorization: None,
                status_source: StatusSource::Http,
            },
        }
    }

    pub fn with_authorization(mut self, value: impl Into<String>) -> Self {
        self.options.authorization = Some(value.into());
        self
    }

    pub fn with_response_capacity(mut self, capacity: usize) -> Self {
        self.response_capacity = capacity;
        self
    }
}

/// A completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Value of the request's status header. `0` is a real value here.
    pub status: u32,
    pub body: Bytes,
    /// `grpc-message`, when the server sent one.
    pub message: Option<String>,
}
