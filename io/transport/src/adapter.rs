//! Bridges the HTTP/2 engine to a TLS channel for one request at a time.

use crate::config::PoolConfig;
use crate::error::Error;
use crate::request::{Request, Response};
use bytes::BytesMut;
use http2::hpack::HeaderField;
use http2::{CallbackError, Callbacks, DataChunk, ErrorCode, SessionError, Settings, StreamId};
use std::time::{Duration, Instant};
use tls_channel::{ChannelError, ConnectOptions, TlsChannel};

/// Sleep between loop turns that moved no bytes.
const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Why a callback refused to continue.
enum Fault {
    Overflow { capacity: usize },
    Channel(ChannelError),
}

/// Accumulates one response while its request streams out.
struct CallState<'a> {
    stream_id: Option<StreamId>,
    payload: &'a [u8],
    cursor: usize,
    status_header: &'static [u8],
    status: Option<u32>,
    invalid_status: Option<String>,
    message: Option<String>,
    body: BytesMut,
    capacity: usize,
    complete: bool,
    reset: Option<ErrorCode>,
    fault: Option<Fault>,
}

impl<'a> CallState<'a> {
    fn new(request: &'a Request) -> Self {
        Self {
            stream_id: None,
            payload: &request.payload,
            cursor: 0,
            status_header: request.options.status_source.header_name(),
            status: None,
            invalid_status: None,
            message: None,
            body: BytesMut::with_capacity(request.response_capacity),
            capacity: request.response_capacity,
            complete: false,
            reset: None,
            fault: None,
        }
    }

    /// State for driving connection-level frames with no call in flight.
    fn idle() -> CallState<'static> {
        CallState {
            stream_id: None,
            payload: &[],
            cursor: 0,
            status_header: b":status",
            status: None,
            invalid_status: None,
            message: None,
            body: BytesMut::new(),
            capacity: 0,
            complete: false,
            reset: None,
            fault: None,
        }
    }

    fn is_current(&self, stream_id: StreamId) -> bool {
        self.stream_id == Some(stream_id)
    }
}

/// The engine's view of the outside world during one `send`/`recv`.
struct Bridge<'c, 's, 'a> {
    channel: &'c mut TlsChannel,
    call: &'s mut CallState<'a>,
}

impl Bridge<'_, '_, '_> {
    fn channel_result(
        &mut self,
        result: Result<usize, ChannelError>,
    ) -> Result<usize, CallbackError> {
        match result {
            Ok(n) => Ok(n),
            Err(ChannelError::WouldBlock) => Err(CallbackError::WouldBlock),
            Err(ChannelError::Closed) => Err(CallbackError::Eof),
            Err(e) => {
                self.call.fault = Some(Fault::Channel(e));
                Err(CallbackError::Failure)
            }
        }
    }
}

impl Callbacks for Bridge<'_, '_, '_> {
    fn send(&mut self, data: &[u8]) -> Result<usize, CallbackError> {
        let result = self.channel.write(data);
        self.channel_result(result)
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, CallbackError> {
        let result = self.channel.read(buf);
        self.channel_result(result)
    }

    fn on_header(
        &mut self,
        stream_id: StreamId,
        name: &[u8],
        value: &[u8],
    ) -> Result<(), CallbackError> {
        if !self.call.is_current(stream_id) {
            return Ok(());
        }

        if name == self.call.status_header {
            let text = String::from_utf8_lossy(value);
            match text.trim().parse::<u32>() {
                Ok(status) => self.call.status = Some(status),
                Err(_) => self.call.invalid_status = Some(text.into_owned()),
            }
        } else if name == b"grpc-message" {
            self.call.message = Some(String::from_utf8_lossy(value).into_owned());
        }
        Ok(())
    }

    fn on_data_chunk(&mut self, stream_id: StreamId, data: &[u8]) -> Result<(), CallbackError> {
        if !self.call.is_current(stream_id) {
            return Ok(());
        }

        if self.call.body.len() + data.len() > self.call.capacity {
            self.call.fault = Some(Fault::Overflow {
                capacity: self.call.capacity,
            });
            return Err(CallbackError::Failure);
        }
        self.call.body.extend_from_slice(data);
        Ok(())
    }

    fn on_stream_close(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
    ) -> Result<(), CallbackError> {
        if self.call.is_current(stream_id) {
            self.call.complete = true;
            if error_code != ErrorCode::NO_ERROR {
                self.call.reset = Some(error_code);
            }
        }
        Ok(())
    }

    fn read_data(
        &mut self,
        stream_id: StreamId,
        buf: &mut [u8],
    ) -> Result<DataChunk, CallbackError> {
        if !self.call.is_current(stream_id) {
            return Ok(DataChunk::eof(0));
        }

        let remaining = &self.call.payload[self.call.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.call.cursor += n;

        if self.call.cursor == self.call.payload.len() {
            Ok(DataChunk::eof(n))
        } else {
            Ok(DataChunk::more(n))
        }
    }
}

/// A TLS channel and its HTTP/2 engine.
///
/// Lives on the worker thread only. Connects at most once.
pub(crate) struct Http2Session {
    channel: TlsChannel,
    engine: http2::Session,
    connect_timeout: Duration,
    handshake_timeout: Duration,
    perform_timeout: Duration,
    user_agent: String,
    connect_attempted: bool,
}

impl Http2Session {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        Self {
            channel: TlsChannel::new(config.tls.clone()),
            engine: http2::Session::client(Settings::client()),
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
            perform_timeout: config.perform_timeout,
            user_agent: config.user_agent.clone(),
            connect_attempted: false,
        }
    }

    /// TLS handshake, then the HTTP/2 preface and SETTINGS.
    pub(crate) fn connect(
        &mut self,
        host: &str,
        port: u16,
        common_name: Option<String>,
    ) -> Result<(), Error> {
        if self.connect_attempted {
            return Err(Error::Local(
                "session already connected; acquire a new session to reconnect",
            ));
        }
        self.connect_attempted = true;

        let options = ConnectOptions {
            common_name,
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
        };
        self.channel.connect(host, port, &options)?;

        let mut call = CallState::idle();
        let result = step(&mut self.engine, &mut self.channel, &mut call);
        if let Err(e) = result {
            self.channel.close();
            return Err(e);
        }
        Ok(())
    }

    /// Submit `request` and drive the engine until its stream closes or
    /// the perform deadline passes.
    pub(crate) fn perform(&mut self, request: &Request) -> Result<Response, Error> {
        if !self.channel.is_connected() {
            return Err(Error::NotConnected);
        }

        let headers = request_headers(request, &self.user_agent);
        let stream_id = self
            .engine
            .submit_request(&headers, !request.payload.is_empty())?;

        let mut call = CallState::new(request);
        call.stream_id = Some(stream_id);

        tracing::trace!(
            stream = %stream_id,
            path = %request.path,
            len = request.payload.len(),
            "request submitted"
        );

        let deadline = Instant::now() + self.perform_timeout;
        loop {
            let progressed = match step(&mut self.engine, &mut self.channel, &mut call) {
                Ok(progressed) => progressed,
                Err(e) => {
                    self.channel.close();
                    return Err(e);
                }
            };

            if call.complete {
                break;
            }
            if Instant::now() >= deadline {
                self.channel.close();
                return Err(Error::DeadlineExceeded(self.perform_timeout));
            }
            if !progressed {
                std::thread::sleep(IDLE_POLL_INTERVAL);
            }
        }

        if let Some(value) = call.invalid_status {
            return Err(Error::InvalidStatus(value));
        }
        match (call.status, call.reset) {
            (Some(status), _) => Ok(Response {
                status,
                body: call.body.freeze(),
                message: call.message,
            }),
            (None, Some(code)) => Err(Error::Reset(code)),
            (None, None) => Err(Error::MissingStatus),
        }
    }

    pub(crate) fn close(&mut self) {
        if self.channel.is_connected() {
            self.engine.terminate(ErrorCode::NO_ERROR);
            let mut call = CallState::idle();
            let mut bridge = Bridge {
                channel: &mut self.channel,
                call: &mut call,
            };
            let _ = self.engine.send(&mut bridge);
        }
        self.channel.close();
    }
}

/// One send/flush/recv turn. Returns whether any bytes moved.
fn step(
    engine: &mut http2::Session,
    channel: &mut TlsChannel,
    call: &mut CallState<'_>,
) -> Result<bool, Error> {
    let mut bridge = Bridge { channel, call };

    let sent = engine.send(&mut bridge);
    let sent = sent.map_err(|e| session_error(e, bridge.call))?;

    if bridge.channel.wants_write() {
        match bridge.channel.flush() {
            Ok(()) | Err(ChannelError::WouldBlock) => {}
            Err(e) => return Err(Error::Channel(e)),
        }
    }

    let received = engine.recv(&mut bridge);
    let received = received.map_err(|e| session_error(e, bridge.call))?;

    Ok(sent > 0 || received > 0)
}

fn session_error(error: SessionError, call: &mut CallState<'_>) -> Error {
    match (error, call.fault.take()) {
        (SessionError::Callback(CallbackError::Failure), Some(Fault::Overflow { capacity })) => {
            Error::ResponseTooLarge { capacity }
        }
        (SessionError::Callback(CallbackError::Failure), Some(Fault::Channel(e))) => {
            Error::Channel(e)
        }
        (error, _) => Error::Session(error),
    }
}

/// Request header list in wire order.
fn request_headers(request: &Request, user_agent: &str) -> Vec<HeaderField> {
    let mut headers = Vec::with_capacity(9);
    headers.push(HeaderField::new(":method", request.method.as_str()));
    headers.push(HeaderField::new(":scheme", "https"));
    headers.push(HeaderField::new(":path", request.path.as_str()));
    headers.push(HeaderField::new(":authority", request.authority.as_str()));
    headers.push(HeaderField::new(
        "content-length",
        request.payload.len().to_string(),
    ));
    headers.push(HeaderField::new(
        "content-type",
        request.options.content_type.as_str(),
    ));
    if let Some(authorization) = &request.options.authorization {
        headers.push(HeaderField::new("authorization", authorization.as_str()));
    }
    headers.push(HeaderField::new("user-agent", user_agent));
    headers.push(HeaderField::new("te", "trailers"));
    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn names(headers: &[HeaderField]) -> Vec<String> {
        headers
            .iter()
            .map(|h| String::from_utf8_lossy(&h.name).into_owned())
            .collect()
    }

    #[test]
    fn test_header_order() {
        let request = Request::grpc("api.local", "/svc/Call", Bytes::from_static(b"abc"))
            .with_authorization("Bearer t");
        let headers = request_headers(&request, "ua/1");

        assert_eq!(
            names(&headers),
            vec![
                ":method",
                ":scheme",
                ":path",
                ":authority",
                "content-length",
                "content-type",
                "authorization",
                "user-agent",
                "te",
            ]
        );
        assert_eq!(headers[4].value, b"3");
        assert_eq!(headers[5].value, b"application/grpc+proto");
        assert_eq!(headers[8].value, b"trailers");
    }

    #[test]
    fn test_header_order_without_authorization() {
        let request = Request::json("auth.local", "/oauth/token", Bytes::new());
        let headers = request_headers(&request, "ua/1");
        assert!(!names(&headers).contains(&"authorization".to_string()));
        assert_eq!(headers[4].value, b"0");
    }

    fn call_for(request: &Request) -> CallState<'_> {
        let mut call = CallState::new(request);
        call.stream_id = Some(StreamId::new(1));
        call
    }

    fn with_bridge<R>(call: &mut CallState<'_>, f: impl FnOnce(&mut Bridge<'_, '_, '_>) -> R) -> R {
        let mut channel = TlsChannel::new(tls_channel::TlsConfig::new());
        let mut bridge = Bridge {
            channel: &mut channel,
            call,
        };
        f(&mut bridge)
    }

    #[test]
    fn test_grpc_status_zero_is_recorded() {
        let request = Request::grpc("a", "/p", Bytes::new());
        let mut call = call_for(&request);
        with_bridge(&mut call, |b| {
            b.on_header(StreamId::new(1), b":status", b"200").unwrap();
            b.on_header(StreamId::new(1), b"grpc-status", b"0").unwrap();
        });
        assert_eq!(call.status, Some(0));
    }

    #[test]
    fn test_http_status_source() {
        let request = Request::json("a", "/p", Bytes::new());
        let mut call = call_for(&request);
        with_bridge(&mut call, |b| {
            b.on_header(StreamId::new(1), b":status", b"403").unwrap();
            b.on_header(StreamId::new(1), b"grpc-status", b"0").unwrap();
        });
        assert_eq!(call.status, Some(403));
    }

    #[test]
    fn test_other_streams_ignored() {
        let request = Request::grpc("a", "/p", Bytes::new());
        let mut call = call_for(&request);
        with_bridge(&mut call, |b| {
            b.on_header(StreamId::new(3), b"grpc-status", b"5").unwrap();
            b.on_data_chunk(StreamId::new(3), b"zzz").unwrap();
            b.on_stream_close(StreamId::new(3), ErrorCode::NO_ERROR).unwrap();
        });
        assert_eq!(call.status, None);
        assert!(call.body.is_empty());
        assert!(!call.complete);
    }

    #[test]
    fn test_data_overflow_is_rejected() {
        let request = Request::grpc("a", "/p", Bytes::new()).with_response_capacity(4);
        let mut call = call_for(&request);
        let result = with_bridge(&mut call, |b| {
            b.on_data_chunk(StreamId::new(1), b"abc").unwrap();
            b.on_data_chunk(StreamId::new(1), b"de")
        });
        assert_eq!(result, Err(CallbackError::Failure));
        assert_eq!(&call.body[..], b"abc");
        assert!(matches!(call.fault, Some(Fault::Overflow { capacity: 4 })));
    }

    #[test]
    fn test_payload_streams_to_eof() {
        let request = Request::grpc("a", "/p", Bytes::from_static(b"hello world"));
        let mut call = call_for(&request);
        let (first, second) = with_bridge(&mut call, |b| {
            let mut buf = [0u8; 6];
            let first = b.read_data(StreamId::new(1), &mut buf).unwrap();
            let second = b.read_data(StreamId::new(1), &mut buf).unwrap();
            (first, second)
        });
        assert_eq!(first, DataChunk::more(6));
        assert_eq!(second, DataChunk::eof(5));
    }

    #[test]
    fn test_reset_is_recorded() {
        let request = Request::grpc("a", "/p", Bytes::new());
        let mut call = call_for(&request);
        with_bridge(&mut call, |b| {
            b.on_stream_close(StreamId::new(1), ErrorCode::CANCEL).unwrap();
        });
        assert!(call.complete);
        assert_eq!(call.reset, Some(ErrorCode::CANCEL));
    }

    #[test]
    fn test_invalid_status_value() {
        let request = Request::grpc("a", "/p", Bytes::new());
        let mut call = call_for(&request);
        with_bridge(&mut call, |b| {
            b.on_header(StreamId::new(1), b"grpc-status", b"ok").unwrap();
        });
        assert_eq!(call.status, None);
        assert_eq!(call.invalid_status.as_deref(), Some("ok"));
    }

    #[test]
    fn test_perform_requires_connection() {
        let mut session = Http2Session::new(&PoolConfig::default());
        let request = Request::grpc("a", "/p", Bytes::new());
        assert!(matches!(
            session.perform(&request),
            Err(Error::NotConnected)
        ));
        session.close();
    }
}
