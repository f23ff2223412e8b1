//! HTTP/2 client session state machine.

use crate::callbacks::{CallbackError, Callbacks};
use crate::error::SessionError;
use crate::frame::{
    self, CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, ErrorCode, FRAME_HEADER_SIZE, Frame,
    MAX_WINDOW_SIZE, Setting, StreamId,
};
use crate::hpack::{Decoder, Encoder, HeaderField};
use crate::settings::Settings;
use bytes::{Buf, BytesMut};
use std::collections::BTreeMap;

/// Size of the scratch buffer handed to `Callbacks::recv`.
const READ_CHUNK: usize = 16 * 1024;

/// Stop pulling request body while this many bytes wait for the socket.
const OUTBOUND_HIGH_WATER: usize = 64 * 1024;

#[derive(Debug)]
struct Stream {
    send_window: i64,
    /// Received DATA bytes not yet returned to the peer via WINDOW_UPDATE.
    recv_unacked: u32,
    local_closed: bool,
    remote_closed: bool,
}

/// A header block split across HEADERS and CONTINUATION frames.
struct PartialBlock {
    stream_id: StreamId,
    end_stream: bool,
    block: BytesMut,
}

/// HTTP/2 client session.
///
/// Construction queues the connection preface and the local SETTINGS
/// frame; they go out with the first [`send`](Session::send). Requests are
/// submitted with [`submit_request`](Session::submit_request) and progress
/// only while the owner keeps calling `send` and `recv`.
pub struct Session {
    local: Settings,
    remote: Settings,
    encoder: Encoder,
    decoder: Decoder,
    outbound: BytesMut,
    inbound: BytesMut,
    read_buf: Box<[u8]>,
    data_buf: Vec<u8>,
    streams: BTreeMap<StreamId, Stream>,
    next_stream_id: u32,
    conn_send_window: i64,
    conn_recv_unacked: u32,
    partial: Option<PartialBlock>,
    goaway_received: Option<ErrorCode>,
    goaway_sent: bool,
}

impl Session {
    /// Create a client session advertising `settings`.
    pub fn client(settings: Settings) -> Self {
        let mut outbound = BytesMut::with_capacity(READ_CHUNK);
        outbound.extend_from_slice(CONNECTION_PREFACE);
        Frame::Settings {
            ack: false,
            settings: settings.to_params(),
        }
        .encode(&mut outbound);

        Self {
            local: settings,
            remote: Settings::default(),
            encoder: Encoder::new(),
            decoder: Decoder::with_table_size(settings.header_table_size as usize),
            outbound,
            inbound: BytesMut::with_capacity(READ_CHUNK),
            read_buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            data_buf: Vec::new(),
            streams: BTreeMap::new(),
            next_stream_id: 1,
            conn_send_window: DEFAULT_INITIAL_WINDOW_SIZE as i64,
            conn_recv_unacked: 0,
            partial: None,
            goaway_received: None,
            goaway_sent: false,
        }
    }

    /// Queue an additional SETTINGS frame.
    pub fn submit_settings(&mut self, settings: &[Setting]) -> Result<(), SessionError> {
        let mut local = self.local;
        for setting in settings {
            local.apply(*setting)?;
        }
        self.local = local;

        Frame::Settings {
            ack: false,
            settings: settings.to_vec(),
        }
        .encode(&mut self.outbound);
        Ok(())
    }

    /// Queue a request. When `has_body` is set, the body is pulled from
    /// [`Callbacks::read_data`] during `send` until it reports EOF.
    pub fn submit_request(
        &mut self,
        headers: &[HeaderField],
        has_body: bool,
    ) -> Result<StreamId, SessionError> {
        if self.goaway_received.is_some() || self.goaway_sent {
            return Err(SessionError::GoingAway);
        }
        if self.next_stream_id > MAX_WINDOW_SIZE {
            return Err(SessionError::Protocol("stream ids exhausted"));
        }

        let stream_id = StreamId::new(self.next_stream_id);
        self.next_stream_id += 2;

        let mut block = Vec::with_capacity(256);
        self.encoder.encode(headers, &mut block);
        frame::encode_header_block(
            stream_id,
            &block,
            !has_body,
            self.remote.max_frame_size as usize,
            &mut self.outbound,
        );

        self.streams.insert(
            stream_id,
            Stream {
                send_window: self.remote.initial_window_size as i64,
                recv_unacked: 0,
                local_closed: !has_body,
                remote_closed: false,
            },
        );

        tracing::trace!(stream = %stream_id, has_body, "request submitted");
        Ok(stream_id)
    }

    /// Queue GOAWAY; no further requests may be submitted.
    pub fn terminate(&mut self, error_code: ErrorCode) {
        if self.goaway_sent {
            return;
        }
        self.goaway_sent = true;
        let last = self
            .next_stream_id
            .checked_sub(2)
            .map(StreamId::new)
            .unwrap_or(StreamId::CONNECTION);
        Frame::GoAway {
            last_stream_id: last,
            error_code,
            debug_data: Default::default(),
        }
        .encode(&mut self.outbound);
    }

    /// True while frames or request body are waiting to be sent.
    pub fn wants_write(&self) -> bool {
        !self.outbound.is_empty() || self.streams.values().any(|s| !s.local_closed)
    }

    /// True while any stream is open.
    pub fn has_open_streams(&self) -> bool {
        !self.streams.is_empty()
    }

    /// GOAWAY error code, if the peer sent one.
    pub fn goaway_received(&self) -> Option<ErrorCode> {
        self.goaway_received
    }

    /// Settings the peer advertised.
    pub fn remote_settings(&self) -> &Settings {
        &self.remote
    }

    /// Write queued frames and pull request body while flow control allows.
    ///
    /// Returns the number of bytes handed to `Callbacks::send`; stops
    /// quietly when the callback would block.
    pub fn send<C: Callbacks + ?Sized>(&mut self, cb: &mut C) -> Result<usize, SessionError> {
        let mut total = 0;

        loop {
            self.produce_data(cb)?;

            if self.outbound.is_empty() {
                return Ok(total);
            }

            match cb.send(&self.outbound) {
                Ok(0) => return Ok(total),
                Ok(n) => {
                    let n = n.min(self.outbound.len());
                    self.outbound.advance(n);
                    total += n;
                }
                Err(CallbackError::WouldBlock) => return Ok(total),
                Err(CallbackError::Eof) => return Err(SessionError::Eof),
                Err(e) => return Err(SessionError::Callback(e)),
            }
        }
    }

    /// Read from `Callbacks::recv` until it would block, dispatching every
    /// complete frame.
    ///
    /// Returns the number of bytes read.
    pub fn recv<C: Callbacks + ?Sized>(&mut self, cb: &mut C) -> Result<usize, SessionError> {
        let mut total = 0;

        loop {
            let n = match cb.recv(&mut self.read_buf) {
                Ok(0) => return Ok(total),
                Ok(n) => n.min(self.read_buf.len()),
                Err(CallbackError::WouldBlock) => return Ok(total),
                Err(CallbackError::Eof) => return Err(SessionError::Eof),
                Err(e) => return Err(SessionError::Callback(e)),
            };

            self.inbound.extend_from_slice(&self.read_buf[..n]);
            total += n;

            while let Some(frame) = frame::decode(&mut self.inbound, self.local.max_frame_size)? {
                self.handle_frame(frame, cb)?;
            }
        }
    }

    fn produce_data<C: Callbacks + ?Sized>(&mut self, cb: &mut C) -> Result<(), SessionError> {
        let pending: Vec<StreamId> = self
            .streams
            .iter()
            .filter(|(_, s)| !s.local_closed)
            .map(|(id, _)| *id)
            .collect();

        for stream_id in pending {
            loop {
                if self.outbound.len() >= OUTBOUND_HIGH_WATER {
                    return Ok(());
                }

                let Some(stream) = self.streams.get(&stream_id) else {
                    break;
                };
                let window = self
                    .conn_send_window
                    .min(stream.send_window)
                    .min(self.remote.max_frame_size as i64);
                if window <= 0 {
                    break;
                }

                self.data_buf.resize(window as usize, 0);
                let chunk = match cb.read_data(stream_id, &mut self.data_buf) {
                    Ok(chunk) => chunk,
                    Err(CallbackError::WouldBlock) => break,
                    Err(e) => return Err(SessionError::Callback(e)),
                };
                let len = chunk.len.min(self.data_buf.len());

                if len == 0 && !chunk.eof {
                    break;
                }

                self.outbound.reserve(FRAME_HEADER_SIZE + len);
                frame::encode_data(stream_id, &self.data_buf[..len], chunk.eof, &mut self.outbound);
                self.conn_send_window -= len as i64;

                let Some(stream) = self.streams.get_mut(&stream_id) else {
                    break;
                };
                stream.send_window -= len as i64;

                if chunk.eof {
                    stream.local_closed = true;
                    if stream.remote_closed {
                        self.close_stream(stream_id, ErrorCode::NO_ERROR, cb)?;
                    }
                    break;
                }
            }
        }

        Ok(())
    }

    fn handle_frame<C: Callbacks + ?Sized>(
        &mut self,
        frame: Frame,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        if let Some(partial) = &self.partial {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == partial.stream_id => {}
                _ => return Err(SessionError::Protocol("expected CONTINUATION")),
            }
        }

        match frame {
            Frame::Settings { ack: true, .. } => {}
            Frame::Settings {
                ack: false,
                settings,
            } => self.on_settings(&settings)?,
            Frame::Ping { ack: false, payload } => {
                Frame::Ping { ack: true, payload }.encode(&mut self.outbound);
            }
            Frame::Ping { ack: true, .. } => {}
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => self.on_window_update(stream_id, increment)?,
            Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            } => self.on_goaway(last_stream_id, error_code, cb)?,
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                if self.streams.contains_key(&stream_id) {
                    self.close_stream(stream_id, error_code, cb)?;
                }
            }
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                block,
            } => {
                if !self.is_known_stream(stream_id) {
                    return Err(SessionError::Protocol("HEADERS on an idle stream"));
                }
                if end_headers {
                    self.on_header_block(stream_id, &block, end_stream, cb)?;
                } else {
                    self.partial = Some(PartialBlock {
                        stream_id,
                        end_stream,
                        block: BytesMut::from(&block[..]),
                    });
                }
            }
            Frame::Continuation {
                stream_id,
                end_headers,
                block,
            } => {
                let Some(mut partial) = self.partial.take() else {
                    return Err(SessionError::Protocol("unexpected CONTINUATION"));
                };
                partial.block.extend_from_slice(&block);
                if end_headers {
                    self.on_header_block(stream_id, &partial.block, partial.end_stream, cb)?;
                } else {
                    self.partial = Some(partial);
                }
            }
            Frame::Data {
                stream_id,
                end_stream,
                data,
                flow_len,
            } => self.on_data(stream_id, end_stream, &data, flow_len, cb)?,
            Frame::PushPromise { .. } => {
                return Err(SessionError::Protocol("PUSH_PROMISE with push disabled"));
            }
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }

        Ok(())
    }

    fn on_settings(&mut self, settings: &[Setting]) -> Result<(), SessionError> {
        let previous_window = self.remote.initial_window_size as i64;

        for setting in settings {
            self.remote.apply(*setting)?;
        }

        let delta = self.remote.initial_window_size as i64 - previous_window;
        if delta != 0 {
            for stream in self.streams.values_mut() {
                stream.send_window += delta;
                if stream.send_window > MAX_WINDOW_SIZE as i64 {
                    return Err(SessionError::FlowControl("stream window overflow"));
                }
            }
        }

        tracing::trace!(?settings, "peer settings applied");
        Frame::Settings {
            ack: true,
            settings: Vec::new(),
        }
        .encode(&mut self.outbound);
        Ok(())
    }

    fn on_window_update(
        &mut self,
        stream_id: StreamId,
        increment: u32,
    ) -> Result<(), SessionError> {
        let window = if stream_id.is_connection() {
            &mut self.conn_send_window
        } else {
            match self.streams.get_mut(&stream_id) {
                Some(stream) => &mut stream.send_window,
                None => return Ok(()),
            }
        };

        *window += increment as i64;
        if *window > MAX_WINDOW_SIZE as i64 {
            return Err(SessionError::FlowControl("window overflow"));
        }
        Ok(())
    }

    fn on_goaway<C: Callbacks + ?Sized>(
        &mut self,
        last_stream_id: StreamId,
        error_code: ErrorCode,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        tracing::debug!(last_stream = %last_stream_id, code = %error_code, "GOAWAY received");
        self.goaway_received = Some(error_code);

        let refused: Vec<StreamId> = self
            .streams
            .keys()
            .filter(|id| **id > last_stream_id)
            .copied()
            .collect();
        for stream_id in refused {
            self.close_stream(stream_id, ErrorCode::REFUSED_STREAM, cb)?;
        }

        if error_code != ErrorCode::NO_ERROR {
            let remaining: Vec<StreamId> = self.streams.keys().copied().collect();
            for stream_id in remaining {
                self.close_stream(stream_id, error_code, cb)?;
            }
            return Err(SessionError::GoAway(error_code));
        }

        Ok(())
    }

    fn on_header_block<C: Callbacks + ?Sized>(
        &mut self,
        stream_id: StreamId,
        block: &[u8],
        end_stream: bool,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        // Decode even for closed streams to keep the HPACK table in sync.
        let fields = self.decoder.decode(block)?;

        if !self.streams.contains_key(&stream_id) {
            return Ok(());
        }

        for field in &fields {
            cb.on_header(stream_id, &field.name, &field.value)
                .map_err(SessionError::Callback)?;
        }

        if end_stream {
            self.on_remote_end(stream_id, cb)?;
        }
        Ok(())
    }

    fn on_data<C: Callbacks + ?Sized>(
        &mut self,
        stream_id: StreamId,
        end_stream: bool,
        data: &[u8],
        flow_len: u32,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        self.conn_recv_unacked += flow_len;
        if self.conn_recv_unacked > self.local.initial_window_size.max(DEFAULT_INITIAL_WINDOW_SIZE)
        {
            return Err(SessionError::FlowControl("peer exceeded connection window"));
        }
        if self.conn_recv_unacked >= DEFAULT_INITIAL_WINDOW_SIZE / 2 {
            Frame::WindowUpdate {
                stream_id: StreamId::CONNECTION,
                increment: self.conn_recv_unacked,
            }
            .encode(&mut self.outbound);
            self.conn_recv_unacked = 0;
        }

        if !self.is_known_stream(stream_id) {
            return Err(SessionError::Protocol("DATA on an idle stream"));
        }
        if !self.streams.contains_key(&stream_id) {
            return Ok(());
        }

        if !data.is_empty() {
            cb.on_data_chunk(stream_id, data)
                .map_err(SessionError::Callback)?;
        }

        if end_stream {
            return self.on_remote_end(stream_id, cb);
        }

        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        stream.recv_unacked += flow_len;
        if stream.recv_unacked >= self.local.initial_window_size / 2 {
            Frame::WindowUpdate {
                stream_id,
                increment: stream.recv_unacked,
            }
            .encode(&mut self.outbound);
            stream.recv_unacked = 0;
        }
        Ok(())
    }

    fn on_remote_end<C: Callbacks + ?Sized>(
        &mut self,
        stream_id: StreamId,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        let Some(stream) = self.streams.get_mut(&stream_id) else {
            return Ok(());
        };
        stream.remote_closed = true;

        if stream.local_closed {
            return self.close_stream(stream_id, ErrorCode::NO_ERROR, cb);
        }

        // The response finished before the request body; stop sending it.
        Frame::RstStream {
            stream_id,
            error_code: ErrorCode::NO_ERROR,
        }
        .encode(&mut self.outbound);
        self.close_stream(stream_id, ErrorCode::NO_ERROR, cb)
    }

    fn close_stream<C: Callbacks + ?Sized>(
        &mut self,
        stream_id: StreamId,
        error_code: ErrorCode,
        cb: &mut C,
    ) -> Result<(), SessionError> {
        if self.streams.remove(&stream_id).is_some() {
            tracing::trace!(stream = %stream_id, code = %error_code, "stream closed");
            cb.on_stream_close(stream_id, error_code)
                .map_err(SessionError::Callback)?;
        }
        Ok(())
    }

    /// A stream id we have opened, whether or not it is still active.
    fn is_known_stream(&self, stream_id: StreamId) -> bool {
        stream_id.is_client_initiated() && stream_id.value() < self.next_stream_id
    }
}
