//! Server side of one mock connection.

use crate::{MockResponse, RecordedRequest, Shared};
use bytes::BytesMut;
use http2::frame::{self, CONNECTION_PREFACE, DEFAULT_MAX_FRAME_SIZE, Frame, MAX_FRAME_SIZE};
use http2::hpack::{Decoder, Encoder, HeaderField};
use http2::StreamId;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

#[derive(Default)]
struct Pending {
    request: RecordedRequest,
    block: Vec<u8>,
    end_stream: bool,
}

pub(crate) fn serve(
    stream: TcpStream,
    config: Arc<rustls::ServerConfig>,
    shared: &Shared,
) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_nodelay(true)?;
    let conn = rustls::ServerConnection::new(config).map_err(io::Error::other)?;
    let mut tls = rustls::StreamOwned::new(conn, stream);

    let mut inbound = BytesMut::new();
    let mut buf = vec![0u8; 16 * 1024];
    let mut preface_seen = false;
    let mut decoder = Decoder::new();
    let encoder = Encoder::new();
    let mut streams: HashMap<StreamId, Pending> = HashMap::new();

    let mut out = BytesMut::new();
    Frame::Settings {
        ack: false,
        settings: Vec::new(),
    }
    .encode(&mut out);
    tls.write_all(&out)?;

    loop {
        let n = tls.read(&mut buf)?;
        if n == 0 {
            return Ok(());
        }
        inbound.extend_from_slice(&buf[..n]);

        if !preface_seen {
            if inbound.len() < CONNECTION_PREFACE.len() {
                continue;
            }
            if !inbound.starts_with(CONNECTION_PREFACE) {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "bad preface"));
            }
            let _ = inbound.split_to(CONNECTION_PREFACE.len());
            preface_seen = true;
        }

        let mut out = BytesMut::new();
        while let Some(frame) = frame::decode(&mut inbound, MAX_FRAME_SIZE)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?
        {
            let finished = match frame {
                Frame::Settings { ack: false, .. } => {
                    Frame::Settings {
                        ack: true,
                        settings: Vec::new(),
                    }
                    .encode(&mut out);
                    None
                }
                Frame::Ping { ack: false, payload } => {
                    Frame::Ping { ack: true, payload }.encode(&mut out);
                    None
                }
                Frame::Headers {
                    stream_id,
                    end_stream,
                    end_headers,
                    block,
                } => {
                    let pending = streams.entry(stream_id).or_default();
                    pending.block.extend_from_slice(&block);
                    pending.end_stream |= end_stream;
                    end_headers.then_some(stream_id)
                }
                Frame::Continuation {
                    stream_id,
                    end_headers,
                    block,
                } => {
                    let pending = streams.entry(stream_id).or_default();
                    pending.block.extend_from_slice(&block);
                    end_headers.then_some(stream_id)
                }
                Frame::Data {
                    stream_id,
                    end_stream,
                    data,
                    flow_len,
                } => {
                    if flow_len > 0 {
                        for id in [StreamId::CONNECTION, stream_id] {
                            Frame::WindowUpdate {
                                stream_id: id,
                                increment: flow_len,
                            }
                            .encode(&mut out);
                        }
                    }
                    let pending = streams.entry(stream_id).or_default();
                    pending.request.body.extend_from_slice(&data);
                    pending.end_stream |= end_stream;
                    end_stream.then_some(stream_id)
                }
                Frame::GoAway { .. } => return flush(&mut tls, &out),
                _ => None,
            };

            let Some(stream_id) = finished else {
                continue;
            };

            if let Some(pending) = streams.get_mut(&stream_id) {
                if !pending.block.is_empty() {
                    let fields = decoder
                        .decode(&pending.block)
                        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                    pending.block.clear();
                    pending.request.headers.extend(fields.into_iter().map(|f| {
                        (
                            String::from_utf8_lossy(&f.name).into_owned(),
                            String::from_utf8_lossy(&f.value).into_owned(),
                        )
                    }));
                }
                if !pending.end_stream {
                    continue;
                }
            }

            if let Some(pending) = streams.remove(&stream_id) {
                let response = (shared.handler)(&pending.request);
                if let Ok(mut requests) = shared.requests.lock() {
                    requests.push(pending.request);
                }
                encode_response(&encoder, stream_id, &response, &mut out);
            }
        }

        flush(&mut tls, &out)?;
    }
}

type ServerStream = rustls::StreamOwned<rustls::ServerConnection, TcpStream>;

fn flush(tls: &mut ServerStream, out: &[u8]) -> io::Result<()> {
    if !out.is_empty() {
        tls.write_all(out)?;
        tls.flush()?;
    }
    Ok(())
}

fn encode_response(
    encoder: &Encoder,
    stream_id: StreamId,
    response: &MockResponse,
    out: &mut BytesMut,
) {
    let max = DEFAULT_MAX_FRAME_SIZE as usize;
    let has_body = !response.body.is_empty();
    let has_trailers = !response.trailers.is_empty();

    let mut block = Vec::new();
    encoder.encode(&fields(&response.headers), &mut block);
    frame::encode_header_block(stream_id, &block, !has_body && !has_trailers, max, out);

    if has_body {
        let mut chunks = response.body.chunks(max).peekable();
        while let Some(chunk) = chunks.next() {
            let last = chunks.peek().is_none();
            frame::encode_data(stream_id, chunk, last && !has_trailers, out);
        }
    }

    if has_trailers {
        let mut block = Vec::new();
        encoder.encode(&fields(&response.trailers), &mut block);
        frame::encode_header_block(stream_id, &block, true, max, out);
    }
}

fn fields(pairs: &[(String, String)]) -> Vec<HeaderField> {
    pairs
        .iter()
        .map(|(n, v)| HeaderField::new(n.as_str(), v.as_str()))
        .collect()
}
