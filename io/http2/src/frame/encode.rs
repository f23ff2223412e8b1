//! Frame encoding.

use super::types::{Frame, FrameHeader, FrameType, StreamId, flags};
use super::FRAME_HEADER_SIZE;
use bytes::{BufMut, BytesMut};

impl FrameHeader {
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.length.to_be_bytes()[1..]);
        dst.put_u8(self.frame_type);
        dst.put_u8(self.flags);
        dst.put_u32(self.stream_id.value());
    }
}

impl Frame {
    /// Append the wire form of this frame to `dst`.
    ///
    /// Frames are written unpadded. Header blocks are written as-is; use
    /// [`encode_header_block`] to split a large block into CONTINUATION
    /// frames.
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Frame::Data {
                stream_id,
                end_stream,
                data,
                ..
            } => encode_data(*stream_id, data, *end_stream, dst),
            Frame::Headers {
                stream_id,
                end_stream,
                end_headers,
                block,
            } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                put_frame(dst, FrameType::Headers, f, *stream_id, block);
            }
            Frame::Priority { stream_id } => {
                put_frame(dst, FrameType::Priority, 0, *stream_id, &[0, 0, 0, 0, 15]);
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => {
                put_frame(
                    dst,
                    FrameType::RstStream,
                    0,
                    *stream_id,
                    &error_code.0.to_be_bytes(),
                );
            }
            Frame::Settings { ack, settings } => {
                let length = (settings.len() * 6) as u32;
                let f = if *ack { flags::ACK } else { 0 };
                FrameHeader::new(FrameType::Settings, f, StreamId::CONNECTION, length).encode(dst);
                for setting in settings {
                    let (id, value) = setting.to_wire();
                    dst.put_u16(id);
                    dst.put_u32(value);
                }
            }
            Frame::PushPromise {
                stream_id,
                promised_stream_id,
            } => {
                put_frame(
                    dst,
                    FrameType::PushPromise,
                    flags::END_HEADERS,
                    *stream_id,
                    &promised_stream_id.value().to_be_bytes(),
                );
            }
            Frame::Ping { ack, payload } => {
                let f = if *ack { flags::ACK } else { 0 };
                put_frame(dst, FrameType::Ping, f, StreamId::CONNECTION, payload);
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let length = (8 + debug_data.len()) as u32;
                FrameHeader::new(FrameType::GoAway, 0, StreamId::CONNECTION, length).encode(dst);
                dst.put_u32(last_stream_id.value());
                dst.put_u32(error_code.0);
                dst.put_slice(debug_data);
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => {
                put_frame(
                    dst,
                    FrameType::WindowUpdate,
                    0,
                    *stream_id,
                    &(increment & 0x7FFF_FFFF).to_be_bytes(),
                );
            }
            Frame::Continuation {
                stream_id,
                end_headers,
                block,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                put_frame(dst, FrameType::Continuation, f, *stream_id, block);
            }
            Frame::Unknown { .. } => {}
        }
    }
}

/// Append one DATA frame.
pub fn encode_data(stream_id: StreamId, data: &[u8], end_stream: bool, dst: &mut BytesMut) {
    let f = if end_stream { flags::END_STREAM } else { 0 };
    put_frame(dst, FrameType::Data, f, stream_id, data);
}

/// Append a header block as one HEADERS frame followed by as many
/// CONTINUATION frames as `max_frame_size` requires.
pub fn encode_header_block(
    stream_id: StreamId,
    block: &[u8],
    end_stream: bool,
    max_frame_size: usize,
    dst: &mut BytesMut,
) {
    let max = max_frame_size.max(1);
    let mut chunks = block.chunks(max).peekable();

    let first = chunks.next().unwrap_or(&[]);
    let mut f = if end_stream { flags::END_STREAM } else { 0 };
    if chunks.peek().is_none() {
        f |= flags::END_HEADERS;
    }
    put_frame(dst, FrameType::Headers, f, stream_id, first);

    while let Some(chunk) = chunks.next() {
        let f = if chunks.peek().is_none() {
            flags::END_HEADERS
        } else {
            0
        };
        put_frame(dst, FrameType::Continuation, f, stream_id, chunk);
    }
}

fn put_frame(dst: &mut BytesMut, kind: FrameType, f: u8, stream_id: StreamId, payload: &[u8]) {
    dst.reserve(FRAME_HEADER_SIZE + payload.len());
    FrameHeader::new(kind, f, stream_id, payload.len() as u32).encode(dst);
    dst.put_slice(payload);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{DEFAULT_MAX_FRAME_SIZE, ErrorCode, Setting, decode};
    use bytes::Bytes;

    #[test]
    fn test_settings_wire_format() {
        let mut buf = BytesMut::new();
        Frame::Settings {
            ack: false,
            settings: vec![Setting::EnablePush(false)],
        }
        .encode(&mut buf);

        assert_eq!(&buf[..], &[0, 0, 6, 0x4, 0, 0, 0, 0, 0, 0, 2, 0, 0, 0, 0]);
    }

    #[test]
    fn test_settings_ack_is_empty() {
        let mut buf = BytesMut::new();
        Frame::Settings {
            ack: true,
            settings: Vec::new(),
        }
        .encode(&mut buf);

        assert_eq!(&buf[..], &[0, 0, 0, 0x4, 0x1, 0, 0, 0, 0]);
    }

    #[test]
    fn test_header_block_split_into_continuations() {
        let block = [0xaa_u8; 10];
        let mut buf = BytesMut::new();
        encode_header_block(StreamId::new(1), &block, true, 4, &mut buf);

        let first = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            first,
            Frame::Headers {
                stream_id: StreamId::new(1),
                end_stream: true,
                end_headers: false,
                block: Bytes::from_static(&[0xaa; 4]),
            }
        );

        let second = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert!(matches!(
            second,
            Frame::Continuation {
                end_headers: false,
                ..
            }
        ));

        let third = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            third,
            Frame::Continuation {
                stream_id: StreamId::new(1),
                end_headers: true,
                block: Bytes::from_static(&[0xaa; 2]),
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_empty_header_block_single_frame() {
        let mut buf = BytesMut::new();
        encode_header_block(StreamId::new(5), &[], false, 16, &mut buf);
        assert_eq!(&buf[..], &[0, 0, 0, 0x1, flags::END_HEADERS, 0, 0, 0, 5]);
    }

    #[test]
    fn test_rst_stream_and_goaway_decode_back() {
        let mut buf = BytesMut::new();
        Frame::RstStream {
            stream_id: StreamId::new(3),
            error_code: ErrorCode::CANCEL,
        }
        .encode(&mut buf);
        Frame::GoAway {
            last_stream_id: StreamId::new(3),
            error_code: ErrorCode::NO_ERROR,
            debug_data: Bytes::from_static(b"bye"),
        }
        .encode(&mut buf);

        assert_eq!(
            decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
            Some(Frame::RstStream {
                stream_id: StreamId::new(3),
                error_code: ErrorCode::CANCEL,
            })
        );
        assert_eq!(
            decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap(),
            Some(Frame::GoAway {
                last_stream_id: StreamId::new(3),
                error_code: ErrorCode::NO_ERROR,
                debug_data: Bytes::from_static(b"bye"),
            })
        );
    }
}
