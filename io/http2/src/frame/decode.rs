//! Frame decoding.

use super::error::{ErrorCode, FrameError};
use super::types::{Frame, FrameHeader, FrameType, Setting, StreamId, flags};
use super::FRAME_HEADER_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// Decode one frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame; the
/// buffer is left untouched in that case. On success the frame's bytes are
/// removed from `buf`.
pub fn decode(buf: &mut BytesMut, max_frame_size: u32) -> Result<Option<Frame>, FrameError> {
    let Some(header) = parse_header(buf) else {
        return Ok(None);
    };

    if header.length > max_frame_size {
        return Err(FrameError::TooLarge {
            length: header.length,
            max: max_frame_size,
        });
    }

    let total = FRAME_HEADER_SIZE + header.length as usize;
    if buf.len() < total {
        return Ok(None);
    }

    let mut frame = buf.split_to(total).freeze();
    frame.advance(FRAME_HEADER_SIZE);

    decode_payload(header, frame).map(Some)
}

fn parse_header(buf: &[u8]) -> Option<FrameHeader> {
    if buf.len() < FRAME_HEADER_SIZE {
        return None;
    }

    let length = u32::from_be_bytes([0, buf[0], buf[1], buf[2]]);
    let stream_id = u32::from_be_bytes([buf[5], buf[6], buf[7], buf[8]]);

    Some(FrameHeader {
        length,
        frame_type: buf[3],
        flags: buf[4],
        stream_id: StreamId::new(stream_id),
    })
}

fn decode_payload(header: FrameHeader, mut payload: Bytes) -> Result<Frame, FrameError> {
    let stream_id = header.stream_id;
    let length = header.length;

    let Some(kind) = header.kind() else {
        return Ok(Frame::Unknown {
            frame_type: header.frame_type,
            stream_id,
        });
    };

    let expect_len = |expected: u32| {
        if length == expected {
            Ok(())
        } else {
            Err(FrameError::InvalidSize {
                frame_type: kind,
                length,
            })
        }
    };

    match kind {
        FrameType::Data => {
            require_stream(stream_id, "DATA on stream 0")?;
            strip_padding(&header, &mut payload)?;
            Ok(Frame::Data {
                stream_id,
                end_stream: header.has_flag(flags::END_STREAM),
                data: payload,
                flow_len: length,
            })
        }
        FrameType::Headers => {
            require_stream(stream_id, "HEADERS on stream 0")?;
            strip_padding(&header, &mut payload)?;
            if header.has_flag(flags::PRIORITY) {
                if payload.len() < 5 {
                    return Err(FrameError::InvalidSize {
                        frame_type: kind,
                        length,
                    });
                }
                payload.advance(5);
            }
            Ok(Frame::Headers {
                stream_id,
                end_stream: header.has_flag(flags::END_STREAM),
                end_headers: header.has_flag(flags::END_HEADERS),
                block: payload,
            })
        }
        FrameType::Priority => {
            require_stream(stream_id, "PRIORITY on stream 0")?;
            expect_len(5)?;
            Ok(Frame::Priority { stream_id })
        }
        FrameType::RstStream => {
            require_stream(stream_id, "RST_STREAM on stream 0")?;
            expect_len(4)?;
            Ok(Frame::RstStream {
                stream_id,
                error_code: ErrorCode(payload.get_u32()),
            })
        }
        FrameType::Settings => {
            require_connection(stream_id, "SETTINGS on a stream")?;
            let ack = header.has_flag(flags::ACK);
            if (ack && length != 0) || length % 6 != 0 {
                return Err(FrameError::InvalidSize {
                    frame_type: kind,
                    length,
                });
            }
            let mut settings = Vec::with_capacity(payload.len() / 6);
            while payload.has_remaining() {
                let id = payload.get_u16();
                let value = payload.get_u32();
                settings.push(Setting::from_wire(id, value));
            }
            Ok(Frame::Settings { ack, settings })
        }
        FrameType::PushPromise => {
            require_stream(stream_id, "PUSH_PROMISE on stream 0")?;
            strip_padding(&header, &mut payload)?;
            if payload.len() < 4 {
                return Err(FrameError::InvalidSize {
                    frame_type: kind,
                    length,
                });
            }
            Ok(Frame::PushPromise {
                stream_id,
                promised_stream_id: StreamId::new(payload.get_u32()),
            })
        }
        FrameType::Ping => {
            require_connection(stream_id, "PING on a stream")?;
            expect_len(8)?;
            let mut data = [0u8; 8];
            payload.copy_to_slice(&mut data);
            Ok(Frame::Ping {
                ack: header.has_flag(flags::ACK),
                payload: data,
            })
        }
        FrameType::GoAway => {
            require_connection(stream_id, "GOAWAY on a stream")?;
            if length < 8 {
                return Err(FrameError::InvalidSize {
                    frame_type: kind,
                    length,
                });
            }
            let last_stream_id = StreamId::new(payload.get_u32());
            let error_code = ErrorCode(payload.get_u32());
            Ok(Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data: payload,
            })
        }
        FrameType::WindowUpdate => {
            expect_len(4)?;
            let increment = payload.get_u32() & 0x7FFF_FFFF;
            if increment == 0 {
                return Err(FrameError::Protocol("WINDOW_UPDATE with zero increment"));
            }
            Ok(Frame::WindowUpdate {
                stream_id,
                increment,
            })
        }
        FrameType::Continuation => {
            require_stream(stream_id, "CONTINUATION on stream 0")?;
            Ok(Frame::Continuation {
                stream_id,
                end_headers: header.has_flag(flags::END_HEADERS),
                block: payload,
            })
        }
    }
}

fn require_stream(stream_id: StreamId, msg: &'static str) -> Result<(), FrameError> {
    if stream_id.is_connection() {
        Err(FrameError::Protocol(msg))
    } else {
        Ok(())
    }
}

fn require_connection(stream_id: StreamId, msg: &'static str) -> Result<(), FrameError> {
    if stream_id.is_connection() {
        Ok(())
    } else {
        Err(FrameError::Protocol(msg))
    }
}

fn strip_padding(header: &FrameHeader, payload: &mut Bytes) -> Result<(), FrameError> {
    if !header.has_flag(flags::PADDED) {
        return Ok(());
    }
    if payload.is_empty() {
        return Err(FrameError::InvalidPadding);
    }
    let pad = payload.get_u8() as usize;
    if pad > payload.len() {
        return Err(FrameError::InvalidPadding);
    }
    payload.truncate(payload.len() - pad);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::DEFAULT_MAX_FRAME_SIZE;

    fn raw(frame_type: u8, flags: u8, stream: u32, payload: &[u8]) -> BytesMut {
        let mut buf = BytesMut::new();
        let len = payload.len() as u32;
        buf.extend_from_slice(&len.to_be_bytes()[1..]);
        buf.extend_from_slice(&[frame_type, flags]);
        buf.extend_from_slice(&stream.to_be_bytes());
        buf.extend_from_slice(payload);
        buf
    }

    #[test]
    fn test_incomplete_frame_left_in_buffer() {
        let mut buf = raw(0x6, 0, 0, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let mut partial = buf.split_to(12);
        assert_eq!(decode(&mut partial, DEFAULT_MAX_FRAME_SIZE).unwrap(), None);
        assert_eq!(partial.len(), 12);
    }

    #[test]
    fn test_padded_data() {
        // pad length 2, data "hi", 2 bytes padding
        let mut buf = raw(0x0, flags::PADDED | flags::END_STREAM, 1, &[2, b'h', b'i', 0, 0]);
        let frame = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Data {
                stream_id: StreamId::new(1),
                end_stream: true,
                data: Bytes::from_static(b"hi"),
                flow_len: 5,
            }
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_invalid_padding() {
        let mut buf = raw(0x0, flags::PADDED, 1, &[9, b'h']);
        assert_eq!(
            decode(&mut buf, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::InvalidPadding)
        );
    }

    #[test]
    fn test_headers_with_priority() {
        let mut buf = raw(
            0x1,
            flags::PRIORITY | flags::END_HEADERS,
            3,
            &[0, 0, 0, 0, 16, 0x88],
        );
        let frame = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Headers {
                stream_id: StreamId::new(3),
                end_stream: false,
                end_headers: true,
                block: Bytes::from_static(&[0x88]),
            }
        );
    }

    #[test]
    fn test_settings() {
        let mut buf = raw(0x4, 0, 0, &[0, 4, 0, 0, 0x10, 0, 0, 2, 0, 0, 0, 0]);
        let frame = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Settings {
                ack: false,
                settings: vec![Setting::InitialWindowSize(4096), Setting::EnablePush(false)],
            }
        );

        let mut bad = raw(0x4, flags::ACK, 0, &[0, 4, 0, 0, 0x10, 0]);
        assert!(matches!(
            decode(&mut bad, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_stream_rules() {
        let mut data_on_zero = raw(0x0, 0, 0, b"x");
        assert!(matches!(
            decode(&mut data_on_zero, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::Protocol(_))
        ));

        let mut ping_on_stream = raw(0x6, 0, 1, &[0; 8]);
        assert!(matches!(
            decode(&mut ping_on_stream, DEFAULT_MAX_FRAME_SIZE),
            Err(FrameError::Protocol(_))
        ));
    }

    #[test]
    fn test_goaway_and_window_update() {
        let mut buf = raw(0x7, 0, 0, &[0, 0, 0, 5, 0, 0, 0, 0xb, b'x']);
        buf.extend_from_slice(&raw(0x8, 0, 1, &[0, 0, 0x10, 0]));

        let goaway = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            goaway,
            Frame::GoAway {
                last_stream_id: StreamId::new(5),
                error_code: ErrorCode::ENHANCE_YOUR_CALM,
                debug_data: Bytes::from_static(b"x"),
            }
        );

        let update = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            update,
            Frame::WindowUpdate {
                stream_id: StreamId::new(1),
                increment: 4096,
            }
        );

        let mut zero = raw(0x8, 0, 0, &[0, 0, 0, 0]);
        assert!(decode(&mut zero, DEFAULT_MAX_FRAME_SIZE).is_err());
    }

    #[test]
    fn test_frame_too_large() {
        let mut buf = raw(0x0, 0, 1, &[0u8; 32]);
        assert_eq!(
            decode(&mut buf, 16),
            Err(FrameError::TooLarge { length: 32, max: 16 })
        );
    }

    #[test]
    fn test_unknown_frame_type_skipped() {
        let mut buf = raw(0xfa, 0, 1, b"ignored");
        let frame = decode(&mut buf, DEFAULT_MAX_FRAME_SIZE).unwrap().unwrap();
        assert_eq!(
            frame,
            Frame::Unknown {
                frame_type: 0xfa,
                stream_id: StreamId::new(1),
            }
        );
        assert!(buf.is_empty());
    }
}
