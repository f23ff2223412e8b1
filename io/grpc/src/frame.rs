//! gRPC message framing.
//!
//! gRPC messages are length-prefixed with the following format:
//! - 1 byte: compressed flag (0 = uncompressed, 1 = compressed)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload

use crate::message::{DecodeError, Message};
use bytes::Bytes;

/// Offset of the compressed flag.
pub const FLAG_OFFSET: usize = 0;

/// Offset of the big-endian message length.
pub const LENGTH_OFFSET: usize = 1;

/// Offset of the first message byte.
pub const MESSAGE_OFFSET: usize = 5;

/// Size of the gRPC message header (1 byte flag + 4 bytes length).
pub const HEADER_SIZE: usize = MESSAGE_OFFSET;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },
    #[error("compressed messages are not supported")]
    Compressed,
    #[error("message of {0} bytes does not fit a frame")]
    TooLarge(usize),
    #[error("message decode failed: {0}")]
    Decode(#[from] DecodeError),
}

/// The 5-byte prefix of a gRPC message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub compressed: bool,
    pub length: u32,
}

impl FrameHeader {
    /// Header for an uncompressed message of `length` bytes.
    pub fn new(length: u32) -> Self {
        Self {
            compressed: false,
            length,
        }
    }

    pub fn to_bytes(self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[FLAG_OFFSET] = u8::from(self.compressed);
        out[LENGTH_OFFSET..MESSAGE_OFFSET].copy_from_slice(&self.length.to_be_bytes());
        out
    }

    pub fn parse(buf: &[u8]) -> Result<Self, FrameError> {
        let Some(header) = buf.get(..HEADER_SIZE) else {
            return Err(FrameError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        };

        let mut length = [0u8; 4];
        length.copy_from_slice(&header[LENGTH_OFFSET..MESSAGE_OFFSET]);

        Ok(Self {
            compressed: header[FLAG_OFFSET] != 0,
            length: u32::from_be_bytes(length),
        })
    }

    /// Header plus message length.
    pub fn frame_len(&self) -> usize {
        HEADER_SIZE + self.length as usize
    }
}

/// Serialize `message` into one uncompressed gRPC frame.
pub fn pack<M: Message>(message: &M) -> Result<Bytes, FrameError> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + message.encoded_len());
    buf.extend_from_slice(&[0u8; HEADER_SIZE]);
    message.encode(&mut buf);

    // The header carries the size actually written.
    let len = buf.len() - HEADER_SIZE;
    let length = u32::try_from(len).map_err(|_| FrameError::TooLarge(len))?;
    buf[..HEADER_SIZE].copy_from_slice(&FrameHeader::new(length).to_bytes());

    Ok(Bytes::from(buf))
}

/// Decode the first framed message in `buf`. Bytes after it are ignored.
pub fn unpack<M: Message>(buf: &[u8]) -> Result<M, FrameError> {
    let header = FrameHeader::parse(buf)?;
    if header.compressed {
        return Err(FrameError::Compressed);
    }

    let end = header.frame_len();
    let Some(message) = buf.get(MESSAGE_OFFSET..end) else {
        return Err(FrameError::Truncated {
            needed: end,
            available: buf.len(),
        });
    };

    Ok(M::decode(message)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_empty_message() {
        let encoded = pack(&Bytes::new()).unwrap();
        assert_eq!(encoded.len(), HEADER_SIZE);
        assert_eq!(encoded[0], 0); // Not compressed
        assert_eq!(&encoded[1..5], &[0, 0, 0, 0]); // Length = 0
    }

    #[test]
    fn test_pack_message() {
        let data = Bytes::from_static(b"hello world");
        let encoded = pack(&data).unwrap();

        assert_eq!(encoded.len(), HEADER_SIZE + data.len());
        assert_eq!(encoded[FLAG_OFFSET], 0);
        assert_eq!(&encoded[LENGTH_OFFSET..MESSAGE_OFFSET], &[0, 0, 0, 11]);
        assert_eq!(&encoded[MESSAGE_OFFSET..], b"hello world");
    }

    #[test]
    fn test_length_is_big_endian() {
        let header = FrameHeader::new(0x0102_0304);
        assert_eq!(header.to_bytes(), [0, 1, 2, 3, 4]);
        assert_eq!(FrameHeader::parse(&[0, 1, 2, 3, 4]).unwrap(), header);

        let max = FrameHeader::new(u32::MAX);
        assert_eq!(FrameHeader::parse(&max.to_bytes()).unwrap().length, u32::MAX);
    }

    #[test]
    fn test_unpack_message() {
        let framed = pack(&Bytes::from_static(b"payload")).unwrap();
        let message: Bytes = unpack(&framed).unwrap();
        assert_eq!(&message[..], b"payload");
    }

    #[test]
    fn test_unpack_ignores_trailing_bytes() {
        let mut framed = pack(&Bytes::from_static(b"abc")).unwrap().to_vec();
        framed.extend_from_slice(b"garbage");
        let message: Bytes = unpack(&framed).unwrap();
        assert_eq!(&message[..], b"abc");
    }

    #[test]
    fn test_unpack_truncated_header() {
        assert_eq!(
            unpack::<Bytes>(&[0, 0, 0]),
            Err(FrameError::Truncated {
                needed: 5,
                available: 3
            })
        );
    }

    #[test]
    fn test_unpack_truncated_message() {
        assert_eq!(
            unpack::<Bytes>(&[0, 0, 0, 0, 10, 1, 2, 3]),
            Err(FrameError::Truncated {
                needed: 15,
                available: 8
            })
        );
    }

    #[test]
    fn test_unpack_rejects_compressed() {
        assert_eq!(
            unpack::<Bytes>(&[1, 0, 0, 0, 1, 0xFF]),
            Err(FrameError::Compressed)
        );
    }

    #[test]
    fn test_header_matches_encoded_size() {
        // A message whose encoded_len under-reports still gets a correct header.
        struct Liar;
        impl Message for Liar {
            fn encoded_len(&self) -> usize {
                1
            }
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&[9; 7]);
            }
            fn decode(_buf: &[u8]) -> Result<Self, DecodeError> {
                Ok(Liar)
            }
        }

        let framed = pack(&Liar).unwrap();
        assert_eq!(FrameHeader::parse(&framed).unwrap().length, 7);
        assert_eq!(framed.len(), 12);
    }
}
