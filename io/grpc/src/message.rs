use bytes::Bytes;

/// Error decoding a message body.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message truncated")]
    Truncated,
    #[error("varint longer than 10 bytes")]
    VarintOverflow,
    #[error("unsupported wire type {0}")]
    WireType(u8),
    #[error("field {0} is not valid UTF-8")]
    Utf8(u32),
    #[error("invalid message: {0}")]
    Invalid(&'static str),
}

/// A message carried in a gRPC frame.
pub trait Message: Sized {
    /// Exact size `encode` will produce.
    fn encoded_len(&self) -> usize;

    /// Append the serialized message to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    fn decode(buf: &[u8]) -> Result<Self, DecodeError>;

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf
    }
}

/// Opaque, already-serialized payload.
impl Message for Bytes {
    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(self);
    }

    fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(Bytes::copy_from_slice(buf))
    }
}

/// `google.protobuf.Empty` and other messages whose content is ignored.
impl Message for () {
    fn encoded_len(&self) -> usize {
        0
    }

    fn encode(&self, _buf: &mut Vec<u8>) {}

    fn decode(_buf: &[u8]) -> Result<Self, DecodeError> {
        Ok(())
    }
}
