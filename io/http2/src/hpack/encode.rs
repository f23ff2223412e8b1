//! HPACK header block encoding.

use super::huffman;
use super::table::{HeaderField, StaticTable};

/// HPACK encoder.
///
/// Emits static-table references and literals without indexing only, so
/// the peer's dynamic table is never touched and each block decodes
/// independently.
#[derive(Debug, Default, Clone)]
pub struct Encoder {
    huffman: bool,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Huffman-code string literals when that makes them shorter.
    pub fn with_huffman(mut self, enabled: bool) -> Self {
        self.huffman = enabled;
        self
    }

    /// Encode `headers` into one header block appended to `buf`.
    pub fn encode(&self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        for header in headers {
            match StaticTable::find(&header.name, &header.value) {
                Some((index, true)) => encode_integer(index, 7, 0x80, buf),
                Some((index, false)) => {
                    encode_integer(index, 4, 0x00, buf);
                    self.encode_string(&header.value, buf);
                }
                None => {
                    buf.push(0x00);
                    self.encode_string(&header.name, buf);
                    self.encode_string(&header.value, buf);
                }
            }
        }
    }

    fn encode_string(&self, data: &[u8], buf: &mut Vec<u8>) {
        if self.huffman {
            let len = huffman::encoded_len(data);
            if len < data.len() {
                encode_integer(len, 7, 0x80, buf);
                huffman::encode(data, buf);
                return;
            }
        }
        encode_integer(data.len(), 7, 0x00, buf);
        buf.extend_from_slice(data);
    }
}

/// Encode a prefixed integer (RFC 7541 Section 5.1), OR-ing `flags` into
/// the first byte.
pub(super) fn encode_integer(mut value: usize, prefix_bits: u8, flags: u8, buf: &mut Vec<u8>) {
    let max_prefix = (1usize << prefix_bits) - 1;

    if value < max_prefix {
        buf.push(flags | value as u8);
        return;
    }

    buf.push(flags | max_prefix as u8);
    value -= max_prefix;
    while value >= 0x80 {
        buf.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}
