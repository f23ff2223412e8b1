//! HPACK header block decoding.

use super::huffman::{self, HuffmanError};
use super::table::{DynamicTable, HeaderField, StaticTable};

/// HPACK decoding error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HpackError {
    #[error("incomplete HPACK data")]
    Incomplete,
    #[error("HPACK integer overflow")]
    IntegerOverflow,
    #[error("invalid Huffman string: {0}")]
    Huffman(#[from] HuffmanError),
    #[error("invalid table index {0}")]
    InvalidIndex(usize),
    #[error("table size update to {0} exceeds the allowed maximum")]
    InvalidTableSize(usize),
    #[error("table size update after the first header field")]
    LateTableSizeUpdate,
}

/// HPACK decoder. Owns the dynamic table for one direction of a connection.
pub struct Decoder {
    table: DynamicTable,
    max_table_size: usize,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self::with_table_size(super::DEFAULT_TABLE_SIZE)
    }

    pub fn with_table_size(size: usize) -> Self {
        Self {
            table: DynamicTable::new(size),
            max_table_size: size,
        }
    }

    /// Decode a complete header block.
    pub fn decode(&mut self, mut data: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut headers = Vec::new();

        while let Some(&first) = data.first() {
            let consumed = if first & 0x80 != 0 {
                // Indexed header field: 1xxxxxxx
                let (index, n) = decode_integer(data, 7)?;
                headers.push(self.lookup(index)?);
                n
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing: 01xxxxxx
                let (field, n) = self.decode_literal(data, 6)?;
                self.table.insert(field.clone());
                headers.push(field);
                n
            } else if first & 0x20 != 0 {
                // Dynamic table size update: 001xxxxx
                if !headers.is_empty() {
                    return Err(HpackError::LateTableSizeUpdate);
                }
                let (size, n) = decode_integer(data, 5)?;
                if size > self.max_table_size {
                    return Err(HpackError::InvalidTableSize(size));
                }
                self.table.set_max_size(size);
                n
            } else {
                // Literal without indexing (0000xxxx) or never indexed (0001xxxx)
                let (field, n) = self.decode_literal(data, 4)?;
                headers.push(field);
                n
            };

            data = &data[consumed..];
        }

        Ok(headers)
    }

    fn decode_literal(
        &self,
        data: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (index, mut pos) = decode_integer(data, prefix_bits)?;

        let name = if index == 0 {
            let (name, n) = decode_string(&data[pos..])?;
            pos += n;
            name
        } else {
            self.lookup(index)?.name
        };

        let (value, n) = decode_string(&data[pos..])?;
        pos += n;

        Ok((HeaderField { name, value }, pos))
    }

    fn lookup(&self, index: usize) -> Result<HeaderField, HpackError> {
        if let Some((name, value)) = StaticTable::get(index) {
            return Ok(HeaderField::new(name, value));
        }

        index
            .checked_sub(StaticTable::len() + 1)
            .and_then(|i| self.table.get(i))
            .cloned()
            .ok_or(HpackError::InvalidIndex(index))
    }
}

/// Decode a prefixed integer (RFC 7541 Section 5.1).
///
/// Returns `(value, bytes consumed)`.
pub(super) fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    let first = *data.first().ok_or(HpackError::Incomplete)?;
    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = first as usize & max_prefix;

    if value < max_prefix {
        return Ok((value, 1));
    }

    let mut shift = 0u32;
    for (i, &byte) in data[1..].iter().enumerate() {
        let chunk = (byte & 0x7f) as usize;
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
        value = value
            .checked_add(chunk << shift)
            .ok_or(HpackError::IntegerOverflow)?;
        if byte & 0x80 == 0 {
            return Ok((value, i + 2));
        }
        shift += 7;
    }

    Err(HpackError::Incomplete)
}

/// Decode a string literal (RFC 7541 Section 5.2).
fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    let huffman_coded = data.first().ok_or(HpackError::Incomplete)? & 0x80 != 0;
    let (len, n) = decode_integer(data, 7)?;

    let end = n.checked_add(len).ok_or(HpackError::IntegerOverflow)?;
    let raw = data.get(n..end).ok_or(HpackError::Incomplete)?;

    let value = if huffman_coded {
        huffman::decode(raw)?
    } else {
        raw.to_vec()
    };

    Ok((value, end))
}
