//! HPACK header compression (RFC 7541).
//!
//! The decoder is complete: indexed fields, literals with and without
//! indexing, dynamic table size updates and Huffman-coded strings. The
//! encoder never adds to the dynamic table, so peers decoding our blocks
//! need no table state.

mod decode;
mod encode;
mod huffman;
mod table;

pub use decode::{Decoder, HpackError};
pub use encode::Encoder;
pub use table::{HeaderField, StaticTable};

/// Default dynamic table size (4096 bytes).
pub const DEFAULT_TABLE_SIZE: usize = 4096;
