//! Callback roles through which the [`Session`](crate::Session) does I/O
//! and reports stream events.

use crate::frame::{ErrorCode, StreamId};

/// Result of a callback that could not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CallbackError {
    /// No progress possible right now; the engine returns to its caller.
    #[error("would block")]
    WouldBlock,
    /// The byte stream ended.
    #[error("end of stream")]
    Eof,
    /// Unrecoverable; the engine aborts the current `send`/`recv`.
    #[error("callback failure")]
    Failure,
}

/// Bytes produced by [`Callbacks::read_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataChunk {
    pub len: usize,
    /// The request body is exhausted; its last DATA frame ends the stream.
    pub eof: bool,
}

impl DataChunk {
    pub fn more(len: usize) -> Self {
        Self { len, eof: false }
    }

    pub fn eof(len: usize) -> Self {
        Self { len, eof: true }
    }
}

/// Hooks the engine calls while sending and receiving.
///
/// `send` and `recv` move raw connection bytes. The remaining methods
/// have no-op defaults.
pub trait Callbacks {
    /// Write connection bytes. Returns how many were taken.
    fn send(&mut self, data: &[u8]) -> Result<usize, CallbackError>;

    /// Read connection bytes into `buf`.
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, CallbackError>;

    /// One decoded response header or trailer field.
    fn on_header(
        &mut self,
        _stream_id: StreamId,
        _name: &[u8],
        _value: &[u8],
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// One chunk of response body. Returning `Failure` aborts `recv`.
    fn on_data_chunk(&mut self, _stream_id: StreamId, _data: &[u8]) -> Result<(), CallbackError> {
        Ok(())
    }

    /// The stream is fully closed, normally (`NO_ERROR`) or by reset.
    fn on_stream_close(
        &mut self,
        _stream_id: StreamId,
        _error_code: ErrorCode,
    ) -> Result<(), CallbackError> {
        Ok(())
    }

    /// Fill `buf` with request body bytes for `stream_id`.
    fn read_data(
        &mut self,
        _stream_id: StreamId,
        _buf: &mut [u8],
    ) -> Result<DataChunk, CallbackError> {
        Ok(DataChunk::eof(0))
    }
}
