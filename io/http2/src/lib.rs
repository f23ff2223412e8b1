//! http2 - sans-io HTTP/2 client engine.
//!
//! The engine owns framing, HPACK state, stream lifecycle and flow
//! control, but performs no I/O itself. Bytes move through a [`Callbacks`]
//! implementation supplied on every [`Session::send`] and
//! [`Session::recv`], which also receives response headers, DATA chunks
//! and stream-close notifications.
//!
//! The crate does not use async/await or tokio; it is driven by whatever
//! loop owns the socket.
//!
//! # Modules
//!
//! - `frame`: HTTP/2 frame types, encoding, and decoding
//! - `hpack`: HPACK header compression
//! - `session`: client connection state machine

mod callbacks;
mod error;
pub mod frame;
pub mod hpack;
mod session;
mod settings;

pub use callbacks::{CallbackError, Callbacks, DataChunk};
pub use error::SessionError;
pub use frame::{
    CONNECTION_PREFACE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE, ErrorCode, Frame,
    FrameError, FrameType, Setting, StreamId,
};
pub use hpack::{HeaderField, HpackError};
pub use session::Session;
pub use settings::Settings;
