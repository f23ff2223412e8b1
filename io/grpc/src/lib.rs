//! grpc - unary gRPC calls over the single-session transport.
//!
//! This crate provides the gRPC envelope on top of the `transport`
//! crate's serialized HTTP/2 session. It does not use async/await; every
//! call blocks the calling thread until the transport worker answers.
//!
//! # Architecture
//!
//! gRPC messages are framed as:
//! - 1 byte: compressed flag (always 0 here)
//! - 4 bytes: message length (big-endian u32)
//! - N bytes: message payload (protobuf)
//!
//! Protobuf encoding itself is left to implementations of [`Message`].

mod client;
mod frame;
mod message;
mod status;

pub use client::{Client, Endpoint, TokenSource};
pub use frame::{
    FLAG_OFFSET, FrameError, FrameHeader, HEADER_SIZE, LENGTH_OFFSET, MESSAGE_OFFSET, pack, unpack,
};
pub use message::{DecodeError, Message};
pub use status::{Code, Status, describe};
