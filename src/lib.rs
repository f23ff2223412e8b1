//! ganymede-device - environmental sensor and light controller daemon.
//!
//! The daemon polls the Ganymede API for its configuration, drives grow
//! lights on a daily schedule in local time, and reports atmospheric
//! measurements. All network traffic goes through one serialized HTTP/2
//! session at a time.

pub mod clock;
pub mod config;
pub mod console;
pub mod daemon;
pub mod identity;
pub mod lights;
pub mod logging;
pub mod measurements;
pub mod poll;
pub mod refresh;
pub mod signal;
pub mod storage;

/// Steers a periodic task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Run now instead of waiting for the next tick.
    Wake,
    Stop,
}
