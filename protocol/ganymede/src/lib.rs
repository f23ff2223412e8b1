//! protocol-ganymede - the Ganymede device API.
//!
//! Typed `ganymede.v2` protobuf messages, the two device RPCs
//! (`poll_device`, `push_measurements`), and the OAuth credentials those
//! calls carry. Everything rides the single-session transport through the
//! `grpc` crate.

mod api;
mod auth;
mod credentials;
mod messages;
pub mod proto;

pub use api::{DeviceApi, POLL_PATH, PUSH_MEASUREMENTS_PATH};
pub use auth::{AuthClient, AuthConfig, AuthError, DEVICE_CODE_PATH, DeviceCode, TOKEN_PATH};
pub use credentials::{Bearer, CredentialStore, MemoryStore, StoreError, TokenKind};
pub use messages::{
    AtmosphericMeasurements, DailySchedule, Duration, LightConfig, Luminaire, Measurement,
    PollRequest, PollResponse, PushMeasurementsRequest, TimeOfDay, Timestamp,
};
