//! Device-facing RPCs.

use crate::messages::{Measurement, PollRequest, PollResponse, PushMeasurementsRequest};
use grpc::{Client, Status};
use std::time::Duration;

pub const POLL_PATH: &str = "/ganymede.v2.DeviceService/Poll";
pub const PUSH_MEASUREMENTS_PATH: &str = "/ganymede.v2.MeasurementsService/PushMeasurements";

/// Typed wrapper over the gRPC client for the Ganymede API.
#[derive(Clone)]
pub struct DeviceApi {
    client: Client,
}

impl DeviceApi {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Report in and fetch the current device configuration.
    pub fn poll_device(&self, mac: &str, uptime: Duration) -> Result<PollResponse, Status> {
        let request = PollRequest {
            device_mac: mac.to_string(),
            uptime: Some(uptime.into()),
        };
        tracing::debug!(mac, uptime_secs = uptime.as_secs(), "polling device config");
        self.client.unary(POLL_PATH, &request)
    }

    /// Upload readings. The response carries nothing.
    pub fn push_measurements(&self, measurements: Vec<Measurement>) -> Result<(), Status> {
        let count = measurements.len();
        let request = PushMeasurementsRequest { measurements };
        tracing::debug!(count, "pushing measurements");
        self.client.unary_empty(PUSH_MEASUREMENTS_PATH, &request)
    }
}
