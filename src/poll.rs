//! Periodic device poll.

use crate::clock::LocalClock;
use crate::identity::Identity;
use crate::lights::LightsEvent;
use crate::storage::{FileStore, POLL_RESPONSE_KEY};
use crate::Control;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use grpc::{Message, Status};
use protocol_ganymede::{DeviceApi, PollResponse};
use std::sync::Arc;
use std::time::Duration;

pub struct Poller {
    api: DeviceApi,
    identity: Arc<Identity>,
    store: Arc<FileStore>,
    clock: Arc<LocalClock>,
    lights: Sender<LightsEvent>,
    period: Duration,
    min_period: Duration,
}

impl Poller {
    pub fn new(
        api: DeviceApi,
        identity: Arc<Identity>,
        store: Arc<FileStore>,
        clock: Arc<LocalClock>,
        lights: Sender<LightsEvent>,
        period: Duration,
        min_period: Duration,
    ) -> Self {
        Self {
            api,
            identity,
            store,
            clock,
            lights,
            period,
            min_period,
        }
    }

    /// Current time between polls.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Apply the response persisted by an earlier run, if any. Returns
    /// whether one was applied.
    pub fn restore(&mut self) -> bool {
        let blob = match self.store.read_blob(POLL_RESPONSE_KEY) {
            Ok(Some(blob)) => blob,
            Ok(None) => return false,
            Err(e) => {
                tracing::warn!(error = %e, "failed to read stored poll response");
                return false;
            }
        };

        match PollResponse::decode(&blob) {
            Ok(response) => {
                tracing::info!("applying stored poll response");
                self.apply(&response);
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "stored poll response is corrupt");
                false
            }
        }
    }

    /// Poll once. On success the response is persisted and applied.
    pub fn poll_once(&mut self) -> Result<PollResponse, Status> {
        let response = self
            .api
            .poll_device(self.identity.mac(), self.clock.uptime())?;

        if let Err(e) = self
            .store
            .write_blob(POLL_RESPONSE_KEY, &response.encode_to_vec())
        {
            tracing::warn!(error = %e, "failed to persist poll response");
        }
        self.apply(&response);
        Ok(response)
    }

    fn apply(&mut self, response: &PollResponse) {
        tracing::info!(
            device = %response.device_display_name,
            config = %response.config_display_name,
            "device config"
        );

        if !response.device_uid.is_empty() {
            if let Err(e) = self.identity.set_device_id(&response.device_uid) {
                tracing::warn!(error = %e, "failed to persist device id");
            }
        }

        self.clock
            .set_offset_minutes(response.timezone_offset_minutes);

        if let Some(config) = &response.light_config {
            if self.lights.send(LightsEvent::Config(config.clone())).is_err() {
                tracing::debug!("lights task is gone");
            }
        }

        if let Some(period) = response.poll_period {
            let period = period.to_std();
            if period >= self.min_period {
                if period != self.period {
                    tracing::info!(period_secs = period.as_secs(), "poll period updated");
                }
                self.period = period;
            } else {
                tracing::debug!(
                    period_secs = period.as_secs(),
                    min_secs = self.min_period.as_secs(),
                    "ignoring short poll period"
                );
            }
        }
    }

    /// Restore, poll now, then poll every period or whenever woken.
    pub fn run(mut self, control: Receiver<Control>) {
        self.restore();

        loop {
            if let Err(status) = self.poll_once() {
                tracing::warn!(status = %status, "poll failed");
            }

            match control.recv_timeout(self.period) {
                Ok(Control::Wake) => tracing::debug!("poll requested"),
                Err(RecvTimeoutError::Timeout) => {}
                Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        tracing::debug!("poll task stopped");
    }
}
