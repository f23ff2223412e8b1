//! Access token refresh timer.

use crate::Control;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use protocol_ganymede::{AuthClient, AuthError};
use std::time::Duration;

/// Refresh once if the device is registered. An unregistered device is
/// not an error, there is just nothing to refresh yet.
pub fn refresh_if_registered(auth: &AuthClient) -> Result<bool, AuthError> {
    if !auth.is_registered()? {
        tracing::debug!("no refresh token stored, skipping refresh");
        return Ok(false);
    }
    auth.refresh()?;
    Ok(true)
}

/// Refresh now, then every `interval` or whenever woken.
pub fn run(auth: AuthClient, interval: Duration, control: Receiver<Control>) {
    loop {
        if let Err(e) = refresh_if_registered(&auth) {
            tracing::warn!(error = %e, "token refresh failed");
        }

        match control.recv_timeout(interval) {
            Ok(Control::Wake) => tracing::debug!("refresh requested"),
            Err(RecvTimeoutError::Timeout) => {}
            Ok(Control::Stop) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    tracing::debug!("refresh task stopped");
}
