//! Light schedule evaluation and output control.

use crate::clock::LocalClock;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use protocol_ganymede::{DailySchedule, LightConfig, Luminaire};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Output pins driven by the lights task.
pub trait Gpio: Send {
    fn enable_output(&mut self, pin: u32) -> io::Result<()>;

    fn disable(&mut self, pin: u32) -> io::Result<()>;

    fn set_level(&mut self, pin: u32, high: bool) -> io::Result<()>;
}

/// Logs pin changes instead of driving hardware.
#[derive(Debug, Default)]
pub struct LoggingGpio {
    levels: BTreeMap<u32, bool>,
}

impl LoggingGpio {
    pub fn level(&self, pin: u32) -> Option<bool> {
        self.levels.get(&pin).copied()
    }
}

impl Gpio for LoggingGpio {
    fn enable_output(&mut self, pin: u32) -> io::Result<()> {
        tracing::info!(pin, "gpio output enabled");
        Ok(())
    }

    fn disable(&mut self, pin: u32) -> io::Result<()> {
        self.levels.remove(&pin);
        tracing::info!(pin, "gpio disabled");
        Ok(())
    }

    fn set_level(&mut self, pin: u32, high: bool) -> io::Result<()> {
        if self.levels.insert(pin, high) != Some(high) {
            tracing::info!(pin, high, "gpio level");
        }
        Ok(())
    }
}

/// Whether `schedule` covers local time `t` (seconds since midnight).
/// Missing bounds read as midnight.
pub fn schedule_covers(schedule: &DailySchedule, t: u32) -> bool {
    let start = schedule.start.unwrap_or_default().seconds_since_midnight();
    let stop = schedule.stop.unwrap_or_default().seconds_since_midnight();
    start <= t && t < stop
}

/// Whether the light should be on at local time `t`.
pub fn is_active(luminaire: &Luminaire, t: u32) -> bool {
    luminaire.photo_period.iter().any(|s| schedule_covers(s, t))
}

/// Pin level for the luminaire at local time `t`.
pub fn output_level(luminaire: &Luminaire, t: u32) -> bool {
    is_active(luminaire, t) == luminaire.active_high
}

/// Current light configuration and the pins it owns.
pub struct Lights<G: Gpio> {
    gpio: G,
    config: Option<LightConfig>,
    enabled: BTreeSet<u32>,
}

impl<G: Gpio> Lights<G> {
    pub fn new(gpio: G) -> Self {
        Self {
            gpio,
            config: None,
            enabled: BTreeSet::new(),
        }
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn has_config(&self) -> bool {
        self.config.is_some()
    }

    pub fn enabled_pins(&self) -> impl Iterator<Item = u32> + '_ {
        self.enabled.iter().copied()
    }

    /// Adopt a new configuration: pins no longer used are disabled, new
    /// pins become outputs starting low.
    pub fn apply_config(&mut self, config: LightConfig) {
        let wanted: BTreeSet<u32> = config.luminaires.iter().map(|l| l.port).collect();

        for pin in self.enabled.difference(&wanted) {
            if let Err(e) = self.gpio.disable(*pin) {
                tracing::warn!(pin, error = %e, "failed to disable pin");
            }
        }
        for pin in wanted.difference(&self.enabled) {
            let result = self
                .gpio
                .enable_output(*pin)
                .and_then(|_| self.gpio.set_level(*pin, false));
            if let Err(e) = result {
                tracing::warn!(pin, error = %e, "failed to enable pin");
            }
        }

        tracing::debug!(luminaires = config.luminaires.len(), "light config applied");
        self.enabled = wanted;
        self.config = Some(config);
    }

    /// Drive every configured pin for local time `t`.
    pub fn update(&mut self, t: u32) {
        let Some(config) = &self.config else {
            return;
        };
        for luminaire in &config.luminaires {
            let level = output_level(luminaire, t);
            if let Err(e) = self.gpio.set_level(luminaire.port, level) {
                tracing::warn!(pin = luminaire.port, error = %e, "failed to set pin level");
            }
        }
    }
}

pub enum LightsEvent {
    Config(LightConfig),
    Stop,
}

/// Wait for the first configuration, then re-evaluate every `tick` and on
/// every new configuration.
pub fn run<G: Gpio>(
    mut lights: Lights<G>,
    clock: Arc<LocalClock>,
    tick: Duration,
    events: Receiver<LightsEvent>,
) -> Lights<G> {
    loop {
        let event = if lights.has_config() {
            events.recv_timeout(tick)
        } else {
            events.recv().map_err(|_| RecvTimeoutError::Disconnected)
        };

        match event {
            Ok(LightsEvent::Config(config)) => lights.apply_config(config),
            Ok(LightsEvent::Stop) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        lights.update(clock.seconds_of_day());
    }

    tracing::debug!("lights task stopped");
    lights
}
