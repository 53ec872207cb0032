//! Latest decoded telemetry and how fresh it is.
//!
//! One writer (the session's control loop) records values; any number of
//! readers take copies or subscribe to changes.

use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::message::Values;

/// The latest telemetry reported by the controller
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// The battery voltage in V
    pub voltage: f32,
    /// The power stage (FET) temperature in °C
    pub fet_temperature_c: f32,
    /// The motor temperature in °C. Decoded but not shown by the display
    pub motor_temperature_c: f32,
    /// When the last values response was decoded. `None` until the first one
    pub last_updated: Option<Instant>,
}

impl Telemetry {
    /// Time since the last values response, if any arrived yet.
    pub fn age(&self, now: Instant) -> Option<Duration> {
        self.last_updated.map(|at| now.saturating_duration_since(at))
    }

    pub fn is_stale(&self, now: Instant, max_age: Duration) -> bool {
        self.age(now).map_or(true, |age| age > max_age)
    }
}

/// Single-writer holder for [`Telemetry`].
///
/// The control loop is the only writer. Readers get copies through
/// [`TelemetryStore::snapshot`] or a [`watch::Receiver`], so they never
/// observe a half-written update.
#[derive(Debug)]
pub struct TelemetryStore {
    tx: watch::Sender<Telemetry>,
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl TelemetryStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Telemetry::default());
        Self { tx }
    }

    /// Overwrite the stored values and stamp them with `now`.
    pub fn record(&self, values: Values, now: Instant) {
        self.tx.send_replace(Telemetry {
            voltage: values.voltage,
            fet_temperature_c: values.fet_temperature_c,
            motor_temperature_c: values.motor_temperature_c,
            last_updated: Some(now),
        });
    }

    pub fn snapshot(&self) -> Telemetry {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Telemetry> {
        self.tx.subscribe()
    }
}
