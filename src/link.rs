//! Connection lifecycle state machine.
//!
//! The machine does no I/O. Every input (user request, transport event, clock
//! tick) comes in with the current monotonic time and may hand back
//! [`LinkAction`]s for the caller to perform against the transport.
//!
//! ```text
//!            start_connect            connected
//!   Idle ───────────────► Connecting ──────────► Connected ◄──────┐
//!    ▲  ◄─────────────────────┘ failed             │               │ connected
//!    │                                stale / lost │               │
//!    │            cancel                           ▼               │
//!    └──────────────────────────────────────── Reconnecting ───────┘
//!                                               (attempt every interval)
//! ```
//!
//! Durations are measured with `saturating_duration_since` on a monotonic
//! clock, so a clock reading that appears to go backwards reads as zero
//! elapsed time instead of a huge one.

use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::protocol::Command;

/// Identifier the transport uses to find a device (the advertised BLE name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for DeviceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Coarse link state, for display and for gating sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkStatus {
    Idle,
    Connecting,
    Connected,
    Reconnecting,
}

/// Work the caller must carry out on the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkAction {
    Connect(DeviceId),
    Disconnect,
    Send(Command),
}

#[derive(Debug, Clone)]
enum State {
    Idle,
    Connecting {
        target: DeviceId,
    },
    Connected {
        target: DeviceId,
        connected_since: Instant,
        last_data_at: Instant,
        last_poll_at: Option<Instant>,
        last_heartbeat_at: Option<Instant>,
    },
    Reconnecting {
        target: DeviceId,
        last_attempt_at: Instant,
        attempt_in_flight: bool,
    },
}

impl State {
    fn status(&self) -> LinkStatus {
        match self {
            State::Idle => LinkStatus::Idle,
            State::Connecting { .. } => LinkStatus::Connecting,
            State::Connected { .. } => LinkStatus::Connected,
            State::Reconnecting { .. } => LinkStatus::Reconnecting,
        }
    }
}

/// Read-only copy of the link state for the display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkSnapshot {
    pub status: LinkStatus,
    pub target: Option<DeviceId>,
    pub connected_since: Option<Instant>,
    pub last_data_at: Option<Instant>,
    pub last_reconnect_attempt_at: Option<Instant>,
    pub reconnect_interval: Duration,
}

impl Default for LinkSnapshot {
    fn default() -> Self {
        Self {
            status: LinkStatus::Idle,
            target: None,
            connected_since: None,
            last_data_at: None,
            last_reconnect_attempt_at: None,
            reconnect_interval: LinkConfig::default().reconnect_interval(),
        }
    }
}

impl LinkSnapshot {
    /// Countdown to the next reconnect attempt, while reconnecting.
    pub fn next_reconnect_in(&self, now: Instant) -> Option<Duration> {
        if self.status != LinkStatus::Reconnecting {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last_reconnect_attempt_at?);
        Some(self.reconnect_interval.saturating_sub(elapsed))
    }
}

#[derive(Debug, Clone)]
pub struct LinkStateMachine {
    state: State,
    poll_interval: Duration,
    stale_timeout: Duration,
    grace_period: Duration,
    reconnect_interval: Duration,
    heartbeat_interval: Option<Duration>,
}

impl LinkStateMachine {
    pub fn new(config: &LinkConfig) -> Self {
        Self {
            state: State::Idle,
            poll_interval: config.poll_interval(),
            stale_timeout: config.stale_timeout(),
            grace_period: config.grace_period(),
            reconnect_interval: config.reconnect_interval(),
            heartbeat_interval: config.heartbeat_interval(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.state.status()
    }

    /// Commands may only be sent while this is true.
    pub fn is_connected(&self) -> bool {
        matches!(self.state, State::Connected { .. })
    }

    pub fn target(&self) -> Option<&DeviceId> {
        match &self.state {
            State::Idle => None,
            State::Connecting { target }
            | State::Connected { target, .. }
            | State::Reconnecting { target, .. } => Some(target),
        }
    }

    pub fn snapshot(&self) -> LinkSnapshot {
        let (connected_since, last_data_at, last_reconnect_attempt_at) = match &self.state {
            State::Connected { connected_since, last_data_at, .. } => {
                (Some(*connected_since), Some(*last_data_at), None)
            }
            State::Reconnecting { last_attempt_at, .. } => (None, None, Some(*last_attempt_at)),
            State::Idle | State::Connecting { .. } => (None, None, None),
        };
        LinkSnapshot {
            status: self.status(),
            target: self.target().cloned(),
            connected_since,
            last_data_at,
            last_reconnect_attempt_at,
            reconnect_interval: self.reconnect_interval,
        }
    }

    /// Begin connecting to `device`. Only allowed from `Idle`.
    pub fn start_connect(&mut self, device: DeviceId) -> Result<LinkAction> {
        if !matches!(self.state, State::Idle) {
            return Err(Error::InvalidTransition { from: self.status(), action: "connect" });
        }
        self.transition(State::Connecting { target: device.clone() });
        Ok(LinkAction::Connect(device))
    }

    /// The transport finished connecting.
    ///
    /// A connection nobody is waiting for any more (the user cancelled while
    /// it was in progress) is torn down again.
    pub fn on_connected(&mut self, now: Instant) -> Option<LinkAction> {
        match &self.state {
            State::Connecting { target } | State::Reconnecting { target, .. } => {
                let target = target.clone();
                self.transition(State::Connected {
                    target,
                    connected_since: now,
                    last_data_at: now,
                    last_poll_at: None,
                    last_heartbeat_at: None,
                });
                None
            }
            State::Idle => {
                warn!("Connection completed after it was abandoned, disconnecting");
                Some(LinkAction::Disconnect)
            }
            State::Connected { .. } => None,
        }
    }

    /// The transport could not connect.
    pub fn on_connect_failed(&mut self) {
        match &mut self.state {
            State::Connecting { target } => {
                warn!("Failed to connect to {target}");
                self.transition(State::Idle);
            }
            State::Reconnecting { target, attempt_in_flight, .. } => {
                warn!("Reconnect attempt to {target} failed");
                *attempt_in_flight = false;
            }
            State::Idle | State::Connected { .. } => {}
        }
    }

    /// The transport reported the link gone.
    ///
    /// `expected` is true when the drop was requested from this side.
    pub fn on_disconnected(&mut self, expected: bool, now: Instant) {
        match &self.state {
            State::Connected { target, .. } if expected => {
                info!("Disconnected from {target}");
                self.transition(State::Idle);
            }
            State::Connected { target, .. } => {
                warn!("Lost connection to {target}");
                let target = target.clone();
                self.transition(State::Reconnecting {
                    target,
                    last_attempt_at: now,
                    attempt_in_flight: false,
                });
            }
            State::Connecting { .. } => self.on_connect_failed(),
            State::Reconnecting { attempt_in_flight: true, .. } => self.on_connect_failed(),
            State::Reconnecting { .. } | State::Idle => {}
        }
    }

    /// A validated frame arrived; the link is alive.
    pub fn on_frame(&mut self, now: Instant) {
        if let State::Connected { last_data_at, .. } = &mut self.state {
            *last_data_at = now;
        }
    }

    /// User asked to end the session. Returns the transport call to make, if any.
    pub fn disconnect(&mut self) -> Option<LinkAction> {
        match self.state {
            State::Idle => None,
            State::Connected { .. } => {
                self.transition(State::Idle);
                Some(LinkAction::Disconnect)
            }
            State::Connecting { .. } | State::Reconnecting { .. } => {
                self.transition(State::Idle);
                None
            }
        }
    }

    /// User gave up on a pending connection or on reconnecting.
    pub fn cancel(&mut self) -> Result<()> {
        match self.state {
            State::Idle => Ok(()),
            State::Connecting { .. } | State::Reconnecting { .. } => {
                self.transition(State::Idle);
                Ok(())
            }
            State::Connected { .. } => {
                Err(Error::InvalidTransition { from: LinkStatus::Connected, action: "cancel" })
            }
        }
    }

    /// User asked for a reconnect attempt right away.
    pub fn retry_now(&mut self, now: Instant) -> Result<Option<LinkAction>> {
        let from = self.status();
        match &mut self.state {
            State::Reconnecting { attempt_in_flight: true, .. } => Ok(None),
            State::Reconnecting { target, last_attempt_at, attempt_in_flight } => {
                info!("Retrying connection to {target} now");
                *last_attempt_at = now;
                *attempt_in_flight = true;
                Ok(Some(LinkAction::Connect(target.clone())))
            }
            _ => Err(Error::InvalidTransition { from, action: "retry" }),
        }
    }

    /// Advance timers: polling, heartbeat, staleness and reconnect spacing.
    pub fn tick(&mut self, now: Instant) -> Vec<LinkAction> {
        let mut actions = Vec::new();
        match &mut self.state {
            State::Connected { target, connected_since, last_data_at, last_poll_at, last_heartbeat_at } => {
                let since_connect = now.saturating_duration_since(*connected_since);
                let silence = now.saturating_duration_since(*last_data_at);
                if since_connect > self.grace_period && silence > self.stale_timeout {
                    warn!("No data from {target} for {silence:?}, reconnecting");
                    let target = target.clone();
                    self.transition(State::Reconnecting {
                        target,
                        last_attempt_at: now,
                        attempt_in_flight: false,
                    });
                    actions.push(LinkAction::Disconnect);
                    return actions;
                }

                if Self::due(*last_poll_at, self.poll_interval, now) {
                    *last_poll_at = Some(now);
                    actions.push(LinkAction::Send(Command::GetValues));
                }
                if let Some(interval) = self.heartbeat_interval {
                    if Self::due(*last_heartbeat_at, interval, now) {
                        *last_heartbeat_at = Some(now);
                        actions.push(LinkAction::Send(Command::Alive));
                    }
                }
            }
            State::Reconnecting { target, last_attempt_at, attempt_in_flight } if !*attempt_in_flight => {
                if now.saturating_duration_since(*last_attempt_at) >= self.reconnect_interval {
                    info!("Attempting to reconnect to {target}");
                    *last_attempt_at = now;
                    *attempt_in_flight = true;
                    actions.push(LinkAction::Connect(target.clone()));
                }
            }
            State::Idle | State::Connecting { .. } | State::Reconnecting { .. } => {}
        }
        actions
    }

    fn due(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
        last.map_or(true, |at| now.saturating_duration_since(at) >= interval)
    }

    fn transition(&mut self, next: State) {
        let from = self.status();
        let to = next.status();
        if from != to {
            info!("Link {from:?} -> {to:?}");
        }
        self.state = next;
    }
}
