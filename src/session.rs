//! The single control loop tying transport, codec, link and telemetry together.

use std::time::Duration;
use futures_util::future::{BoxFuture, FutureExt, OptionFuture};
use tokio::sync::{mpsc, watch};
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

use crate::config::LinkConfig;
use crate::error::{Error, Result};
use crate::frame::{encode_command, FrameCodec};
use crate::link::{DeviceId, LinkAction, LinkSnapshot, LinkStateMachine, LinkStatus};
use crate::message::{decode, Message};
use crate::protocol::Command;
use crate::telemetry::{Telemetry, TelemetryStore};
use crate::transport::{EventReceiver, Transport, TransportEvent};

/// Longest gap between timer checks
const MAX_TICK: Duration = Duration::from_millis(100);
const COMMAND_QUEUE_LEN: usize = 16;

/// Requests from the user/display side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserCommand {
    Connect(DeviceId),
    RetryNow,
    Cancel,
    Disconnect,
    Shutdown,
}

/// Cloneable front end to a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<UserCommand>,
    telemetry: watch::Receiver<Telemetry>,
    link: watch::Receiver<LinkSnapshot>,
}

impl SessionHandle {
    pub async fn connect(&self, device: impl Into<DeviceId>) -> Result<()> {
        self.send(UserCommand::Connect(device.into())).await
    }

    pub async fn retry_now(&self) -> Result<()> {
        self.send(UserCommand::RetryNow).await
    }

    pub async fn cancel(&self) -> Result<()> {
        self.send(UserCommand::Cancel).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.send(UserCommand::Disconnect).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(UserCommand::Shutdown).await
    }

    pub fn telemetry(&self) -> Telemetry {
        *self.telemetry.borrow()
    }

    pub fn link(&self) -> LinkSnapshot {
        self.link.borrow().clone()
    }

    pub fn subscribe_telemetry(&self) -> watch::Receiver<Telemetry> {
        self.telemetry.clone()
    }

    pub fn subscribe_link(&self) -> watch::Receiver<LinkSnapshot> {
        self.link.clone()
    }

    async fn send(&self, command: UserCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| Error::SessionClosed)
    }
}

/// A connect call in progress. It owns the transport until it finishes.
type Attempt<T> = BoxFuture<'static, (T, DeviceId, Result<()>)>;

/// Owns every piece of mutable link state; run it on one task.
///
/// Connect calls run alongside the loop rather than inside it, so user
/// commands and transport events are still handled while one is pending.
pub struct Session<T> {
    /// `None` while an attempt holds it
    transport: Option<T>,
    attempt: Option<Attempt<T>>,
    /// Connect requested while another attempt was still running
    queued_connect: Option<DeviceId>,
    events: EventReceiver,
    commands: mpsc::Receiver<UserCommand>,
    codec: FrameCodec,
    link: LinkStateMachine,
    telemetry: TelemetryStore,
    link_tx: watch::Sender<LinkSnapshot>,
    connect_timeout: Duration,
    tick_period: Duration,
}

impl<T: Transport> Session<T> {
    pub fn new(transport: T, events: EventReceiver, config: &LinkConfig) -> Result<(Self, SessionHandle)> {
        config.validate()?;

        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE_LEN);
        let link = LinkStateMachine::new(config);
        let (link_tx, link_rx) = watch::channel(link.snapshot());
        let telemetry = TelemetryStore::new();
        let handle = SessionHandle { commands: commands_tx, telemetry: telemetry.subscribe(), link: link_rx };

        let session = Self {
            transport: Some(transport),
            attempt: None,
            queued_connect: None,
            events,
            commands,
            codec: FrameCodec::with_capacity(config.max_buffer_len),
            link,
            telemetry,
            link_tx,
            connect_timeout: config.connect_timeout(),
            tick_period: config.poll_interval().min(MAX_TICK),
        };
        Ok((session, handle))
    }

    /// Run until [`SessionHandle::shutdown`] or until every handle is dropped.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(UserCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
                Some((transport, device, result)) = OptionFuture::from(self.attempt.as_mut()) => {
                    self.attempt = None;
                    self.finish_connect(transport, device, result).await;
                }
                _ = ticker.tick() => {
                    for action in self.link.tick(Instant::now()) {
                        self.perform(action).await;
                    }
                }
            }
            self.publish();
        }

        if self.attempt.take().is_some() {
            info!("Abandoning connect attempt in progress");
        }
        if let Some(action) = self.link.disconnect() {
            self.perform(action).await;
        }
        self.publish();
        info!("Session stopped");
        Ok(())
    }

    async fn handle_command(&mut self, command: UserCommand) {
        debug!("User command: {command:?}");
        let now = Instant::now();
        let action = match command {
            UserCommand::Connect(device) => self.link.start_connect(device).map(Some),
            UserCommand::RetryNow => self.link.retry_now(now),
            UserCommand::Cancel => self.link.cancel().map(|()| None),
            UserCommand::Disconnect => Ok(self.link.disconnect()),
            UserCommand::Shutdown => Ok(None),
        };
        match action {
            Ok(Some(action)) => self.perform(action).await,
            Ok(None) => {}
            Err(err) => warn!("Ignoring command: {err}"),
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        let now = Instant::now();
        match event {
            TransportEvent::Bytes(bytes) => {
                if !self.link.is_connected() {
                    trace!("Dropping {} bytes received while {:?}", bytes.len(), self.link.status());
                    return;
                }
                for frame in self.codec.feed(&bytes) {
                    self.link.on_frame(now);
                    match decode(&frame) {
                        Message::Values(values) => self.telemetry.record(values, now),
                        Message::HeartbeatAck => debug!("Heartbeat acknowledged"),
                        Message::Unrecognized { .. } => {}
                    }
                }
            }
            TransportEvent::Disconnected { expected } => {
                debug!("Codec totals at disconnect: {:?}", self.codec.stats());
                self.codec.clear();
                self.link.on_disconnected(expected, now);
            }
        }
    }

    async fn perform(&mut self, action: LinkAction) {
        match action {
            LinkAction::Connect(device) => self.start_connect(device),
            LinkAction::Disconnect => self.disconnect_transport().await,
            LinkAction::Send(command) => self.send(command).await,
        }
    }

    fn start_connect(&mut self, device: DeviceId) {
        let Some(mut transport) = self.transport.take() else {
            debug!("Connect to {device} waits for the attempt in progress");
            self.queued_connect = Some(device);
            return;
        };
        info!("Connecting to {device}");
        self.codec.clear();
        let limit = self.connect_timeout;
        self.attempt = Some(
            async move {
                let result = match timeout(limit, transport.connect(&device)).await {
                    Ok(result) => result,
                    Err(_) => Err(Error::ConnectTimeout { duration: limit }),
                };
                (transport, device, result)
            }
            .boxed(),
        );
    }

    async fn finish_connect(&mut self, transport: T, device: DeviceId, result: Result<()>) {
        self.transport = Some(transport);
        if matches!(result, Err(Error::ConnectTimeout { .. })) {
            self.disconnect_transport().await;
        }

        if let Some(next) = self.queued_connect.take() {
            // The link has moved on since this attempt began
            if result.is_ok() {
                self.disconnect_transport().await;
            }
            let wanted = matches!(self.link.status(), LinkStatus::Connecting | LinkStatus::Reconnecting);
            if wanted && self.link.target() == Some(&next) {
                self.start_connect(next);
            }
            return;
        }

        match result {
            Ok(()) => {
                if let Some(LinkAction::Disconnect) = self.link.on_connected(Instant::now()) {
                    self.disconnect_transport().await;
                }
            }
            Err(err) if err.is_retryable() => {
                warn!("Connect to {device} failed: {err}");
                self.link.on_connect_failed();
            }
            Err(err) => {
                error!("Connect to {device} failed, not retrying: {err}");
                self.link.on_connect_failed();
                if let Err(err) = self.link.cancel() {
                    warn!("Could not stop reconnecting: {err}");
                }
            }
        }
    }

    async fn disconnect_transport(&mut self) {
        self.codec.clear();
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if let Err(err) = transport.disconnect().await {
            warn!("Disconnect failed: {err}");
        }
    }

    async fn send(&mut self, command: Command) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        if !self.link.is_connected() {
            return;
        }
        let frame = encode_command(command.code());
        trace!("TX: {}", hex::encode(frame));
        if let Err(err) = transport.send(&frame).await {
            warn!("Failed to send {command:?}: {err}");
        }
    }

    fn publish(&self) {
        let snapshot = self.link.snapshot();
        self.link_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
