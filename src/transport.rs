//! The boundary between the link logic and the radio.
//!
//! Outbound calls go through [`Transport`]. Inbound traffic (notification
//! bytes, link loss) is pushed by the transport into a bounded queue that the
//! session's control loop drains, so the frame codec never runs on the
//! transport's own task.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::link::DeviceId;

/// Something the transport observed on its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One notification's worth of bytes, in arrival order
    Bytes(Vec<u8>),
    /// The link went away. `expected` is true if [`Transport::disconnect`] asked for it
    Disconnected { expected: bool },
}

pub type EventSender = mpsc::Sender<TransportEvent>;
pub type EventReceiver = mpsc::Receiver<TransportEvent>;

/// Bounded queue from the transport to the control loop.
pub fn event_queue(capacity: usize) -> (EventSender, EventReceiver) {
    mpsc::channel(capacity)
}

#[async_trait::async_trait]
pub trait Transport: Send + 'static {
    /// Find `device`, connect and get ready to send and receive.
    ///
    /// Returns once the link is usable; bytes received afterwards arrive as
    /// [`TransportEvent::Bytes`].
    async fn connect(&mut self, device: &DeviceId) -> Result<()>;

    /// Drop the link. Safe to call when already disconnected.
    async fn disconnect(&mut self) -> Result<()>;

    /// Write one encoded frame.
    async fn send(&mut self, bytes: &[u8]) -> Result<()>;
}
