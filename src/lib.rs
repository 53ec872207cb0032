//! Read live telemetry from VESC-style motor controllers over Bluetooth Low Energy
//!
//! The controller has a BLE interface. On top of that the Nordic UART service is used for
//! serial communication, and on top of that a small framed request/response protocol:
//!
//! ```text
//! [0x02][LEN][PAYLOAD: LEN bytes][CRC16 big-endian][0x03]
//! ```
//!
//! Currently the following data can be accessed:
//!
//! - Battery voltage (V)
//! - FET temperature (°C)
//! - Motor temperature (°C)
//!
//! Radio links drop. A [`Session`] polls the controller, notices when data stops coming,
//! and reconnects on its own until told to stop.
//!
//! # Example
//!
//! ```rust,no_run
//! # use std::time::Duration;
//! # use vescread::{event_queue, BleTransport, LinkConfig, Session};
//! #
//! # #[tokio::main]
//! # pub async fn main() -> vescread::Result<()> {
//!     let config = LinkConfig::default();
//!     let (events_tx, events_rx) = event_queue(config.event_queue_len);
//!     let (session, handle) = Session::new(BleTransport::new(events_tx), events_rx, &config)?;
//!     tokio::spawn(session.run());
//!
//!     handle.connect("VESC BLE UART").await?;
//!     loop {
//!         let telemetry = handle.telemetry();
//!         println!("{:.1}V {:.1}°C", telemetry.voltage, telemetry.fet_temperature_c);
//!         tokio::time::sleep(Duration::from_secs(1)).await;
//!     }
//! # }
//! ```

mod ble;
mod config;
mod error;
pub mod frame;
mod link;
pub mod message;
pub mod protocol;
mod session;
mod telemetry;
mod transport;

pub use ble::BleTransport;
pub use config::LinkConfig;
pub use error::{Error, Result};
pub use frame::{encode_command, CodecStats, Frame, FrameCodec};
pub use link::{DeviceId, LinkAction, LinkSnapshot, LinkStateMachine, LinkStatus};
pub use message::{decode, Message, Values};
pub use protocol::Command;
pub use session::{Session, SessionHandle, UserCommand};
pub use telemetry::{Telemetry, TelemetryStore};
pub use transport::{event_queue, EventReceiver, EventSender, Transport, TransportEvent};
