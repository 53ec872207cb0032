//! Mapping validated frames to telemetry updates or heartbeat acks.

mod values_message;

use tracing::debug;

use crate::frame::Frame;
use crate::protocol::Command;

pub use values_message::VALUES_MIN_LEN;
use values_message::ValuesMessage;

/// One decoded "read values" response.
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct Values {
    /// Battery voltage in V
    pub voltage: f32,
    /// Power stage (FET) temperature in °C
    pub fet_temperature_c: f32,
    /// Motor temperature in °C
    pub motor_temperature_c: f32,
}

/// What a validated frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// The controller answered an ALIVE command
    HeartbeatAck,
    Values(Values),
    /// Any other payload shape; carries the length for diagnostics
    Unrecognized { len: usize },
}

/// Interpret a frame's payload. Values are not range-checked.
pub fn decode(frame: &Frame) -> Message {
    let payload = &frame.payload[..];
    if payload == [Command::Alive.code()] {
        return Message::HeartbeatAck;
    }

    if let Some(msg) = ValuesMessage::new(payload) {
        let values = Values {
            voltage: msg.voltage(),
            fet_temperature_c: msg.fet_temperature_c(),
            motor_temperature_c: msg.motor_temperature_c(),
        };
        debug!(
            "Values: {:.1}V, FET {:.1}°C, motor {:.1}°C",
            values.voltage, values.fet_temperature_c, values.motor_temperature_c
        );
        return Message::Values(values);
    }

    debug!("Unrecognized payload ({} bytes): {}", payload.len(), hex::encode(payload));
    Message::Unrecognized { len: payload.len() }
}
