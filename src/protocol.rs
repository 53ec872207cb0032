//! Wire constants for the controller's UART-over-BLE protocol.
//!
//! ```text
//! ┌───────┬─────┬───────────────┬────────────────┬──────┐
//! │ START │ LEN │ PAYLOAD       │ CRC16 (BE)     │ STOP │
//! │ 0x02  │ 1B  │ LEN bytes     │ over PAYLOAD   │ 0x03 │
//! └───────┴─────┴───────────────┴────────────────┴──────┘
//! ```

use crc16::{State, XMODEM};

/// Frame synchronization byte
pub const START: u8 = 0x02;

/// Frame terminator
pub const STOP: u8 = 0x03;

/// START + LEN
pub const HEADER_LEN: usize = 2;

/// CRC16 + STOP
pub const TRAILER_LEN: usize = 3;

/// Largest frame a one-byte LEN can describe
pub const MAX_FRAME_LEN: usize = HEADER_LEN + u8::MAX as usize + TRAILER_LEN;

/// Commands the link knows how to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    /// Request the live values record
    GetValues = 0x04,
    /// Liveness check; the controller echoes the code back
    Alive = 0x1E,
}

impl Command {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// CRC16-CCITT, polynomial 0x1021, initial value 0, MSB first, no final XOR.
pub fn crc16(payload: &[u8]) -> u16 {
    State::<XMODEM>::calculate(payload)
}

#[test]
fn test_crc_empty_payload() {
    assert_eq!(crc16(&[]), 0x0000);
}

#[test]
fn test_crc_alive_payload() {
    assert_eq!(crc16(&[Command::Alive.code()]), 0xF3FF);
}

#[test]
fn test_crc_check_value() {
    assert_eq!(crc16(b"123456789"), 0x31C3);
}

#[test]
fn test_command_codes() {
    assert_eq!(Command::GetValues.code(), 4);
    assert_eq!(Command::Alive.code(), 30);
}
