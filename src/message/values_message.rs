/// Shortest payload recognized as a "read values" response.
pub const VALUES_MIN_LEN: usize = 29;

const FET_TEMP_OFFSET: usize = 0;
const MOTOR_TEMP_OFFSET: usize = 2;
// Offsets taken from device captures, not from a published layout
const VOLTAGE_OFFSET: usize = 26;

/// The controller's live values record.
///
/// All fields are big-endian signed 16-bit integers in tenths of a unit.
/// The response carries no command echo; it is recognized by length alone.
pub(crate) struct ValuesMessage<'a>(&'a [u8]);

impl<'a> ValuesMessage<'a> {
    pub fn new(payload: &'a [u8]) -> Option<Self> {
        (payload.len() >= VALUES_MIN_LEN).then_some(Self(payload))
    }

    pub fn fet_temperature_c(&self) -> f32 {
        self.tenths(FET_TEMP_OFFSET)
    }

    pub fn motor_temperature_c(&self) -> f32 {
        self.tenths(MOTOR_TEMP_OFFSET)
    }

    pub fn voltage(&self) -> f32 {
        self.tenths(VOLTAGE_OFFSET)
    }

    fn tenths(&self, offset: usize) -> f32 {
        let raw = i16::from_be_bytes([self.0[offset], self.0[offset + 1]]);
        f32::from(raw) / 10.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_too_short() {
        assert!(ValuesMessage::new(&[0u8; VALUES_MIN_LEN - 1]).is_none());
    }

    #[test]
    fn test_negative_temperature() {
        let mut payload = [0u8; VALUES_MIN_LEN];
        payload[0..2].copy_from_slice(&(-55i16).to_be_bytes());
        let msg = ValuesMessage::new(&payload).unwrap();
        assert_eq!(msg.fet_temperature_c(), -5.5);
    }

    #[test]
    fn test_longer_payload_is_accepted() {
        let mut payload = vec![0u8; 64];
        payload[26..28].copy_from_slice(&[0x01, 0x2C]);
        let msg = ValuesMessage::new(&payload).unwrap();
        assert_eq!(msg.voltage(), 30.0);
    }
}
