//! Frame encoding and the inbound frame assembler.
//!
//! Notifications arrive in arbitrary-sized chunks, so [`FrameCodec`] keeps an
//! inbound buffer across calls and only yields frames whose stop byte and
//! payload CRC both check out. Anything else is dropped and the scan
//! resynchronizes on the next START byte.

use std::collections::VecDeque;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::protocol::{crc16, HEADER_LEN, MAX_FRAME_LEN, START, STOP, TRAILER_LEN};

/// The validated content of one wire packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub payload: Vec<u8>,
}

/// Build the 6-byte frame carrying a single command code.
pub fn encode_command(code: u8) -> [u8; 6] {
    let [crc_hi, crc_lo] = crc16(&[code]).to_be_bytes();
    [START, 1, code, crc_hi, crc_lo, STOP]
}

/// Wrap an arbitrary payload in a frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::PayloadTooLarge { len: payload.len() })?;
    let mut wire = Vec::with_capacity(HEADER_LEN + payload.len() + TRAILER_LEN);
    wire.push(START);
    wire.push(len);
    wire.extend_from_slice(payload);
    wire.extend_from_slice(&crc16(payload).to_be_bytes());
    wire.push(STOP);
    Ok(wire)
}

/// Counters describing what the codec has seen since it was created.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CodecStats {
    /// Frames that passed both structural and CRC validation
    pub frames: u64,
    /// Candidates dropped because the payload CRC did not match
    pub crc_failures: u64,
    /// START bytes dropped because no STOP byte sat where LEN said it would
    pub resyncs: u64,
    /// Non-START bytes skipped while hunting for a frame boundary
    pub discarded_bytes: u64,
    /// Bytes dropped because the inbound buffer hit its cap
    pub overflow_drops: u64,
}

/// Result of looking at the front of the inbound buffer.
#[derive(Debug, PartialEq, Eq)]
enum Parse {
    /// Leading bytes before the next START
    Skip(usize),
    /// Need more bytes before anything can be decided
    Incomplete,
    /// The byte at the STOP position is something else
    BadStop,
    /// Structurally complete, but the CRC over the payload is wrong
    BadCrc { len: usize },
    Ok(Frame, usize),
}

fn try_parse(buffer: &[u8]) -> Parse {
    let Some(start) = buffer.iter().position(|&b| b == START) else {
        return match buffer.len() {
            0 => Parse::Incomplete,
            n => Parse::Skip(n),
        };
    };
    if start > 0 {
        return Parse::Skip(start);
    }

    if buffer.len() < HEADER_LEN {
        return Parse::Incomplete;
    }
    let len = buffer[1] as usize;
    let total = HEADER_LEN + len + TRAILER_LEN;
    if buffer.len() < total {
        return Parse::Incomplete;
    }
    if buffer[total - 1] != STOP {
        return Parse::BadStop;
    }

    let payload = &buffer[HEADER_LEN..HEADER_LEN + len];
    let crc_actual = u16::from_be_bytes([buffer[HEADER_LEN + len], buffer[HEADER_LEN + len + 1]]);
    if crc16(payload) != crc_actual {
        return Parse::BadCrc { len: total };
    }

    Parse::Ok(Frame { payload: payload.to_vec() }, total)
}

/// Stateful assembler turning a notification stream into validated frames.
#[derive(Debug)]
pub struct FrameCodec {
    buffer: Vec<u8>,
    /// Frames completed after the caller stopped reading
    ready: VecDeque<Frame>,
    capacity: usize,
    stats: CodecStats,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Smallest structurally valid frame (LEN = 0)
    const MIN_CAPACITY: usize = HEADER_LEN + TRAILER_LEN;

    /// A codec whose buffer can hold the largest possible frame.
    pub fn new() -> Self {
        Self::with_capacity(MAX_FRAME_LEN)
    }

    /// A codec whose inbound buffer never grows past `capacity` bytes.
    ///
    /// Frames longer than the capacity can never be assembled; their START
    /// byte is dropped once the buffer fills and the scan moves on.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(Self::MIN_CAPACITY);
        Self { buffer: Vec::with_capacity(capacity), ready: VecDeque::new(), capacity, stats: CodecStats::default() }
    }

    /// Append `bytes` and return the frames that became complete.
    ///
    /// The returned iterator pulls input into the buffer as it goes. Dropping
    /// it before the end still assembles the rest of `bytes`; frames completed
    /// that way come out first on the next call.
    pub fn feed<'a>(&'a mut self, bytes: &'a [u8]) -> Frames<'a> {
        Frames { codec: self, input: bytes }
    }

    /// Forget any partially received frame, and any completed frame not yet read.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.ready.clear();
    }

    /// Bytes currently waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> CodecStats {
        self.stats
    }
}

/// Frames completed by one [`FrameCodec::feed`] call.
pub struct Frames<'a> {
    codec: &'a mut FrameCodec,
    input: &'a [u8],
}

impl Frames<'_> {
    fn assemble(&mut self) -> Option<Frame> {
        let codec = &mut *self.codec;
        loop {
            match try_parse(&codec.buffer) {
                Parse::Ok(frame, len) => {
                    codec.buffer.drain(..len);
                    codec.stats.frames += 1;
                    trace!("RX frame: {}", hex::encode(&frame.payload));
                    return Some(frame);
                }
                Parse::Skip(n) => {
                    codec.buffer.drain(..n);
                    codec.stats.discarded_bytes += n as u64;
                }
                Parse::BadStop => {
                    codec.buffer.drain(..1);
                    codec.stats.resyncs += 1;
                }
                Parse::BadCrc { len } => {
                    debug!("CRC check failed, dropping frame: {}", hex::encode(&codec.buffer[..len]));
                    codec.buffer.drain(..len);
                    codec.stats.crc_failures += 1;
                }
                Parse::Incomplete => {
                    if self.input.is_empty() {
                        return None;
                    }
                    let room = codec.capacity - codec.buffer.len();
                    if room == 0 {
                        // A candidate that can never fit: give up on its START
                        warn!("Inbound buffer full without a complete frame, resynchronizing");
                        codec.buffer.drain(..1);
                        codec.stats.overflow_drops += 1;
                        continue;
                    }
                    let take = room.min(self.input.len());
                    codec.buffer.extend_from_slice(&self.input[..take]);
                    self.input = &self.input[take..];
                }
            }
        }
    }
}

impl Iterator for Frames<'_> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        match self.codec.ready.pop_front() {
            Some(frame) => Some(frame),
            None => self.assemble(),
        }
    }
}

impl Drop for Frames<'_> {
    fn drop(&mut self) {
        while let Some(frame) = self.assemble() {
            self.codec.ready.push_back(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Command;
    use proptest::prelude::*;

    fn feed_all(codec: &mut FrameCodec, bytes: &[u8]) -> Vec<Frame> {
        codec.feed(bytes).collect()
    }

    fn values_payload() -> Vec<u8> {
        let mut payload = vec![0u8; 29];
        payload[0..2].copy_from_slice(&[0x01, 0x45]);
        payload[26..28].copy_from_slice(&[0x00, 0xC8]);
        payload
    }

    #[test]
    fn test_encode_alive() {
        assert_eq!(hex::encode(encode_command(Command::Alive.code())), "02011ef3ff03");
    }

    #[test]
    fn test_encode_get_values() {
        assert_eq!(hex::encode(encode_command(Command::GetValues.code())), "020104408403");
    }

    #[test]
    fn test_encode_frame_matches_encode_command() {
        assert_eq!(encode_frame(&[0x04]).unwrap(), encode_command(0x04).to_vec());
    }

    #[test]
    fn test_encode_frame_too_large() {
        let err = encode_frame(&[0u8; 256]).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { len: 256 }));
    }

    #[test]
    fn test_try_parse_happy() {
        let wire = encode_command(0x1E);
        assert_eq!(try_parse(&wire), Parse::Ok(Frame { payload: vec![0x1E] }, 6));
    }

    #[test]
    fn test_try_parse_empty_payload() {
        // CRC of an empty payload is zero
        let wire = hex::decode("0200000003").unwrap();
        assert_eq!(try_parse(&wire), Parse::Ok(Frame { payload: vec![] }, 5));
    }

    #[test]
    fn test_try_parse_short_buffer() {
        let wire = encode_command(0x1E);
        for end in 0..wire.len() {
            assert_eq!(try_parse(&wire[..end]), Parse::Incomplete, "prefix of {end} bytes");
        }
    }

    #[test]
    fn test_try_parse_bad_stop() {
        let wire = hex::decode("02011ef3ff04").unwrap();
        assert_eq!(try_parse(&wire), Parse::BadStop);
    }

    #[test]
    fn test_try_parse_bad_crc() {
        let wire = hex::decode("02011ef3fe03").unwrap();
        assert_eq!(try_parse(&wire), Parse::BadCrc { len: 6 });
    }

    #[test]
    fn test_feed_single_frame() {
        let mut codec = FrameCodec::new();
        let frames = feed_all(&mut codec, &encode_command(0x04));
        assert_eq!(frames, vec![Frame { payload: vec![0x04] }]);
        assert_eq!(codec.buffered(), 0);
        assert_eq!(codec.stats().frames, 1);
    }

    #[test]
    fn test_feed_leading_garbage() {
        let mut wire = vec![0xFF, 0xFF];
        wire.extend_from_slice(&encode_command(0x1E));

        let mut codec = FrameCodec::new();
        assert_eq!(feed_all(&mut codec, &wire), vec![Frame { payload: vec![0x1E] }]);
        assert_eq!(codec.stats().discarded_bytes, 2);
    }

    #[test]
    fn test_feed_false_start_resyncs() {
        // START, LEN=1 then the real frame: the first candidate has no STOP at offset 5
        let mut wire = vec![START, 0x01];
        wire.extend_from_slice(&encode_command(0x1E));

        let mut codec = FrameCodec::new();
        assert_eq!(feed_all(&mut codec, &wire), vec![Frame { payload: vec![0x1E] }]);
        assert_eq!(codec.stats().resyncs, 1);
    }

    #[test]
    fn test_feed_bad_crc_then_valid() {
        let mut wire = hex::decode("02011ef3fe03").unwrap();
        wire.extend_from_slice(&encode_command(0x04));

        let mut codec = FrameCodec::new();
        assert_eq!(feed_all(&mut codec, &wire), vec![Frame { payload: vec![0x04] }]);
        assert_eq!(codec.stats().crc_failures, 1);
    }

    #[test]
    fn test_feed_two_frames_in_one_chunk() {
        let mut wire = encode_command(0x1E).to_vec();
        wire.extend_from_slice(&encode_frame(&values_payload()).unwrap());

        let mut codec = FrameCodec::new();
        let frames = feed_all(&mut codec, &wire);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].payload, vec![0x1E]);
        assert_eq!(frames[1].payload, values_payload());
    }

    #[test]
    fn test_feed_waits_for_rest() {
        let wire = encode_frame(&values_payload()).unwrap();
        let mut codec = FrameCodec::new();

        assert!(feed_all(&mut codec, &wire[..20]).is_empty());
        assert_eq!(codec.buffered(), 20);
        assert_eq!(feed_all(&mut codec, &wire[20..]).len(), 1);
    }

    #[test]
    fn test_dropped_iterator_keeps_input() {
        let mut wire = encode_command(0x1E).to_vec();
        wire.extend_from_slice(&encode_command(0x04));

        let mut codec = FrameCodec::new();
        let first = codec.feed(&wire).next();
        assert_eq!(first, Some(Frame { payload: vec![0x1E] }));
        assert_eq!(feed_all(&mut codec, &[]), vec![Frame { payload: vec![0x04] }]);
    }

    #[test]
    fn test_dropped_iterator_keeps_frames_beyond_capacity() {
        let mut wire = Vec::new();
        for _ in 0..4 {
            wire.extend_from_slice(&encode_frame(&values_payload()).unwrap());
        }
        wire.extend_from_slice(&encode_command(0x1E));
        assert!(wire.len() > 2 * 64);

        let mut codec = FrameCodec::with_capacity(64);
        assert_eq!(codec.feed(&wire).next(), Some(Frame { payload: values_payload() }));
        assert!(codec.buffered() <= 64);

        let rest = feed_all(&mut codec, &[]);
        assert_eq!(rest.len(), 4);
        assert!(rest[..3].iter().all(|frame| frame.payload == values_payload()));
        assert_eq!(rest[3], Frame { payload: vec![0x1E] });
        assert_eq!(codec.stats().overflow_drops, 0);
        assert_eq!(codec.stats().frames, 5);
    }

    #[test]
    fn test_clear_drops_unread_frames() {
        let mut wire = encode_command(0x1E).to_vec();
        wire.extend_from_slice(&encode_command(0x04));

        let mut codec = FrameCodec::new();
        assert!(codec.feed(&wire).next().is_some());
        codec.clear();
        assert!(feed_all(&mut codec, &[]).is_empty());
    }

    #[test]
    fn test_clear_discards_partial_frame() {
        let wire = encode_command(0x04);
        let mut codec = FrameCodec::new();
        assert!(feed_all(&mut codec, &wire[..3]).is_empty());
        codec.clear();
        assert!(feed_all(&mut codec, &wire[3..]).is_empty());
        assert_eq!(codec.buffered(), 0);
    }

    #[test]
    fn test_capacity_drops_oversized_candidate() {
        // LEN=200 can never fit in 16 bytes; the codec must resync on the next frame
        let mut wire = vec![START, 200];
        wire.extend_from_slice(&[0u8; 20]);
        wire.extend_from_slice(&encode_command(0x1E));

        let mut codec = FrameCodec::with_capacity(16);
        assert_eq!(feed_all(&mut codec, &wire), vec![Frame { payload: vec![0x1E] }]);
        assert!(codec.stats().overflow_drops >= 1);
        assert!(codec.buffered() <= 16);
    }

    #[test]
    fn test_buffer_stays_bounded_on_noise() {
        let noise = vec![0xAAu8; 10_000];
        let mut codec = FrameCodec::new();
        assert!(feed_all(&mut codec, &noise).is_empty());
        assert_eq!(codec.buffered(), 0);
        assert_eq!(codec.stats().discarded_bytes, 10_000);
    }

    proptest! {
        #[test]
        fn fragmentation_does_not_change_the_frame(
            cuts in proptest::collection::vec(1usize..8, 0..40)
        ) {
            let payload = values_payload();
            let wire = encode_frame(&payload).unwrap();

            let mut codec = FrameCodec::new();
            let mut frames = Vec::new();
            let mut rest = &wire[..];
            for cut in cuts {
                if rest.is_empty() {
                    break;
                }
                let n = cut.min(rest.len());
                frames.extend(codec.feed(&rest[..n]));
                rest = &rest[n..];
            }
            frames.extend(codec.feed(rest));

            prop_assert_eq!(frames, vec![Frame { payload }]);
        }

        #[test]
        fn command_round_trips(code in any::<u8>()) {
            let mut codec = FrameCodec::new();
            let frames: Vec<Frame> = codec.feed(&encode_command(code)).collect();
            prop_assert_eq!(frames, vec![Frame { payload: vec![code] }]);
        }

        #[test]
        fn corrupt_payload_is_dropped_and_stream_recovers(
            index in 0usize..29,
            bit in 0u8..8
        ) {
            let mut wire = encode_frame(&values_payload()).unwrap();
            wire[HEADER_LEN + index] ^= 1 << bit;
            wire.extend_from_slice(&encode_command(0x1E));

            let mut codec = FrameCodec::new();
            let frames: Vec<Frame> = codec.feed(&wire).collect();
            prop_assert_eq!(frames, vec![Frame { payload: vec![0x1E] }]);
            prop_assert_eq!(codec.stats().crc_failures, 1);
        }
    }
}
