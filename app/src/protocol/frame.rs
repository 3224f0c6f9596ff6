use std::fmt;

use derive_more::derive::{Display, Error};

pub const FRAME_LEN: usize = 8;
pub const PAYLOAD_LEN: usize = 7;

/// One wallpad bus frame: seven payload bytes followed by the nibble checksum.
/// A `Frame` always carries a valid checksum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frame([u8; FRAME_LEN]);

#[derive(Debug, Clone, PartialEq, Eq, Display, Error)]
pub enum FrameError {
    #[display("Frame must be 8 bytes, got {len}")]
    Length { len: usize },
    #[display("Invalid hex {input:?}")]
    Hex { input: String },
    #[display("Checksum mismatch for {hex}, expected {expected:02X}")]
    Checksum { hex: String, expected: u8 },
}

/// Sum of high nibbles and sum of low nibbles, carry of the low sum folded into the high one.
pub fn checksum(payload: &[u8; PAYLOAD_LEN]) -> u8 {
    let (high, low) = payload.iter().fold((0u32, 0u32), |(high, low), byte| {
        (high + u32::from(byte >> 4), low + u32::from(byte & 0x0F))
    });

    let high = (high + low / 16) % 16;
    let low = low % 16;

    ((high << 4) | low) as u8
}

pub fn verify(bytes: &[u8]) -> bool {
    Frame::from_bytes(bytes).is_ok()
}

impl Frame {
    pub fn seal(payload: [u8; PAYLOAD_LEN]) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[..PAYLOAD_LEN].copy_from_slice(&payload);
        bytes[PAYLOAD_LEN] = checksum(&payload);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let bytes: [u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| FrameError::Length { len: bytes.len() })?;

        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[..PAYLOAD_LEN]);
        let expected = checksum(&payload);

        if bytes[PAYLOAD_LEN] != expected {
            return Err(FrameError::Checksum {
                hex: hex::encode_upper(bytes),
                expected,
            });
        }

        Ok(Self(bytes))
    }

    /// Parses a complete 16 digit frame and verifies its checksum.
    pub fn from_hex(input: &str) -> Result<Self, FrameError> {
        Self::from_bytes(&decode_hex(input)?)
    }

    /// Seals the first seven bytes of a hex payload, anything after them is ignored.
    pub fn seal_hex(input: &str) -> Result<Self, FrameError> {
        let bytes = decode_hex(input)?;
        if bytes.len() < PAYLOAD_LEN {
            return Err(FrameError::Length { len: bytes.len() });
        }

        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&bytes[..PAYLOAD_LEN]);
        Ok(Self::seal(payload))
    }

    pub fn header(&self) -> u8 {
        self.0[0]
    }

    pub fn byte(&self, pos: usize) -> Option<u8> {
        self.0.get(pos).copied()
    }

    pub fn payload(&self) -> [u8; PAYLOAD_LEN] {
        let mut payload = [0u8; PAYLOAD_LEN];
        payload.copy_from_slice(&self.0[..PAYLOAD_LEN]);
        payload
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.0
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(self.0))
    }
}

/// Splits received bus data into frames. Chunks with a bad checksum and a trailing partial chunk
/// are dropped.
pub fn segment(data: &[u8]) -> Vec<Frame> {
    data.chunks(FRAME_LEN)
        .filter_map(|chunk| match Frame::from_bytes(chunk) {
            Ok(frame) => Some(frame),
            Err(e) => {
                tracing::trace!("Dropping bus chunk {}: {}", hex::encode_upper(chunk), e);
                infrastructure::meter::increment("wallpad_frames_dropped", &[]);
                None
            }
        })
        .collect()
}

fn decode_hex(input: &str) -> Result<Vec<u8>, FrameError> {
    hex::decode(input.trim()).map_err(|_| FrameError::Hex {
        input: input.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_of_thermostat_state() {
        let frame = Frame::seal_hex("82830124200000").unwrap();
        assert_eq!(frame.to_string(), "828301242000004A");
    }

    #[test]
    fn checksum_carries_low_nibble_overflow() {
        let frame = Frame::seal_hex("A0010101081500").unwrap();
        assert_eq!(frame.as_bytes()[7], 0xC0);
    }

    #[test]
    fn seal_ignores_trailing_input() {
        let frame = Frame::seal_hex("31010100000000FF").unwrap();
        assert_eq!(frame.to_string(), "3101010000000033");
    }

    #[test]
    fn known_frames_verify() {
        for hex in [
            "3101010000000033",
            "040104810000008A",
            "780102030000007E",
            "9080800000000090",
            "F901011100010310",
            "2301012300000048",
        ] {
            assert!(Frame::from_hex(hex).is_ok(), "{hex} should verify");
        }
    }

    fn payload_sweep() -> impl Iterator<Item = [u8; PAYLOAD_LEN]> {
        let base = [0x82, 0x83, 0x01, 0x24, 0x20, 0x00, 0x00];
        (0..PAYLOAD_LEN).flat_map(move |pos| {
            (0..=u8::MAX).map(move |value| {
                let mut payload = base;
                payload[pos] = value;
                payload
            })
        })
    }

    #[test]
    fn sealed_payloads_verify() {
        for payload in payload_sweep() {
            let frame = Frame::seal(payload);

            let byte_sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b));
            assert_eq!(frame.as_bytes()[PAYLOAD_LEN], byte_sum, "checksum of {frame}");
            assert!(verify(frame.as_bytes()), "{frame} should verify");
            assert_eq!(frame.payload(), payload);
        }
    }

    #[test]
    fn single_bit_corruption_is_detected() {
        for payload in payload_sweep() {
            let valid = Frame::seal(payload);

            for byte in 0..FRAME_LEN {
                for bit in 0..8 {
                    let mut bytes = *valid.as_bytes();
                    bytes[byte] ^= 1 << bit;
                    assert!(!verify(&bytes), "flip of bit {bit} in byte {byte} of {valid} went unnoticed");
                }
            }
        }
    }

    #[test]
    fn invalid_checksums_are_rejected() {
        assert!(matches!(
            Frame::from_hex("F70101810000FFFF"),
            Err(FrameError::Checksum { .. })
        ));
        assert!(matches!(
            Frame::from_hex("F60101182425FFFF"),
            Err(FrameError::Checksum { .. })
        ));
    }

    #[test]
    fn malformed_hex_is_rejected() {
        assert!(matches!(Frame::from_hex("XYZ"), Err(FrameError::Hex { .. })));
        assert!(matches!(Frame::from_hex("3101"), Err(FrameError::Length { len: 2 })));
        assert!(matches!(Frame::seal_hex("3101"), Err(FrameError::Length { len: 2 })));
    }

    #[test]
    fn segment_keeps_valid_frames_only() {
        let mut data = hex::decode("B0010100000000B2").unwrap();
        data.extend(hex::decode("F70101810000FFFF").unwrap());
        data.extend(hex::decode("9080800000000090").unwrap());
        data.extend([0xB0, 0x01]);

        let frames: Vec<String> = segment(&data).iter().map(Frame::to_string).collect();

        assert_eq!(frames, vec!["B0010100000000B2", "9080800000000090"]);
    }

    #[test]
    fn accessors() {
        let frame = Frame::from_hex("F6000101000000F8").unwrap();
        assert_eq!(frame.header(), 0xF6);
        assert_eq!(frame.byte(2), Some(0x01));
        assert_eq!(frame.byte(8), None);
        assert_eq!(frame.payload(), [0xF6, 0x00, 0x01, 0x01, 0x00, 0x00, 0x00]);
    }
}
