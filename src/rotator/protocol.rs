//! Rot2Prog frame codec.
//!
//! Commands are 13 bytes, `W H1 H2 H3 H4 PH V1 V2 V3 V4 PV K <space>`, with
//! the set-point angles written as ASCII digits of `PH * (360 + angle)`.
//! Responses are 12 bytes, `W H1 H2 H3 H4 PH V1 V2 V3 V4 PV <space>`, with raw
//! digit values giving tenths of a degree offset by 360.

use super::error::RotatorError;
use super::types::{Command, Limits, RotatorPosition};

pub const COMMAND_LEN: usize = 13;
pub const RESPONSE_LEN: usize = 12;

const FRAME_START: u8 = b'W';
const FRAME_END: u8 = b' ';

const CMD_STOP: u8 = 0x0F;
const CMD_STATUS: u8 = 0x1F;
const CMD_SET: u8 = 0x2F;

const ANGLE_OFFSET: f64 = 360.0;
const RESPONSE_SCALE: f64 = 10.0;
const MAX_FIELD: f64 = 9999.0;

pub const DEFAULT_PULSES_PER_DEGREE: u8 = 10;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rot2Prog {
    pulses_per_degree: u8,
    limits: Limits,
}

impl Default for Rot2Prog {
    fn default() -> Self {
        Self::new(DEFAULT_PULSES_PER_DEGREE, Limits::default())
    }
}

impl Rot2Prog {
    pub fn new(pulses_per_degree: u8, limits: Limits) -> Self {
        Self {
            pulses_per_degree: pulses_per_degree.max(1),
            limits,
        }
    }

    /// Checks that `pos` is inside the device limits and fits a set frame.
    pub fn validate(&self, pos: &RotatorPosition) -> Result<(), RotatorError> {
        let scale = f64::from(self.pulses_per_degree);
        if self.limits.contains(pos)
            && field_value(pos.azimuth_deg, scale).is_some()
            && field_value(pos.elevation_deg, scale).is_some()
        {
            Ok(())
        } else {
            Err(encoding_error(pos))
        }
    }

    pub fn encode(&self, command: &Command) -> Result<[u8; COMMAND_LEN], RotatorError> {
        let mut frame = [0u8; COMMAND_LEN];
        frame[0] = FRAME_START;
        frame[COMMAND_LEN - 1] = FRAME_END;

        match command {
            Command::GetPosition => frame[11] = CMD_STATUS,
            Command::Stop => frame[11] = CMD_STOP,
            Command::MoveTo(pos) => {
                self.validate(pos)?;
                let scale = f64::from(self.pulses_per_degree);
                let h = field_value(pos.azimuth_deg, scale)
                    .ok_or_else(|| encoding_error(pos))?;
                let v = field_value(pos.elevation_deg, scale)
                    .ok_or_else(|| encoding_error(pos))?;

                frame[1..5].copy_from_slice(&ascii_digits(h));
                frame[5] = self.pulses_per_degree;
                frame[6..10].copy_from_slice(&ascii_digits(v));
                frame[10] = self.pulses_per_degree;
                frame[11] = CMD_SET;
            }
        }

        Ok(frame)
    }

    pub fn decode(&self, frame: &[u8]) -> Result<RotatorPosition, RotatorError> {
        check_envelope(frame, RESPONSE_LEN)?;

        let pos = RotatorPosition::new(
            decode_raw_digits(&frame[1..5])? as f64 / RESPONSE_SCALE - ANGLE_OFFSET,
            decode_raw_digits(&frame[6..10])? as f64 / RESPONSE_SCALE - ANGLE_OFFSET,
        );

        if !self.limits.contains(&pos) {
            return Err(RotatorError::Decoding {
                azimuth: pos.azimuth_deg,
                elevation: pos.elevation_deg,
            });
        }

        Ok(pos)
    }

    /// Builds the status reply a device would send while at `pos`.
    pub fn encode_response(
        &self,
        pos: &RotatorPosition,
    ) -> Result<[u8; RESPONSE_LEN], RotatorError> {
        if !self.limits.contains(pos) {
            return Err(encoding_error(pos));
        }
        let h = field_value(pos.azimuth_deg, RESPONSE_SCALE)
            .ok_or_else(|| encoding_error(pos))?;
        let v = field_value(pos.elevation_deg, RESPONSE_SCALE)
            .ok_or_else(|| encoding_error(pos))?;

        let mut frame = [0u8; RESPONSE_LEN];
        frame[0] = FRAME_START;
        frame[1..5].copy_from_slice(&raw_digits(h));
        frame[5] = self.pulses_per_degree;
        frame[6..10].copy_from_slice(&raw_digits(v));
        frame[10] = self.pulses_per_degree;
        frame[RESPONSE_LEN - 1] = FRAME_END;
        Ok(frame)
    }

    /// Parses a command frame as the device would.
    pub fn decode_command(&self, frame: &[u8]) -> Result<Command, RotatorError> {
        check_envelope(frame, COMMAND_LEN)?;

        match frame[11] {
            CMD_STATUS => Ok(Command::GetPosition),
            CMD_STOP => Ok(Command::Stop),
            CMD_SET => {
                let (ph, pv) = (frame[5], frame[10]);
                if ph == 0 || pv == 0 {
                    return Err(RotatorError::Framing("zero pulses per degree".into()));
                }
                let h = decode_ascii_digits(&frame[1..5])?;
                let v = decode_ascii_digits(&frame[6..10])?;
                Ok(Command::MoveTo(RotatorPosition::new(
                    h as f64 / f64::from(ph) - ANGLE_OFFSET,
                    v as f64 / f64::from(pv) - ANGLE_OFFSET,
                )))
            }
            other => Err(RotatorError::Framing(format!(
                "unknown command byte 0x{:02x}",
                other
            ))),
        }
    }
}

fn encoding_error(pos: &RotatorPosition) -> RotatorError {
    RotatorError::Encoding {
        azimuth: pos.azimuth_deg,
        elevation: pos.elevation_deg,
    }
}

fn field_value(angle: f64, scale: f64) -> Option<u16> {
    let value = ((angle + ANGLE_OFFSET) * scale).round();
    if (0.0..=MAX_FIELD).contains(&value) {
        Some(value as u16)
    } else {
        None
    }
}

fn raw_digits(value: u16) -> [u8; 4] {
    [
        (value / 1000 % 10) as u8,
        (value / 100 % 10) as u8,
        (value / 10 % 10) as u8,
        (value % 10) as u8,
    ]
}

fn ascii_digits(value: u16) -> [u8; 4] {
    raw_digits(value).map(|d| b'0' + d)
}

fn check_envelope(frame: &[u8], len: usize) -> Result<(), RotatorError> {
    if frame.len() != len {
        return Err(RotatorError::Framing(format!(
            "expected {} bytes, got {}",
            len,
            frame.len()
        )));
    }
    if frame[0] != FRAME_START {
        return Err(RotatorError::Framing(format!(
            "bad start byte 0x{:02x}",
            frame[0]
        )));
    }
    if frame[len - 1] != FRAME_END {
        return Err(RotatorError::Framing(format!(
            "bad terminator 0x{:02x}",
            frame[len - 1]
        )));
    }
    Ok(())
}

fn decode_raw_digits(digits: &[u8]) -> Result<u32, RotatorError> {
    digits.iter().try_fold(0u32, |acc, &d| {
        if d > 9 {
            Err(RotatorError::Framing(format!("invalid digit 0x{:02x}", d)))
        } else {
            Ok(acc * 10 + u32::from(d))
        }
    })
}

fn decode_ascii_digits(digits: &[u8]) -> Result<u32, RotatorError> {
    digits.iter().try_fold(0u32, |acc, &d| {
        if d.is_ascii_digit() {
            Ok(acc * 10 + u32::from(d - b'0'))
        } else {
            Err(RotatorError::Framing(format!("invalid ascii digit 0x{:02x}", d)))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn encodes_set_command() {
        let codec = Rot2Prog::default();
        let frame = codec
            .encode(&Command::MoveTo(RotatorPosition::new(123.5, 45.0)))
            .unwrap();
        assert_eq!(&frame, b"W4835\x0a4050\x0a\x2f ");
    }

    #[test]
    fn encodes_status_and_stop() {
        let codec = Rot2Prog::default();
        let status = codec.encode(&Command::GetPosition).unwrap();
        assert_eq!(status, [b'W', 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0x1f, b' ']);
        let stop = codec.encode(&Command::Stop).unwrap();
        assert_eq!(stop[11], 0x0f);
        assert_eq!(stop[1..11], [0u8; 10]);
    }

    #[test]
    fn decodes_status_reply() {
        let codec = Rot2Prog::default();
        let frame = [b'W', 3, 7, 2, 0, 0x0a, 3, 9, 0, 5, 0x0a, b' '];
        let pos = codec.decode(&frame).unwrap();
        assert!(close(pos.azimuth_deg, 12.0));
        assert!(close(pos.elevation_deg, 30.5));
    }

    #[test]
    fn response_round_trip_within_resolution() {
        let codec = Rot2Prog::default();
        for pos in [
            RotatorPosition::new(0.0, 0.0),
            RotatorPosition::new(359.9, 90.0),
            RotatorPosition::new(187.24, 12.36),
            RotatorPosition::new(-180.0, -21.0),
            RotatorPosition::new(540.0, 180.0),
        ] {
            let decoded = codec.decode(&codec.encode_response(&pos).unwrap()).unwrap();
            assert!((decoded.azimuth_deg - pos.azimuth_deg).abs() <= 0.05 + 1e-9);
            assert!((decoded.elevation_deg - pos.elevation_deg).abs() <= 0.05 + 1e-9);
        }
    }

    #[test]
    fn device_reads_back_set_command() {
        let codec = Rot2Prog::default();
        let cmd = Command::MoveTo(RotatorPosition::new(271.3, 15.7));
        let parsed = codec.decode_command(&codec.encode(&cmd).unwrap()).unwrap();
        match parsed {
            Command::MoveTo(pos) => {
                assert!((pos.azimuth_deg - 271.3).abs() < 1e-6);
                assert!((pos.elevation_deg - 15.7).abs() < 1e-6);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(
            codec.decode_command(&codec.encode(&Command::Stop).unwrap()).unwrap(),
            Command::Stop
        );
    }

    #[test]
    fn rejects_out_of_range_set_point() {
        let codec = Rot2Prog::new(
            10,
            Limits {
                azimuth_min: 0.0,
                azimuth_max: 360.0,
                elevation_min: 0.0,
                elevation_max: 90.0,
            },
        );
        for pos in [
            RotatorPosition::new(361.0, 10.0),
            RotatorPosition::new(10.0, -0.5),
            RotatorPosition::new(f64::NAN, 10.0),
        ] {
            assert!(matches!(
                codec.encode(&Command::MoveTo(pos)),
                Err(RotatorError::Encoding { .. })
            ));
        }
    }

    #[test]
    fn rejects_unrepresentable_set_point() {
        // 30 pulses per degree overflows four digits past 333.3 - 360
        let codec = Rot2Prog::new(30, Limits::default());
        assert!(matches!(
            codec.encode(&Command::MoveTo(RotatorPosition::new(10.0, 0.0))),
            Err(RotatorError::Encoding { .. })
        ));
    }

    #[test]
    fn rejects_malformed_replies() {
        let codec = Rot2Prog::default();
        let good = codec
            .encode_response(&RotatorPosition::new(10.0, 10.0))
            .unwrap();

        assert!(matches!(codec.decode(&good[..11]), Err(RotatorError::Framing(_))));

        let mut bad_end = good;
        bad_end[11] = 0x00;
        assert!(matches!(codec.decode(&bad_end), Err(RotatorError::Framing(_))));

        let mut bad_start = good;
        bad_start[0] = b'X';
        assert!(matches!(codec.decode(&bad_start), Err(RotatorError::Framing(_))));

        let mut bad_digit = good;
        bad_digit[2] = 0x0c;
        assert!(matches!(codec.decode(&bad_digit), Err(RotatorError::Framing(_))));
    }

    #[test]
    fn rejects_physically_impossible_reading() {
        let codec = Rot2Prog::default();
        // 9999 tenths - 360 = 639.9 degrees
        let frame = [b'W', 9, 9, 9, 9, 0x0a, 3, 6, 0, 0, 0x0a, b' '];
        assert!(matches!(codec.decode(&frame), Err(RotatorError::Decoding { .. })));
    }
}
