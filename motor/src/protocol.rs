//! SkyWatcher motor controller wire protocol
//!
//! A request is `:` + command + axis digit + payload + `\r`. A reply is
//! `=` + payload + `\r`, or `!` + fault code + `\r`. Numeric payloads are
//! hex byte pairs, least significant pair first, so `0x12ABCD` travels as
//! `"CDAB12"`.

use crate::error::{ControllerFault, MotorError, MotorResult};
use crate::motor::{Axis, AxisMotion, AxisStatus};

pub const START_CHAR_OUT: char = ':';
pub const START_CHAR_IN: u8 = b'=';
pub const ERROR_CHAR: u8 = b'!';
pub const END_CHAR: u8 = b'\r';

/// Encoder positions are reported offset so that zero sits mid-range
pub const POSITION_OFFSET: i64 = 0x80_0000;

const U24_MASK: u32 = 0xFF_FFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Initialize,
    InquireCountsPerRevolution,
    InquireTimerFrequency,
    InquireHighSpeedRatio,
    InquireVersion,
    InquireStatus,
    InquirePosition,
    SetPosition,
    SetMotionMode,
    SetGotoIncrement,
    SetBrakeIncrement,
    SetStepPeriod,
    StartMotion,
    StopMotion,
}

impl Command {
    pub fn as_char(self) -> char {
        match self {
            Command::Initialize => 'F',
            Command::InquireCountsPerRevolution => 'a',
            Command::InquireTimerFrequency => 'b',
            Command::InquireHighSpeedRatio => 'g',
            Command::InquireVersion => 'e',
            Command::InquireStatus => 'f',
            Command::InquirePosition => 'j',
            Command::SetPosition => 'E',
            Command::SetMotionMode => 'G',
            Command::SetGotoIncrement => 'H',
            Command::SetBrakeIncrement => 'M',
            Command::SetStepPeriod => 'I',
            Command::StartMotion => 'J',
            Command::StopMotion => 'K',
        }
    }
}

/// Motion mode digits for `G`
pub mod mode {
    pub const HIGH_SPEED_GOTO: char = '0';
    pub const LOW_SPEED_SLEW: char = '1';
    pub const LOW_SPEED_GOTO: char = '2';
    pub const HIGH_SPEED_SLEW: char = '3';

    pub const FORWARD: char = '0';
    pub const REVERSE: char = '1';
}

/// Build a request frame
pub fn frame(axis: Axis, command: char, payload: &str) -> String {
    format!("{}{}{}{}\r", START_CHAR_OUT, command, axis.as_char(), payload)
}

/// Strip the reply framing. `raw` excludes the terminating `\r`.
pub fn parse_reply(axis: Axis, raw: &[u8]) -> MotorResult<String> {
    let invalid = || MotorError::InvalidResponse {
        axis,
        response: String::from_utf8_lossy(raw).into_owned(),
    };

    let (first, rest) = raw.split_first().ok_or_else(invalid)?;
    let body = std::str::from_utf8(rest).map_err(|_| invalid())?;

    match *first {
        START_CHAR_IN => Ok(body.to_string()),
        ERROR_CHAR => {
            let code = u8::from_str_radix(body.trim(), 16).map_err(|_| invalid())?;
            Err(MotorError::Controller {
                axis,
                code: ControllerFault::from_code(code),
            })
        }
        _ => Err(invalid()),
    }
}

/// Encode a value as six little-endian hex digits
pub fn encode_u24(value: u32) -> String {
    let v = value & U24_MASK;
    format!("{:02X}{:02X}{:02X}", v & 0xFF, (v >> 8) & 0xFF, (v >> 16) & 0xFF)
}

/// Decode little-endian hex byte pairs (2, 4 or 6 digits)
pub fn decode_u24(axis: Axis, payload: &str) -> MotorResult<u32> {
    let invalid = || MotorError::InvalidResponse {
        axis,
        response: payload.to_string(),
    };

    let bytes = payload.as_bytes();
    if bytes.is_empty() || bytes.len() % 2 != 0 || bytes.len() > 6 {
        return Err(invalid());
    }

    let mut value = 0u32;
    for (i, pair) in bytes.chunks(2).enumerate() {
        let digits = std::str::from_utf8(pair).map_err(|_| invalid())?;
        let byte = u32::from_str_radix(digits, 16).map_err(|_| invalid())?;
        value |= byte << (8 * i);
    }
    Ok(value)
}

/// Encode a signed step count as an offset position
pub fn encode_position(steps: i64) -> String {
    encode_u24((steps + POSITION_OFFSET) as u32)
}

pub fn decode_position(axis: Axis, payload: &str) -> MotorResult<i64> {
    Ok(decode_u24(axis, payload)? as i64 - POSITION_OFFSET)
}

/// Motor board version from the `e` reply, as `0xMMmm` (major, minor).
/// The reply is sent most significant byte first, unlike other values.
pub fn decode_version(axis: Axis, payload: &str) -> MotorResult<u32> {
    if payload.len() != 6 {
        return Err(MotorError::InvalidResponse {
            axis,
            response: payload.to_string(),
        });
    }
    let value = u32::from_str_radix(payload, 16).map_err(|_| MotorError::InvalidResponse {
        axis,
        response: payload.to_string(),
    })?;
    Ok(value >> 8)
}

/// Decode the three status nibbles of an `f` reply.
///
/// - nibble 1: bit0 constant-rate (else goto), bit1 reverse, bit2 high speed
/// - nibble 2: bit0 running
/// - nibble 3: bit0 initialized
pub fn parse_status(axis: Axis, payload: &str) -> MotorResult<AxisStatus> {
    let invalid = || MotorError::InvalidResponse {
        axis,
        response: payload.to_string(),
    };

    let mut nibbles = [0u8; 3];
    let mut chars = payload.chars();
    for nibble in nibbles.iter_mut() {
        let c = chars.next().ok_or_else(invalid)?;
        *nibble = c.to_digit(16).ok_or_else(invalid)? as u8;
    }

    let running = nibbles[1] & 0x1 != 0;
    let motion = if !running {
        AxisMotion::Stopped
    } else if nibbles[0] & 0x1 != 0 {
        AxisMotion::Slewing
    } else {
        AxisMotion::SlewingTo
    };

    Ok(AxisStatus {
        motion,
        high_speed: nibbles[0] & 0x4 != 0,
        forward: nibbles[0] & 0x2 == 0,
        initialized: nibbles[2] & 0x1 != 0,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_byte_order() {
        assert_eq!(encode_u24(0x12ABCD), "CDAB12");
        assert_eq!(decode_u24(Axis::Ra, "CDAB12").unwrap(), 0x12ABCD);
        assert_eq!(decode_u24(Axis::Ra, "0A").unwrap(), 10);
        assert_eq!(decode_u24(Axis::Ra, "0001").unwrap(), 0x100);
        assert!(decode_u24(Axis::Ra, "ABC").is_err());
        assert!(decode_u24(Axis::Ra, "ZZ").is_err());
        assert!(decode_u24(Axis::Ra, "").is_err());
    }

    #[test]
    fn test_position_offset() {
        assert_eq!(encode_position(0), "000080");
        assert_eq!(decode_position(Axis::Dec, "000080").unwrap(), 0);
        assert_eq!(decode_position(Axis::Dec, "FFFF7F").unwrap(), -1);
        assert_eq!(decode_position(Axis::Dec, &encode_position(-123_456)).unwrap(), -123_456);
    }

    #[test]
    fn test_frame() {
        assert_eq!(frame(Axis::Ra, 'j', ""), ":j1\r");
        assert_eq!(frame(Axis::Dec, 'G', "31"), ":G231\r");
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(Axis::Ra, b"=CDAB12").unwrap(), "CDAB12");
        assert_eq!(parse_reply(Axis::Ra, b"=").unwrap(), "");
        assert_eq!(
            parse_reply(Axis::Dec, b"!2"),
            Err(MotorError::Controller {
                axis: Axis::Dec,
                code: ControllerFault::MotorNotStopped
            })
        );
        assert!(matches!(
            parse_reply(Axis::Ra, b"?x"),
            Err(MotorError::InvalidResponse { .. })
        ));
        assert!(parse_reply(Axis::Ra, b"").is_err());
    }

    #[test]
    fn test_parse_status() {
        let stopped = parse_status(Axis::Ra, "101").unwrap();
        assert_eq!(stopped.motion, AxisMotion::Stopped);
        assert!(stopped.initialized);

        let tracking = parse_status(Axis::Ra, "111").unwrap();
        assert_eq!(tracking.motion, AxisMotion::Slewing);
        assert!(tracking.forward);
        assert!(!tracking.high_speed);

        let goto = parse_status(Axis::Ra, "612").unwrap();
        assert_eq!(goto.motion, AxisMotion::SlewingTo);
        assert!(goto.high_speed);
        assert!(!goto.forward);
        assert!(!goto.initialized);

        assert!(parse_status(Axis::Ra, "1").is_err());
    }

    #[test]
    fn test_version() {
        assert_eq!(decode_version(Axis::Ra, "030210").unwrap(), 0x0302);
        assert!(decode_version(Axis::Ra, "0302").is_err());
    }
}
