use serde::{Deserialize, Serialize};

use crate::channels::ChannelFrame;
use crate::msp::{self, Command, Direction, Frame, FrameError};

/// Requests the companion sends to the flight controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    SetRawRc(ChannelFrame),
    Altitude,
    Status,
    Rc,
    FcVariant,
    FcVersion,
}

impl Request {
    pub fn command(&self) -> Command {
        match self {
            Request::SetRawRc(_) => Command::SetRawRc,
            Request::Altitude => Command::Altitude,
            Request::Status => Command::Status,
            Request::Rc => Command::Rc,
            Request::FcVariant => Command::FcVariant,
            Request::FcVersion => Command::FcVersion,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            // Fixed-size payloads, always within the protocol maximum.
            Request::SetRawRc(frame) => msp::assemble(Direction::Request, Command::SetRawRc, &frame.to_payload()),
            other => msp::assemble(Direction::Request, other.command(), &[]),
        }
    }
}

/// Decoded replies from the flight controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Telemetry {
    Altitude { altitude_m: f32, vario_m_s: Option<f32> },
    Status { armed: bool, mode_flags: u32 },
    Rc(Vec<u16>),
    FcVariant(String),
    FcVersion { major: u8, minor: u8, patch: u8 },
    /// Empty acknowledgement, e.g. for SET_RAW_RC.
    Ack(u16),
}

impl Telemetry {
    /// Interpret a checksum-valid response frame. Short payloads degrade to `Truncated`.
    pub fn from_frame(frame: &Frame) -> Result<Self, FrameError> {
        let p = &frame.payload;
        let need = |n: usize| {
            if p.len() < n {
                Err(FrameError::Truncated { needed: n, have: p.len() })
            } else {
                Ok(())
            }
        };

        Ok(match frame.command {
            Command::Altitude => {
                need(4)?;
                let cm = i32::from_le_bytes([p[0], p[1], p[2], p[3]]);
                let vario_m_s = (p.len() >= 6).then(|| i16::from_le_bytes([p[4], p[5]]) as f32 / 100.0);
                Telemetry::Altitude { altitude_m: cm as f32 / 100.0, vario_m_s }
            }
            Command::Status => {
                // cycleTime u16, i2cErrors u16, sensors u16, flightModeFlags u32, ...
                need(10)?;
                let mode_flags = u32::from_le_bytes([p[6], p[7], p[8], p[9]]);
                // BOXARM is the first permanent box in INAV.
                Telemetry::Status { armed: mode_flags & 0x1 != 0, mode_flags }
            }
            Command::Rc => Telemetry::Rc(
                p.chunks_exact(2).map(|c| u16::from_le_bytes([c[0], c[1]])).collect(),
            ),
            Command::FcVariant => {
                need(4)?;
                Telemetry::FcVariant(String::from_utf8_lossy(&p[..4]).trim().to_string())
            }
            Command::FcVersion => {
                need(3)?;
                Telemetry::FcVersion { major: p[0], minor: p[1], patch: p[2] }
            }
            Command::SetRawRc => Telemetry::Ack(Command::SetRawRc.id()),
        })
    }

    /// Encode as an FC-side response. Only used by simulators and tests.
    pub fn encode_response(&self) -> Result<Vec<u8>, FrameError> {
        let (cmd, payload): (Command, Vec<u8>) = match self {
            Telemetry::Altitude { altitude_m, vario_m_s } => {
                let mut p = ((altitude_m * 100.0).round() as i32).to_le_bytes().to_vec();
                if let Some(v) = vario_m_s {
                    p.extend_from_slice(&((v * 100.0).round() as i16).to_le_bytes());
                }
                (Command::Altitude, p)
            }
            Telemetry::Status { mode_flags, .. } => {
                let mut p = vec![0u8; 6];
                p.extend_from_slice(&mode_flags.to_le_bytes());
                p.push(0); // profile
                (Command::Status, p)
            }
            Telemetry::Rc(ch) => (Command::Rc, ch.iter().flat_map(|c| c.to_le_bytes()).collect()),
            Telemetry::FcVariant(name) => {
                let mut p = name.as_bytes().to_vec();
                p.resize(4, b' ');
                (Command::FcVariant, p)
            }
            Telemetry::FcVersion { major, minor, patch } => (Command::FcVersion, vec![*major, *minor, *patch]),
            Telemetry::Ack(_) => (Command::SetRawRc, vec![]),
        };
        msp::encode_with(Direction::Response, cmd, &payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(t: &Telemetry) -> Telemetry {
        let bytes = t.encode_response().unwrap();
        let frame = msp::decode(&bytes).unwrap();
        assert_eq!(frame.direction, Direction::Response);
        Telemetry::from_frame(&frame).unwrap()
    }

    #[test]
    fn altitude_is_reported_in_metres() {
        let t = reply(&Telemetry::Altitude { altitude_m: 10.25, vario_m_s: Some(-0.5) });
        assert_eq!(t, Telemetry::Altitude { altitude_m: 10.25, vario_m_s: Some(-0.5) });
    }

    #[test]
    fn negative_altitude_survives() {
        let frame = Frame {
            direction: Direction::Response,
            command: Command::Altitude,
            payload: (-42i32).to_le_bytes().to_vec(),
        };
        assert_eq!(
            Telemetry::from_frame(&frame).unwrap(),
            Telemetry::Altitude { altitude_m: -0.42, vario_m_s: None }
        );
    }

    #[test]
    fn armed_bit_is_decoded() {
        assert_eq!(
            reply(&Telemetry::Status { armed: true, mode_flags: 0x5 }),
            Telemetry::Status { armed: true, mode_flags: 0x5 }
        );
    }

    #[test]
    fn short_status_is_truncated() {
        let frame = Frame { direction: Direction::Response, command: Command::Status, payload: vec![0; 4] };
        assert!(matches!(Telemetry::from_frame(&frame), Err(FrameError::Truncated { .. })));
    }

    #[test]
    fn set_raw_rc_request_carries_sixteen_channels() {
        let bytes = Request::SetRawRc(ChannelFrame::neutral()).encode();
        let frame = msp::decode(&bytes).unwrap();
        assert_eq!(frame.command, Command::SetRawRc);
        assert_eq!(frame.payload.len(), 32);
        assert_eq!(ChannelFrame::from_payload(&frame.payload), ChannelFrame::neutral());
    }

    #[test]
    fn variant_is_trimmed() {
        assert_eq!(reply(&Telemetry::FcVariant("INAV".into())), Telemetry::FcVariant("INAV".into()));
    }
}
