//! MSP V2 framing as spoken by INAV.
//!
//! ```text
//! '$' 'X' <dir> <flag> <function:u16 LE> <size:u16 LE> <payload..> <crc8>
//! ```
//!
//! The checksum is CRC8 DVB-S2 (poly 0xD5) over flag, function, size and payload.

use thiserror::Error;

pub const PREAMBLE: [u8; 2] = [b'$', b'X'];

/// Preamble + direction + flag + function + size.
pub const HEADER_LEN: usize = 8;
/// Header plus trailing checksum byte.
pub const OVERHEAD: usize = HEADER_LEN + 1;
/// Largest payload we accept from the wire. INAV never sends more than this.
pub const MAX_PAYLOAD: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Companion -> FC (`<`)
    Request,
    /// FC -> companion (`>`)
    Response,
    /// FC rejected the request (`!`)
    Error,
}

impl Direction {
    pub fn as_byte(self) -> u8 {
        match self {
            Direction::Request => b'<',
            Direction::Response => b'>',
            Direction::Error => b'!',
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            b'<' => Some(Direction::Request),
            b'>' => Some(Direction::Response),
            b'!' => Some(Direction::Error),
            _ => None,
        }
    }
}

/// MSP function ids used by the landing core. Values follow INAV's `msp_protocol.h`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Command {
    FcVariant = 2,
    FcVersion = 3,
    Status = 101,
    Rc = 105,
    Altitude = 109,
    SetRawRc = 200,
}

impl Command {
    pub fn id(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for Command {
    type Error = FrameError;

    fn try_from(id: u16) -> Result<Self, FrameError> {
        Ok(match id {
            2 => Command::FcVariant,
            3 => Command::FcVersion,
            101 => Command::Status,
            105 => Command::Rc,
            109 => Command::Altitude,
            200 => Command::SetRawRc,
            other => return Err(FrameError::UnknownCommand(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame truncated: need {needed} bytes, have {have}")]
    Truncated { needed: usize, have: usize },
    #[error("checksum mismatch: expected {expected:#04x}, got {got:#04x}")]
    ChecksumMismatch { expected: u8, got: u8 },
    #[error("unknown MSP function {0}")]
    UnknownCommand(u16),
    #[error("bad preamble")]
    BadPreamble,
    #[error("declared payload of {0} bytes exceeds protocol maximum")]
    Oversized(usize),
    #[error("flight controller rejected function {0}")]
    Rejected(u16),
}

/// A checksum-valid frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub direction: Direction,
    pub command: Command,
    pub payload: Vec<u8>,
}

pub fn crc8_dvb_s2(crc: u8, byte: u8) -> u8 {
    let mut crc = crc ^ byte;
    for _ in 0..8 {
        crc = if crc & 0x80 != 0 { (crc << 1) ^ 0xD5 } else { crc << 1 };
    }
    crc
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |crc, b| crc8_dvb_s2(crc, *b))
}

/// Encode a request frame (companion -> FC).
pub fn encode(command: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    encode_with(Direction::Request, command, payload)
}

/// Encode a frame in any direction. Payloads larger than [`MAX_PAYLOAD`] are
/// refused, since [`decode`] would refuse them too.
pub fn encode_with(direction: Direction, command: Command, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(FrameError::Oversized(payload.len()));
    }
    Ok(assemble(direction, command, payload))
}

/// Caller guarantees `payload.len() <= MAX_PAYLOAD`.
pub(crate) fn assemble(direction: Direction, command: Command, payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= MAX_PAYLOAD);
    let mut out = Vec::with_capacity(OVERHEAD + payload.len());
    out.extend_from_slice(&PREAMBLE);
    out.push(direction.as_byte());
    out.push(0); // flag
    out.extend_from_slice(&command.id().to_le_bytes());
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let crc = checksum(&out[3..]);
    out.push(crc);
    out
}

/// Number of bytes the frame at the start of `buf` occupies, once the header is in.
pub fn frame_len(buf: &[u8]) -> Result<usize, FrameError> {
    if buf.len() < HEADER_LEN {
        return Err(FrameError::Truncated { needed: HEADER_LEN, have: buf.len() });
    }
    if buf[..2] != PREAMBLE || Direction::from_byte(buf[2]).is_none() {
        return Err(FrameError::BadPreamble);
    }
    let size = u16::from_le_bytes([buf[6], buf[7]]) as usize;
    if size > MAX_PAYLOAD {
        return Err(FrameError::Oversized(size));
    }
    Ok(OVERHEAD + size)
}

/// Decode exactly one frame from the start of `buf`.
///
/// Trailing bytes after the frame are ignored; use [`frame_len`] to know how
/// many were consumed.
pub fn decode(buf: &[u8]) -> Result<Frame, FrameError> {
    let total = frame_len(buf)?;
    if buf.len() < total {
        return Err(FrameError::Truncated { needed: total, have: buf.len() });
    }

    let expected = checksum(&buf[3..total - 1]);
    let got = buf[total - 1];
    if expected != got {
        return Err(FrameError::ChecksumMismatch { expected, got });
    }

    // Checked by frame_len.
    let direction = Direction::from_byte(buf[2]).ok_or(FrameError::BadPreamble)?;
    let id = u16::from_le_bytes([buf[4], buf[5]]);
    let command = Command::try_from(id)?;
    if direction == Direction::Error {
        return Err(FrameError::Rejected(id));
    }

    Ok(Frame {
        direction,
        command,
        payload: buf[HEADER_LEN..total - 1].to_vec(),
    })
}
