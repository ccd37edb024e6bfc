use serde::{Deserialize, Serialize};

pub const CHANNEL_COUNT: usize = 16;
pub const RC_MIN: u16 = 1000;
pub const RC_MAX: u16 = 2000;
pub const RC_MID: u16 = 1500;

/// One MSP_SET_RAW_RC payload: 16 channels, each clamped to 1000..=2000.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFrame {
    channels: [u16; CHANNEL_COUNT],
}

impl Default for ChannelFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

impl ChannelFrame {
    pub fn neutral() -> Self {
        Self { channels: [RC_MID; CHANNEL_COUNT] }
    }

    pub fn from_values(values: [u16; CHANNEL_COUNT]) -> Self {
        let mut f = Self::neutral();
        for (i, v) in values.into_iter().enumerate() {
            f.set(i, v);
        }
        f
    }

    /// Out-of-range indices are ignored.
    pub fn set(&mut self, index: usize, value: u16) {
        if let Some(slot) = self.channels.get_mut(index) {
            *slot = value.clamp(RC_MIN, RC_MAX);
        }
    }

    /// Write `RC_MID + delta * half_range`, where `delta` is a normalized command in [-1, 1].
    pub fn set_delta(&mut self, index: usize, delta: f32, half_range: u16) {
        let delta = if delta.is_finite() { delta.clamp(-1.0, 1.0) } else { 0.0 };
        let v = RC_MID as f32 + delta * half_range as f32;
        self.set(index, v.round() as u16);
    }

    pub fn get(&self, index: usize) -> Option<u16> {
        self.channels.get(index).copied()
    }

    pub fn values(&self) -> &[u16; CHANNEL_COUNT] {
        &self.channels
    }

    pub fn is_neutral(&self) -> bool {
        self.channels.iter().all(|c| *c == RC_MID)
    }

    pub fn to_payload(&self) -> Vec<u8> {
        self.channels.iter().flat_map(|c| c.to_le_bytes()).collect()
    }

    /// Parse a SET_RAW_RC payload. Missing trailing channels stay neutral, extra ones are dropped.
    pub fn from_payload(payload: &[u8]) -> Self {
        let mut f = Self::neutral();
        for (i, pair) in payload.chunks_exact(2).take(CHANNEL_COUNT).enumerate() {
            f.set(i, u16::from_le_bytes([pair[0], pair[1]]));
        }
        f
    }
}
