use std::time::{Duration, Instant};

use lander_proto::Telemetry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeSample {
    pub altitude_m: f32,
    pub vario_m_s: Option<f32>,
    pub at: Instant,
}

/// Latest view of the flight controller, filled in by the link I/O loop.
#[derive(Debug, Clone, Default)]
pub struct FcStatus {
    pub port: Option<String>,
    pub variant: Option<String>,
    pub version: Option<(u8, u8, u8)>,
    pub armed: Option<bool>,
    pub mode_flags: u32,
    pub altitude: Option<AltitudeSample>,
    /// Receiver channels as reported by MSP_RC.
    pub rc: Option<Vec<u16>>,
    pub rc_at: Option<Instant>,
    pub last_telemetry: Option<Instant>,
}

impl FcStatus {
    pub fn apply(&mut self, telemetry: Telemetry, now: Instant) {
        match telemetry {
            Telemetry::Altitude { altitude_m, vario_m_s } => {
                self.altitude = Some(AltitudeSample { altitude_m, vario_m_s, at: now });
            }
            Telemetry::Status { armed, mode_flags } => {
                self.armed = Some(armed);
                self.mode_flags = mode_flags;
            }
            Telemetry::Rc(ch) => {
                self.rc = Some(ch);
                self.rc_at = Some(now);
            }
            Telemetry::FcVariant(v) => self.variant = Some(v),
            Telemetry::FcVersion { major, minor, patch } => self.version = Some((major, minor, patch)),
            Telemetry::Ack(_) => {}
        }
        self.last_telemetry = Some(now);
    }

    /// Altitude if the sample is no older than `max_age`.
    pub fn altitude_within(&self, max_age: Duration, now: Instant) -> Option<f32> {
        self.altitude
            .filter(|s| now.saturating_duration_since(s.at) <= max_age)
            .map(|s| s.altitude_m)
    }

    /// Receiver value on `channel` if the RC sample is no older than `max_age`.
    pub fn rc_channel_within(&self, channel: usize, max_age: Duration, now: Instant) -> Option<u16> {
        let at = self.rc_at?;
        if now.saturating_duration_since(at) > max_age {
            return None;
        }
        self.rc.as_ref()?.get(channel).copied()
    }

    pub fn telemetry_age(&self, now: Instant) -> Option<Duration> {
        self.last_telemetry.map(|t| now.saturating_duration_since(t))
    }
}
