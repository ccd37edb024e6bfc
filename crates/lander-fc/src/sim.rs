use std::io;
use std::time::{Duration, Instant};

use bytes::{Buf, BytesMut};
use lander_proto::{ChannelFrame, Command, Direction, StreamDecoder, Telemetry, CHANNEL_COUNT, RC_MID};
use tracing::{debug, trace};

use crate::transport::{Transport, TransportError};

/// INAV drops MSP override after this long without a frame.
const OVERRIDE_TIMEOUT: Duration = Duration::from_millis(200);

/// In-process stand-in for an INAV flight controller.
///
/// Answers MSP requests the way the real firmware does and integrates a crude
/// altitude model from the throttle override: full deflection moves the craft
/// at `climb_rate_m_s`, mid stick holds altitude.
pub struct SimulatedFc {
    variant: String,
    version: (u8, u8, u8),
    armed: bool,
    altitude_m: f32,
    vario_m_s: f32,
    climb_rate_m_s: f32,
    throttle_channel: usize,
    pilot_rc: [u16; CHANNEL_COUNT],
    last_override: Option<ChannelFrame>,
    override_at: Option<Instant>,
    overrides: u64,
    realtime: Option<Instant>,
    fail_writes: bool,
    decoder: StreamDecoder,
    rx: BytesMut,
}

impl SimulatedFc {
    pub fn new(variant: &str) -> Self {
        Self {
            variant: variant.to_string(),
            version: (7, 1, 0),
            armed: false,
            altitude_m: 0.0,
            vario_m_s: 0.0,
            climb_rate_m_s: 1.5,
            throttle_channel: 2,
            pilot_rc: [RC_MID; CHANNEL_COUNT],
            last_override: None,
            override_at: None,
            overrides: 0,
            realtime: None,
            fail_writes: false,
            decoder: StreamDecoder::new(),
            rx: BytesMut::new(),
        }
    }

    /// Integrate altitude against the wall clock on every read.
    pub fn realtime(mut self) -> Self {
        self.realtime = Some(Instant::now());
        self
    }

    pub fn with_throttle_channel(mut self, channel: usize) -> Self {
        self.throttle_channel = channel;
        self
    }

    pub fn with_climb_rate(mut self, m_s: f32) -> Self {
        self.climb_rate_m_s = m_s;
        self
    }

    pub fn set_altitude(&mut self, m: f32) {
        self.altitude_m = m;
    }

    pub fn altitude(&self) -> f32 {
        self.altitude_m
    }

    pub fn set_armed(&mut self, armed: bool) {
        self.armed = armed;
    }

    /// What the pilot's receiver reports on `channel`.
    pub fn set_pilot_channel(&mut self, channel: usize, value: u16) {
        if let Some(c) = self.pilot_rc.get_mut(channel) {
            *c = value;
        }
    }

    /// Make every write fail, as if the UART went away.
    pub fn set_write_failure(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn last_override(&self) -> Option<ChannelFrame> {
        self.last_override
    }

    pub fn override_count(&self) -> u64 {
        self.overrides
    }

    /// Queue raw bytes for the reader, bypassing the request/response path.
    pub fn inject_rx(&mut self, bytes: &[u8]) {
        self.rx.extend_from_slice(bytes);
    }

    /// Move the altitude model forward by `dt`.
    pub fn advance(&mut self, dt: Duration) {
        if !self.armed {
            return;
        }
        self.altitude_m = (self.altitude_m + self.vario_m_s * dt.as_secs_f32()).max(0.0);
    }

    fn tick_realtime(&mut self) {
        let Some(last) = self.realtime else { return };
        let now = Instant::now();
        if self.override_at.is_some_and(|t| now.saturating_duration_since(t) > OVERRIDE_TIMEOUT) {
            // Failsafe back to the receiver: the pilot's stick is at mid.
            self.vario_m_s = 0.0;
        }
        self.advance(now.saturating_duration_since(last));
        self.realtime = Some(now);
    }

    fn apply_override(&mut self, frame: ChannelFrame) {
        let throttle = frame.get(self.throttle_channel).unwrap_or(RC_MID);
        self.vario_m_s = (throttle as f32 - RC_MID as f32) / 500.0 * self.climb_rate_m_s;
        self.last_override = Some(frame);
        self.override_at = Some(Instant::now());
        self.overrides += 1;
        trace!("sim: override throttle={} vario={:.2}", throttle, self.vario_m_s);
    }

    fn respond(&mut self, command: Command, payload: &[u8]) {
        let reply = match command {
            Command::SetRawRc => {
                self.apply_override(ChannelFrame::from_payload(payload));
                Telemetry::Ack(command.id())
            }
            Command::Altitude => Telemetry::Altitude {
                altitude_m: self.altitude_m,
                vario_m_s: Some(self.vario_m_s),
            },
            Command::Status => Telemetry::Status { armed: self.armed, mode_flags: self.armed as u32 },
            Command::Rc => Telemetry::Rc(self.pilot_rc.to_vec()),
            Command::FcVariant => Telemetry::FcVariant(self.variant.clone()),
            Command::FcVersion => {
                let (major, minor, patch) = self.version;
                Telemetry::FcVersion { major, minor, patch }
            }
        };
        match reply.encode_response() {
            Ok(bytes) => self.rx.extend_from_slice(&bytes),
            Err(e) => debug!("sim: cannot encode reply to {:?}: {}", command, e),
        }
    }
}

impl Transport for SimulatedFc {
    fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "simulated write failure").into());
        }
        self.tick_realtime();
        self.decoder.push(frame);
        while let Some(res) = self.decoder.next_frame() {
            match res {
                Ok(f) if f.direction == Direction::Request => self.respond(f.command, &f.payload),
                Ok(f) => debug!("sim: ignoring non-request {:?}", f.command),
                Err(e) => debug!("sim: bad request: {}", e),
            }
        }
        Ok(())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        self.tick_realtime();
        let n = buf.len().min(self.rx.len());
        buf[..n].copy_from_slice(&self.rx[..n]);
        self.rx.advance(n);
        Ok(n)
    }

    fn describe(&self) -> String {
        format!("simulated {} fc", self.variant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lander_proto::{decode, Request};

    fn read_reply(sim: &mut SimulatedFc) -> Telemetry {
        let mut buf = [0u8; 128];
        let n = sim.read_available(&mut buf).unwrap();
        Telemetry::from_frame(&decode(&buf[..n]).unwrap()).unwrap()
    }

    #[test]
    fn answers_identity_requests() {
        let mut sim = SimulatedFc::new("INAV");
        sim.write_frame(&Request::FcVariant.encode()).unwrap();
        assert_eq!(read_reply(&mut sim), Telemetry::FcVariant("INAV".into()));
        sim.write_frame(&Request::FcVersion.encode()).unwrap();
        assert_eq!(read_reply(&mut sim), Telemetry::FcVersion { major: 7, minor: 1, patch: 0 });
    }

    #[test]
    fn throttle_override_moves_altitude() {
        let mut sim = SimulatedFc::new("INAV");
        sim.set_armed(true);
        sim.set_altitude(10.0);

        let mut rc = ChannelFrame::neutral();
        rc.set(2, 1000);
        sim.write_frame(&Request::SetRawRc(rc).encode()).unwrap();
        assert_eq!(read_reply(&mut sim), Telemetry::Ack(Command::SetRawRc.id()));
        assert_eq!(sim.last_override(), Some(rc));

        sim.advance(Duration::from_secs(2));
        assert!((sim.altitude() - 7.0).abs() < 1e-4, "{}", sim.altitude());

        sim.advance(Duration::from_secs(60));
        assert_eq!(sim.altitude(), 0.0);
    }

    #[test]
    fn disarmed_craft_does_not_move() {
        let mut sim = SimulatedFc::new("INAV");
        sim.set_altitude(5.0);
        let mut rc = ChannelFrame::neutral();
        rc.set(2, 2000);
        sim.write_frame(&Request::SetRawRc(rc).encode()).unwrap();
        sim.advance(Duration::from_secs(1));
        assert_eq!(sim.altitude(), 5.0);
    }

    #[test]
    fn write_failure_is_reported() {
        let mut sim = SimulatedFc::new("INAV");
        sim.set_write_failure(true);
        assert!(sim.write_frame(&Request::Altitude.encode()).is_err());
    }
}
