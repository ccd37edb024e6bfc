use std::time::{Duration, Instant};

use lander_proto::Request;

/// Paces telemetry requests so each kind goes out at most once per interval.
#[derive(Debug)]
pub struct PollSchedule {
    entries: Vec<PollEntry>,
}

#[derive(Debug)]
struct PollEntry {
    request: Request,
    interval: Duration,
    last: Option<Instant>,
}

impl PollSchedule {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Altitude and RC at `telemetry_hz`, arming status at a fifth of that.
    pub fn for_rate(telemetry_hz: f32) -> Self {
        let hz = if telemetry_hz.is_finite() { telemetry_hz.max(0.2) } else { 10.0 };
        let fast = Duration::from_micros((1_000_000.0 / hz) as u64);
        Self::new()
            .every(Request::Altitude, fast)
            .every(Request::Rc, fast)
            .every(Request::Status, fast * 5)
    }

    pub fn every(mut self, request: Request, interval: Duration) -> Self {
        self.entries.push(PollEntry { request, interval, last: None });
        self
    }

    /// Requests whose interval has elapsed. Marks them as sent.
    pub fn due(&mut self, now: Instant) -> Vec<Request> {
        let mut out = Vec::new();
        for e in &mut self.entries {
            if let Some(t) = e.last {
                if now.saturating_duration_since(t) < e.interval {
                    continue;
                }
            }
            e.last = Some(now);
            out.push(e.request.clone());
        }
        out
    }
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self::new()
    }
}
