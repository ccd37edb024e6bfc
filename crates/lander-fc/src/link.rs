use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use lander_proto::{Command, FrameError, StreamDecoder, Telemetry};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

use crate::poll::PollSchedule;
use crate::state::FcStatus;
use crate::transport::{Transport, TransportError};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Health of the control stream to the flight controller.
///
/// `last_success` only moves when an RC override frame has actually been
/// written; telemetry polls do not count toward it.
#[derive(Debug, Clone, Default)]
pub struct LinkHealth {
    pub last_success: Option<Instant>,
    pub consecutive_failures: u32,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub last_telemetry: Option<Instant>,
    /// When the watchdog last took control away. Frames built before this are never written.
    pub ceded_at: Option<Instant>,
    pub stale_dropped: u64,
}

impl LinkHealth {
    pub fn record_send_ok(&mut self, now: Instant) {
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.frames_sent += 1;
    }

    pub fn record_send_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    pub fn record_frame(&mut self, now: Instant) {
        self.frames_received += 1;
        self.last_telemetry = Some(now);
    }

    pub fn record_decode_error(&mut self) {
        self.decode_errors += 1;
    }

    pub fn record_ceded(&mut self, now: Instant) {
        self.ceded_at = Some(now);
    }

    pub fn since_success(&self, now: Instant) -> Option<Duration> {
        self.last_success.map(|t| now.saturating_duration_since(t))
    }

    /// True if a control frame went out within `window`.
    pub fn healthy(&self, window: Duration, now: Instant) -> bool {
        self.since_success(now).is_some_and(|d| d <= window)
    }

    pub fn report(&self, window: Duration, now: Instant) -> LinkReport {
        LinkReport {
            healthy: self.healthy(window, now),
            ms_since_success: self.since_success(now).map(|d| d.as_millis() as u64),
            consecutive_failures: self.consecutive_failures,
            frames_sent: self.frames_sent,
            frames_received: self.frames_received,
            decode_errors: self.decode_errors,
            stale_dropped: self.stale_dropped,
            ms_since_telemetry: self.last_telemetry.map(|t| now.saturating_duration_since(t).as_millis() as u64),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LinkReport {
    pub healthy: bool,
    pub ms_since_success: Option<u64>,
    pub consecutive_failures: u32,
    pub frames_sent: u64,
    pub frames_received: u64,
    pub decode_errors: u64,
    pub stale_dropped: u64,
    pub ms_since_telemetry: Option<u64>,
}

/// An encoded override frame waiting in the outbound queue.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    pub built_at: Instant,
    pub bytes: Bytes,
}

impl OutboundFrame {
    pub fn new(bytes: impl Into<Bytes>, built_at: Instant) -> Self {
        Self { built_at, bytes: bytes.into() }
    }
}

/// INAV's own MSP override timeout.
pub const DEFAULT_MAX_FRAME_AGE: Duration = Duration::from_millis(200);

/// Owns the transport: writes queued override frames, polls telemetry and
/// decodes replies into the shared [`FcStatus`].
pub struct LinkIo<T> {
    transport: T,
    decoder: StreamDecoder,
    polls: PollSchedule,
    status: Arc<Mutex<FcStatus>>,
    health: Arc<Mutex<LinkHealth>>,
    max_frame_age: Duration,
    buf: Vec<u8>,
}

impl<T: Transport> LinkIo<T> {
    pub fn new(transport: T, polls: PollSchedule, status: Arc<Mutex<FcStatus>>, health: Arc<Mutex<LinkHealth>>) -> Self {
        Self {
            transport,
            decoder: StreamDecoder::new(),
            polls,
            status,
            health,
            max_frame_age: DEFAULT_MAX_FRAME_AGE,
            buf: vec![0u8; 512],
        }
    }

    /// Queued frames older than this are dropped instead of written.
    pub fn with_max_frame_age(mut self, age: Duration) -> Self {
        self.max_frame_age = age;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Write one RC override frame and record the outcome.
    pub fn send_control(&mut self, frame: &[u8], now: Instant) -> Result<(), TransportError> {
        let res = self.transport.write_frame(frame);
        let mut h = lock(&self.health);
        match &res {
            Ok(()) => h.record_send_ok(now),
            Err(e) => {
                h.record_send_failure();
                warn!("link: control write failed ({} in a row): {}", h.consecutive_failures, e);
            }
        }
        res
    }

    /// Write a queued frame unless it has outlived the send window or was built
    /// before control was ceded. Returns whether it was written.
    pub fn send_queued(&mut self, frame: &OutboundFrame, now: Instant) -> Result<bool, TransportError> {
        let stale = {
            let mut h = lock(&self.health);
            let ceded = h.ceded_at.is_some_and(|t| frame.built_at < t);
            let age = now.saturating_duration_since(frame.built_at);
            if ceded || age > self.max_frame_age {
                h.stale_dropped += 1;
                debug!("link: dropping queued frame (age {:?}, ceded {})", age, ceded);
                true
            } else {
                false
            }
        };
        if stale {
            return Ok(false);
        }
        self.send_control(&frame.bytes, now).map(|()| true)
    }

    /// Send whatever telemetry requests are due.
    pub fn poll_telemetry(&mut self, now: Instant) -> Result<(), TransportError> {
        for req in self.polls.due(now) {
            trace!("link: poll {:?}", req.command());
            self.transport.write_frame(&req.encode())?;
        }
        Ok(())
    }

    /// Drain the transport once and apply every decoded reply. Returns frames applied.
    pub fn read_telemetry(&mut self, now: Instant) -> Result<usize, TransportError> {
        let n = self.transport.read_available(&mut self.buf)?;
        if n > 0 {
            self.decoder.push(&self.buf[..n]);
        }

        let mut applied = 0;
        while let Some(res) = self.decoder.next_frame() {
            let decoded = res.and_then(|f| Telemetry::from_frame(&f));
            match decoded {
                Ok(t) => {
                    lock(&self.health).record_frame(now);
                    lock(&self.status).apply(t, now);
                    applied += 1;
                }
                Err(FrameError::Rejected(cmd)) if cmd == Command::SetRawRc.id() => {
                    // INAV answers SET_RAW_RC with an error when MSP override is not enabled.
                    warn!("link: flight controller rejected RC override; check msp_override_channels");
                    lock(&self.health).record_decode_error();
                }
                Err(e) => {
                    debug!("link: dropping bad frame: {}", e);
                    lock(&self.health).record_decode_error();
                }
            }
        }
        Ok(applied)
    }

    /// Blocking service loop. Returns when `shutdown` flips to true or the
    /// outbound queue closes.
    pub fn run<F>(mut self, mut outbound: mpsc::Receiver<OutboundFrame>, shutdown: watch::Receiver<bool>, now: F) -> Result<(), TransportError>
    where
        F: Fn() -> Instant,
    {
        info!("link: serving {}", self.transport.describe());
        loop {
            if *shutdown.borrow() {
                info!("link: shutdown");
                return Ok(());
            }

            loop {
                match outbound.try_recv() {
                    Ok(frame) => {
                        // Failures are already counted; the watchdog decides what to do.
                        let _ = self.send_queued(&frame, now());
                    }
                    Err(mpsc::error::TryRecvError::Empty) => break,
                    Err(mpsc::error::TryRecvError::Disconnected) => {
                        info!("link: outbound queue closed");
                        return Ok(());
                    }
                }
            }

            if let Err(e) = self.poll_telemetry(now()) {
                warn!("link: telemetry poll failed: {}", e);
            }

            match self.read_telemetry(now()) {
                Ok(0) => std::thread::sleep(Duration::from_millis(2)),
                Ok(_) => {}
                Err(TransportError::Closed) => {
                    warn!("link: transport closed");
                    return Err(TransportError::Closed);
                }
                Err(e) => {
                    warn!("link: read failed: {}", e);
                    std::thread::sleep(Duration::from_millis(20));
                }
            }
        }
    }
}
