use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use lander_fc::{FcStatus, LinkHealth, LinkReport};
use lander_nav::{Axis, ConfigError, ControlMode, FlightPhase, PhaseMachine, PidGains, StepInput, Transition, TransitionReason};
use lander_proto::ChannelFrame;
use lander_vision::tracker::TargetTracker;
use lander_vision::TargetObservation;
use serde::Serialize;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::config::LandingConfig;
use crate::lock;
use crate::scheduler::{FrameSink, Scheduler};
use crate::tuning::{AxisTuning, LiveTuning};

/// State shared by the session handle, the scheduler and the I/O loop.
/// Every field is locked on its own and never across I/O.
pub(crate) struct Shared {
    pub(crate) cfg: LandingConfig,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) tracker: Mutex<TargetTracker>,
    pub(crate) phase: Mutex<PhaseMachine>,
    pub(crate) fc: Arc<Mutex<FcStatus>>,
    pub(crate) link: Arc<Mutex<LinkHealth>>,
    pub(crate) tuning: LiveTuning,
    pub(crate) enabled_at: Mutex<Option<Instant>>,
    pub(crate) landed: AtomicBool,
    /// One neutral frame is owed to the FC after a disable or pilot override.
    pub(crate) release_pending: AtomicBool,
    pub(crate) last_output: Mutex<Option<ChannelFrame>>,
}

impl Shared {
    pub(crate) fn pilot_override(&self, now: Instant) -> bool {
        let Some(p) = &self.cfg.pilot_override else { return false };
        lock(&self.fc)
            .rc_channel_within(p.channel, self.cfg.altitude_stale_after(), now)
            .is_some_and(|v| v >= p.threshold)
    }

    pub(crate) fn altitude(&self, now: Instant) -> Option<f32> {
        lock(&self.fc).altitude_within(self.cfg.altitude_stale_after(), now)
    }

    /// Snapshot every input the phase machine looks at.
    pub(crate) fn step_input(&self, now: Instant) -> StepInput {
        StepInput {
            target: lock(&self.tracker).current(now),
            altitude_m: self.altitude(now),
            landed: self.landed.swap(false, Ordering::SeqCst),
            pilot_override: self.pilot_override(now),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TargetStatus {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
    pub age_ms: u64,
    /// Offset on the ground in metres, when the lens and altitude are known.
    pub ground_offset_m: Option<(f32, f32)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GainStatus {
    pub roll: AxisTuning,
    pub pitch: AxisTuning,
    pub descent: AxisTuning,
}

/// Everything an operator surface needs, in one serializable value.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub unix_ms: i64,
    pub phase: FlightPhase,
    pub control: ControlMode,
    pub target: Option<TargetStatus>,
    pub altitude_m: Option<f32>,
    pub armed: Option<bool>,
    pub fc_variant: Option<String>,
    pub pilot_override: bool,
    pub link: LinkReport,
    pub last_transition: Option<Transition>,
    pub last_channels: Option<ChannelFrame>,
    pub gains: GainStatus,
}

/// Operator-facing handle to one landing session. Cheap to clone.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    pub fn new(cfg: LandingConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        cfg.validate()?;
        let shared = Shared {
            tracker: Mutex::new(TargetTracker::new(cfg.tracking.clone())),
            phase: Mutex::new(PhaseMachine::new(cfg.phase.clone())),
            fc: Arc::new(Mutex::new(FcStatus::default())),
            link: Arc::new(Mutex::new(LinkHealth::default())),
            tuning: LiveTuning::new(&cfg.pid),
            enabled_at: Mutex::new(None),
            landed: AtomicBool::new(false),
            release_pending: AtomicBool::new(false),
            last_output: Mutex::new(None),
            clock,
            cfg,
        };
        Ok(Self { shared: Arc::new(shared) })
    }

    pub fn config(&self) -> &LandingConfig {
        &self.shared.cfg
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.shared.clock.clone()
    }

    /// Telemetry cell written by the link I/O loop.
    pub fn fc_status(&self) -> Arc<Mutex<FcStatus>> {
        self.shared.fc.clone()
    }

    pub fn link_health(&self) -> Arc<Mutex<LinkHealth>> {
        self.shared.link.clone()
    }

    pub fn phase(&self) -> FlightPhase {
        lock(&self.shared.phase).current_phase()
    }

    /// Start searching. Only has an effect from IDLE.
    pub fn enable(&self) -> Option<Transition> {
        let now = self.shared.clock.now();
        let mut phase = lock(&self.shared.phase);
        let t = phase.enable(now)?;
        *lock(&self.shared.enabled_at) = Some(now);
        self.shared.landed.store(false, Ordering::SeqCst);
        self.shared.release_pending.store(false, Ordering::SeqCst);
        Some(t)
    }

    /// Hand control back to the pilot. Takes effect before the next tick.
    pub fn disable(&self) -> Option<Transition> {
        let now = self.shared.clock.now();
        let t = lock(&self.shared.phase).disable(TransitionReason::Disabled, now)?;
        if t.from.is_active() {
            self.shared.release_pending.store(true, Ordering::SeqCst);
        }
        Some(t)
    }

    pub fn set_gains(&self, axis: Axis, kp: f32, ki: f32, kd: f32) -> Result<(), ConfigError> {
        self.shared.tuning.set_gains(axis, PidGains { kp, ki, kd }).map(|_| ())
    }

    pub fn set_apply_on_reset(&self, axis: Axis, on: bool) {
        self.shared.tuning.set_apply_on_reset(axis, on);
    }

    /// Vision entry point. Returns false if the sighting was older than the held one.
    pub fn observe(&self, obs: TargetObservation) -> bool {
        let now = self.shared.clock.now();
        lock(&self.shared.tracker).update(obs, now)
    }

    /// External touchdown signal, consumed by the next tick.
    pub fn signal_landed(&self) {
        debug!("session: landed signal");
        self.shared.landed.store(true, Ordering::SeqCst);
    }

    pub fn status(&self) -> StatusSnapshot {
        let now = self.shared.clock.now();
        let cfg = &self.shared.cfg;

        let (phase, last_transition) = {
            let m = lock(&self.shared.phase);
            (m.current_phase(), m.last_transition())
        };
        let altitude_m = self.shared.altitude(now);
        let target = lock(&self.shared.tracker).current(now).map(|o| TargetStatus {
            x: o.x,
            y: o.y,
            confidence: o.confidence,
            age_ms: o.age(now).as_millis() as u64,
            ground_offset_m: cfg.fov.zip(altitude_m).map(|(fov, alt)| fov.ground_offset_m(&o, alt)),
        });
        let (armed, fc_variant) = {
            let fc = lock(&self.shared.fc);
            (fc.armed, fc.variant.clone())
        };
        let link = lock(&self.shared.link).report(cfg.send_window(), now);
        let tuning = &self.shared.tuning;

        StatusSnapshot {
            unix_ms: (time::OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64,
            phase,
            control: phase.control_mode(),
            target,
            altitude_m,
            armed,
            fc_variant,
            pilot_override: self.shared.pilot_override(now),
            link,
            last_transition,
            last_channels: *lock(&self.shared.last_output),
            gains: GainStatus {
                roll: tuning.get(Axis::Roll),
                pitch: tuning.get(Axis::Pitch),
                descent: tuning.get(Axis::Descent),
            },
        }
    }

    /// Build the control loop for this session around an outbound sink.
    pub fn scheduler<S: FrameSink>(&self, sink: S) -> Result<Scheduler<S>, ConfigError> {
        info!("session: scheduler at {} Hz, watchdog {:?}", self.shared.cfg.tick_hz, self.shared.cfg.send_window());
        Scheduler::new(self.shared.clone(), sink)
    }
}
