use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use lander_fc::OutboundFrame;
use lander_nav::{Axis, ConfigError, ControlMode, FlightPhase, Pid, StepInput, Transition, TransitionReason};
use lander_proto::{ChannelFrame, Request};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, trace, warn};

use crate::lock;
use crate::session::Shared;

/// Longest dt fed to the controllers. Larger gaps are treated as this.
const MAX_DT_S: f32 = 0.5;

/// Where encoded override frames go. Must never block.
pub trait FrameSink: Send {
    /// Returns false if the frame could not be queued.
    fn offer(&mut self, frame: OutboundFrame) -> bool;
}

impl FrameSink for mpsc::Sender<OutboundFrame> {
    fn offer(&mut self, frame: OutboundFrame) -> bool {
        match self.try_send(frame) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("scheduler: outbound queue full");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TickOutcome {
    pub phase: FlightPhase,
    pub transition: Option<Transition>,
    /// The frame built this tick, whether or not the sink took it.
    pub frame: Option<ChannelFrame>,
    pub offered: bool,
}

/// Fixed-rate control loop: watchdog, phase step, controllers, frame assembly.
pub struct Scheduler<S> {
    shared: Arc<Shared>,
    sink: S,
    pids: [Pid; 3],
    seen_versions: [u64; 3],
    last_tick: Option<Instant>,
    /// Phase at the end of the previous tick.
    last_phase: FlightPhase,
}

impl<S: FrameSink> Scheduler<S> {
    pub(crate) fn new(shared: Arc<Shared>, sink: S) -> Result<Self, ConfigError> {
        let pid = |axis: Axis| Pid::new(shared.cfg.pid.get(axis));
        let pids = [pid(Axis::Roll)?, pid(Axis::Pitch)?, pid(Axis::Descent)?];
        Ok(Self { shared, sink, pids, seen_versions: [0; 3], last_tick: None, last_phase: FlightPhase::Idle })
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }

    pub fn pid(&self, axis: Axis) -> &Pid {
        &self.pids[axis.index()]
    }

    pub fn tick(&mut self) -> TickOutcome {
        let now = self.shared.clock.now();
        let dt = self
            .last_tick
            .map(|t| now.saturating_duration_since(t).as_secs_f32().min(MAX_DT_S))
            .unwrap_or(0.0);
        self.last_tick = Some(now);

        self.pick_up_tuning();

        if let Some(out) = self.watchdog(now) {
            return out;
        }

        // Disable and enable move the phase between ticks.
        let current = lock(&self.shared.phase).current_phase();
        if current != self.last_phase {
            self.reset_axes(self.last_phase);
        }

        let input = self.shared.step_input(now);
        let step = lock(&self.shared.phase).step(&input, now);
        self.last_phase = step.phase;
        if let Some(t) = step.transition {
            self.reset_axes(t.from);
            if t.reason == TransitionReason::PilotOverride {
                self.shared.release_pending.store(true, Ordering::SeqCst);
            }
        }

        let frame = match step.control {
            ControlMode::Release => self.shared.release_pending.swap(false, Ordering::SeqCst).then(ChannelFrame::neutral),
            ControlMode::Hold => Some(ChannelFrame::neutral()),
            ControlMode::Center | ControlMode::Descend | ControlMode::Final => Some(self.steer(step.control, &input, dt)),
        };
        let offered = frame.map(|f| self.offer(f, now)).unwrap_or(false);
        trace!("tick: {} offered={} dt={:.3}", step.phase, offered, dt);

        TickOutcome { phase: step.phase, transition: step.transition, frame, offered }
    }

    /// Cede control if nothing has gone out within the send window.
    fn watchdog(&mut self, now: Instant) -> Option<TickOutcome> {
        let mut phase = lock(&self.shared.phase);
        if !phase.current_phase().is_active() {
            return None;
        }
        let last_success = lock(&self.shared.link).last_success;
        let enabled_at = *lock(&self.shared.enabled_at);
        let since = last_success.max(enabled_at)?;
        let silent = now.saturating_duration_since(since);
        if silent <= self.shared.cfg.send_window() {
            return None;
        }

        warn!("watchdog: no successful send for {:?}, ceding control", silent);
        let transition = phase.disable(TransitionReason::LinkTimeout, now);
        drop(phase);
        lock(&self.shared.link).record_ceded(now);
        for pid in &mut self.pids {
            pid.reset();
        }
        self.last_phase = FlightPhase::Idle;
        self.shared.release_pending.store(false, Ordering::SeqCst);
        Some(TickOutcome { phase: FlightPhase::Idle, transition, frame: None, offered: false })
    }

    fn steer(&mut self, mode: ControlMode, input: &StepInput, dt: f32) -> ChannelFrame {
        let ch = &self.shared.cfg.channels;
        let mut frame = ChannelFrame::neutral();
        let (x, y) = input.target.map(|t| (t.x, t.y)).unwrap_or((0.0, 0.0));

        let roll = self.pids[Axis::Roll.index()].update(x, dt);
        let pitch = self.pids[Axis::Pitch.index()].update(y, dt);
        let throttle = match (mode, input.altitude_m) {
            // Setpoint is the ground, so the error is minus the height.
            (ControlMode::Descend, Some(alt)) => self.pids[Axis::Descent.index()].update(-alt, dt).min(-ch.final_descent),
            (ControlMode::Final, _) => -ch.final_descent,
            _ => 0.0,
        };

        frame.set_delta(ch.roll, roll, ch.rc_half_range);
        frame.set_delta(ch.pitch, pitch, ch.rc_half_range);
        frame.set_delta(ch.throttle, throttle, ch.rc_half_range);
        frame
    }

    fn offer(&mut self, frame: ChannelFrame, now: Instant) -> bool {
        let ok = self.sink.offer(OutboundFrame::new(Request::SetRawRc(frame).encode(), now));
        if !ok {
            lock(&self.shared.link).record_send_failure();
        }
        *lock(&self.shared.last_output) = Some(frame);
        ok
    }

    fn reset_axes(&mut self, vacated: FlightPhase) {
        for axis in Axis::ALL {
            if vacated.uses_axis(axis) {
                self.pids[axis.index()].reset();
            }
        }
    }

    fn pick_up_tuning(&mut self) {
        for axis in Axis::ALL {
            let t = self.shared.tuning.get(axis);
            let i = axis.index();
            if t.version == self.seen_versions[i] {
                continue;
            }
            self.seen_versions[i] = t.version;
            let res = if t.apply_on_reset {
                self.pids[i].stage_gains(t.gains)
            } else {
                self.pids[i].set_gains(t.gains)
            };
            if let Err(e) = res {
                warn!("scheduler: {} gains not applied: {}", axis.name(), e);
            }
        }
    }
}
