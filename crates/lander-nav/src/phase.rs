use std::fmt;
use std::time::{Duration, Instant};

use lander_vision::TargetObservation;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::pid::Axis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlightPhase {
    Idle,
    Searching,
    Tracking,
    Approach,
    Landing,
    Lost,
    Complete,
}

impl FlightPhase {
    /// Phases in which the core owns the channels.
    pub fn is_active(self) -> bool {
        !matches!(self, FlightPhase::Idle | FlightPhase::Complete)
    }

    pub fn uses_axis(self, axis: Axis) -> bool {
        match axis {
            Axis::Roll | Axis::Pitch => {
                matches!(self, FlightPhase::Tracking | FlightPhase::Approach | FlightPhase::Landing)
            }
            Axis::Descent => matches!(self, FlightPhase::Approach | FlightPhase::Landing),
        }
    }

    pub fn control_mode(self) -> ControlMode {
        match self {
            FlightPhase::Idle | FlightPhase::Complete => ControlMode::Release,
            FlightPhase::Searching | FlightPhase::Lost => ControlMode::Hold,
            FlightPhase::Tracking => ControlMode::Center,
            FlightPhase::Approach => ControlMode::Descend,
            FlightPhase::Landing => ControlMode::Final,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FlightPhase::Idle => "IDLE",
            FlightPhase::Searching => "SEARCHING",
            FlightPhase::Tracking => "TRACKING",
            FlightPhase::Approach => "APPROACH",
            FlightPhase::Landing => "LANDING",
            FlightPhase::Lost => "LOST",
            FlightPhase::Complete => "COMPLETE",
        }
    }
}

impl fmt::Display for FlightPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What the scheduler should do with the channels this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlMode {
    /// Send nothing; the pilot flies.
    Release,
    /// Neutral sticks on every controlled channel.
    Hold,
    /// Roll/pitch correction only.
    Center,
    /// Roll/pitch correction plus descent.
    Descend,
    /// Final descent at a fixed rate with roll/pitch correction.
    Final,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    Enabled,
    TargetAcquired,
    TargetConfirmed,
    TargetStale,
    ReachedLandingAltitude,
    Touchdown,
    LandedSignal,
    TargetReacquired,
    LossTimeout,
    AboveCeiling,
    AltitudeUnknown,
    Disabled,
    PilotOverride,
    LinkTimeout,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Transition {
    pub from: FlightPhase,
    pub to: FlightPhase,
    pub reason: TransitionReason,
    #[serde(skip)]
    pub at: Instant,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhaseConfig {
    /// Continuous sighting needed in TRACKING before APPROACH.
    #[serde(default = "default_detection_confirm_s")]
    pub detection_confirm_s: f32,
    /// Time in LOST before giving up and going back to SEARCHING.
    #[serde(default = "default_loss_timeout_s")]
    pub loss_timeout_s: f32,
    #[serde(default = "default_landing_altitude_m")]
    pub landing_altitude_m: f32,
    #[serde(default = "default_ground_altitude_m")]
    pub ground_altitude_m: f32,
    #[serde(default = "default_safety_ceiling_m")]
    pub safety_ceiling_m: f32,
    /// Treat unknown altitude like being above the ceiling.
    #[serde(default)]
    pub stale_altitude_is_unsafe: bool,
}

fn default_detection_confirm_s() -> f32 { 2.0 }
fn default_loss_timeout_s() -> f32 { 3.0 }
fn default_landing_altitude_m() -> f32 { 0.8 }
fn default_ground_altitude_m() -> f32 { 0.1 }
fn default_safety_ceiling_m() -> f32 { 15.0 }

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            detection_confirm_s: default_detection_confirm_s(),
            loss_timeout_s: default_loss_timeout_s(),
            landing_altitude_m: default_landing_altitude_m(),
            ground_altitude_m: default_ground_altitude_m(),
            safety_ceiling_m: default_safety_ceiling_m(),
            stale_altitude_is_unsafe: false,
        }
    }
}

fn secs(s: f32) -> Duration {
    Duration::try_from_secs_f32(s).unwrap_or(Duration::ZERO)
}

/// Everything one step looks at. Freshness has already been decided by the caller.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepInput {
    pub target: Option<TargetObservation>,
    /// `None` when telemetry is missing or stale.
    pub altitude_m: Option<f32>,
    pub landed: bool,
    pub pilot_override: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct StepOutcome {
    pub phase: FlightPhase,
    pub transition: Option<Transition>,
    pub control: ControlMode,
}

/// Landing flight-phase machine. Transitions are the only way the phase changes.
#[derive(Debug)]
pub struct PhaseMachine {
    cfg: PhaseConfig,
    phase: FlightPhase,
    held_since: Option<Instant>,
    lost_since: Option<Instant>,
    last_transition: Option<Transition>,
}

impl PhaseMachine {
    pub fn new(cfg: PhaseConfig) -> Self {
        Self { cfg, phase: FlightPhase::Idle, held_since: None, lost_since: None, last_transition: None }
    }

    pub fn current_phase(&self) -> FlightPhase {
        self.phase
    }

    pub fn last_transition(&self) -> Option<Transition> {
        self.last_transition
    }

    pub fn config(&self) -> &PhaseConfig {
        &self.cfg
    }

    /// IDLE -> SEARCHING. Ignored in any other phase.
    pub fn enable(&mut self, now: Instant) -> Option<Transition> {
        if self.phase != FlightPhase::Idle {
            debug!("phase: enable ignored in {}", self.phase);
            return None;
        }
        Some(self.transition(FlightPhase::Searching, TransitionReason::Enabled, now))
    }

    /// Any phase -> IDLE.
    pub fn disable(&mut self, reason: TransitionReason, now: Instant) -> Option<Transition> {
        if self.phase == FlightPhase::Idle {
            return None;
        }
        Some(self.transition(FlightPhase::Idle, reason, now))
    }

    pub fn step(&mut self, input: &StepInput, now: Instant) -> StepOutcome {
        let transition = self.evaluate(input, now);
        StepOutcome { phase: self.phase, transition, control: self.phase.control_mode() }
    }

    fn evaluate(&mut self, input: &StepInput, now: Instant) -> Option<Transition> {
        use FlightPhase::*;

        if self.phase == Idle {
            return None;
        }
        if input.pilot_override {
            return self.disable(TransitionReason::PilotOverride, now);
        }
        if self.phase == Complete {
            return None;
        }

        let ceiling = match input.altitude_m {
            Some(alt) if alt > self.cfg.safety_ceiling_m => Some(TransitionReason::AboveCeiling),
            None if self.cfg.stale_altitude_is_unsafe => Some(TransitionReason::AltitudeUnknown),
            _ => None,
        };
        if let Some(reason) = ceiling {
            if self.phase == Searching {
                return None;
            }
            return Some(self.transition(Searching, reason, now));
        }

        let target = input.target.is_some();
        let alt = input.altitude_m;

        match self.phase {
            Searching => target.then(|| self.transition(Tracking, TransitionReason::TargetAcquired, now)),
            Tracking => {
                if !target {
                    return Some(self.transition(Searching, TransitionReason::TargetStale, now));
                }
                let since = *self.held_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= secs(self.cfg.detection_confirm_s) {
                    return Some(self.transition(Approach, TransitionReason::TargetConfirmed, now));
                }
                None
            }
            Approach => {
                if !target {
                    return Some(self.transition(Lost, TransitionReason::TargetStale, now));
                }
                match alt {
                    Some(a) if a <= self.cfg.landing_altitude_m => {
                        Some(self.transition(Landing, TransitionReason::ReachedLandingAltitude, now))
                    }
                    _ => None,
                }
            }
            Landing => {
                if input.landed {
                    return Some(self.transition(Complete, TransitionReason::LandedSignal, now));
                }
                if matches!(alt, Some(a) if a <= self.cfg.ground_altitude_m) {
                    return Some(self.transition(Complete, TransitionReason::Touchdown, now));
                }
                (!target).then(|| self.transition(Lost, TransitionReason::TargetStale, now))
            }
            Lost => {
                if target {
                    return Some(self.transition(Approach, TransitionReason::TargetReacquired, now));
                }
                let since = *self.lost_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= secs(self.cfg.loss_timeout_s) {
                    return Some(self.transition(Searching, TransitionReason::LossTimeout, now));
                }
                None
            }
            Idle | Complete => None,
        }
    }

    fn transition(&mut self, to: FlightPhase, reason: TransitionReason, now: Instant) -> Transition {
        let t = Transition { from: self.phase, to, reason, at: now };
        match reason {
            TransitionReason::LinkTimeout | TransitionReason::AboveCeiling | TransitionReason::AltitudeUnknown => {
                warn!("phase: {} -> {} ({:?})", t.from, t.to, reason)
            }
            _ => info!("phase: {} -> {} ({:?})", t.from, t.to, reason),
        }
        self.phase = to;
        self.held_since = (to == FlightPhase::Tracking).then_some(now);
        self.lost_since = (to == FlightPhase::Lost).then_some(now);
        self.last_transition = Some(t);
        t
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(at: Instant) -> Option<TargetObservation> {
        TargetObservation::new(0.1, -0.1, 0.9, at)
    }

    fn seen(at: Instant, alt: f32) -> StepInput {
        StepInput { target: obs(at), altitude_m: Some(alt), ..StepInput::default() }
    }

    fn blind(alt: f32) -> StepInput {
        StepInput { altitude_m: Some(alt), ..StepInput::default() }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn enabled(t0: Instant) -> PhaseMachine {
        let mut m = PhaseMachine::new(PhaseConfig::default());
        m.enable(t0).unwrap();
        m
    }

    /// Drive the machine into APPROACH with continuous sightings from t0.
    fn approach(t0: Instant) -> (PhaseMachine, Instant) {
        let mut m = enabled(t0);
        let mut t = t0;
        while m.current_phase() != FlightPhase::Approach {
            m.step(&seen(t, 10.0), t);
            t += ms(50);
            assert!(t < t0 + Duration::from_secs(5));
        }
        (m, t)
    }

    #[test]
    fn starts_idle_and_ignores_steps() {
        let t0 = Instant::now();
        let mut m = PhaseMachine::new(PhaseConfig::default());
        let out = m.step(&seen(t0, 5.0), t0);
        assert_eq!(out.phase, FlightPhase::Idle);
        assert_eq!(out.control, ControlMode::Release);
        assert!(out.transition.is_none());
    }

    #[test]
    fn enable_only_from_idle() {
        let t0 = Instant::now();
        let mut m = enabled(t0);
        assert_eq!(m.current_phase(), FlightPhase::Searching);
        assert!(m.enable(t0).is_none());
    }

    #[test]
    fn searching_acquires_target() {
        let t0 = Instant::now();
        let mut m = enabled(t0);
        let out = m.step(&seen(t0, 10.0), t0);
        assert_eq!(out.phase, FlightPhase::Tracking);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::TargetAcquired);
    }

    #[test]
    fn tracking_confirms_after_two_seconds() {
        let t0 = Instant::now();
        let mut m = enabled(t0);
        m.step(&seen(t0, 10.0), t0);
        m.step(&seen(t0 + ms(1990), 10.0), t0 + ms(1990));
        assert_eq!(m.current_phase(), FlightPhase::Tracking);
        let out = m.step(&seen(t0 + ms(2000), 10.0), t0 + ms(2000));
        assert_eq!(out.phase, FlightPhase::Approach);
        assert_eq!(out.control, ControlMode::Descend);
    }

    #[test]
    fn tracking_gap_restarts_confirmation() {
        let t0 = Instant::now();
        let mut m = enabled(t0);
        m.step(&seen(t0, 10.0), t0);
        m.step(&blind(10.0), t0 + ms(1500));
        assert_eq!(m.current_phase(), FlightPhase::Searching);
        m.step(&seen(t0 + ms(1600), 10.0), t0 + ms(1600));
        m.step(&seen(t0 + ms(2100), 10.0), t0 + ms(2100));
        assert_eq!(m.current_phase(), FlightPhase::Tracking);
    }

    #[test]
    fn approach_loses_target_then_times_out() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);

        let out = m.step(&blind(10.0), t);
        assert_eq!(out.phase, FlightPhase::Lost);
        assert_eq!(out.control, ControlMode::Hold);

        m.step(&blind(10.0), t + ms(2900));
        assert_eq!(m.current_phase(), FlightPhase::Lost);
        let out = m.step(&blind(10.0), t + ms(3000));
        assert_eq!(out.phase, FlightPhase::Searching);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::LossTimeout);
    }

    #[test]
    fn lost_reacquires_into_approach() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        m.step(&blind(10.0), t);
        let out = m.step(&seen(t + ms(500), 10.0), t + ms(500));
        assert_eq!(out.phase, FlightPhase::Approach);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::TargetReacquired);
    }

    #[test]
    fn descends_to_complete() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        assert_eq!(m.step(&seen(t, 0.5), t).phase, FlightPhase::Landing);
        assert_eq!(m.step(&seen(t, 0.3), t).control, ControlMode::Final);
        let out = m.step(&seen(t, 0.0), t);
        assert_eq!(out.phase, FlightPhase::Complete);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::Touchdown);
        // Terminal until disabled.
        assert_eq!(m.step(&seen(t, 10.0), t).phase, FlightPhase::Complete);
        assert!(m.disable(TransitionReason::Disabled, t).is_some());
        assert_eq!(m.current_phase(), FlightPhase::Idle);
    }

    #[test]
    fn touchdown_wins_over_stale_target() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        m.step(&seen(t, 0.5), t);
        assert_eq!(m.step(&blind(0.05), t).phase, FlightPhase::Complete);
    }

    #[test]
    fn landed_signal_completes() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        m.step(&seen(t, 0.5), t);
        let input = StepInput { landed: true, ..seen(t, 0.4) };
        let out = m.step(&input, t);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::LandedSignal);
    }

    #[test]
    fn ceiling_forces_searching_and_holds_there() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        let out = m.step(&seen(t, 16.0), t);
        assert_eq!(out.phase, FlightPhase::Searching);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::AboveCeiling);
        // A fresh target does not start tracking above the ceiling.
        assert_eq!(m.step(&seen(t + ms(50), 16.0), t + ms(50)).phase, FlightPhase::Searching);
        assert_eq!(m.step(&seen(t + ms(100), 12.0), t + ms(100)).phase, FlightPhase::Tracking);
    }

    #[test]
    fn unknown_altitude_never_lands() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        let input = StepInput { target: obs(t), altitude_m: None, ..StepInput::default() };
        assert_eq!(m.step(&input, t).phase, FlightPhase::Approach);
    }

    #[test]
    fn unknown_altitude_can_be_treated_as_unsafe() {
        let t0 = Instant::now();
        let cfg = PhaseConfig { stale_altitude_is_unsafe: true, ..PhaseConfig::default() };
        let mut m = PhaseMachine::new(cfg);
        m.enable(t0);
        m.step(&seen(t0, 10.0), t0);
        let input = StepInput { target: obs(t0), altitude_m: None, ..StepInput::default() };
        let out = m.step(&input, t0 + ms(50));
        assert_eq!(out.phase, FlightPhase::Searching);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::AltitudeUnknown);
    }

    #[test]
    fn pilot_override_beats_everything() {
        let t0 = Instant::now();
        let (mut m, t) = approach(t0);
        let input = StepInput { pilot_override: true, ..seen(t, 20.0) };
        let out = m.step(&input, t);
        assert_eq!(out.phase, FlightPhase::Idle);
        assert_eq!(out.transition.unwrap().reason, TransitionReason::PilotOverride);
        assert_eq!(m.last_transition().unwrap().from, FlightPhase::Approach);
    }

    #[test]
    fn axes_follow_phase() {
        assert!(!FlightPhase::Searching.uses_axis(Axis::Roll));
        assert!(FlightPhase::Tracking.uses_axis(Axis::Pitch));
        assert!(!FlightPhase::Tracking.uses_axis(Axis::Descent));
        assert!(FlightPhase::Landing.uses_axis(Axis::Descent));
        assert!(!FlightPhase::Complete.is_active());
    }
}
