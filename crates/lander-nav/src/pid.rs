use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::doctor;
use crate::ConfigError;

/// Control axes driven by the landing loop. Each one owns a separate [`Pid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    /// Horizontal x offset -> roll.
    Roll,
    /// Horizontal y offset -> pitch.
    Pitch,
    /// Height above the landing floor -> throttle.
    Descent,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::Roll, Axis::Pitch, Axis::Descent];

    pub fn index(self) -> usize {
        match self {
            Axis::Roll => 0,
            Axis::Pitch => 1,
            Axis::Descent => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::Roll => "roll",
            Axis::Pitch => "pitch",
            Axis::Descent => "descent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PidConfig {
    pub kp: f32,
    #[serde(default)]
    pub ki: f32,
    #[serde(default)]
    pub kd: f32,
    #[serde(default = "default_output_min")]
    pub output_min: f32,
    #[serde(default = "default_output_max")]
    pub output_max: f32,
    /// Anti-windup bound on the accumulated integral.
    #[serde(default = "default_integral_limit")]
    pub integral_limit: f32,
    /// Errors with a smaller magnitude count as zero.
    #[serde(default)]
    pub deadband: f32,
}

fn default_output_min() -> f32 { -1.0 }
fn default_output_max() -> f32 { 1.0 }
fn default_integral_limit() -> f32 { 0.5 }

impl PidConfig {
    pub fn gains(&self) -> PidGains {
        PidGains { kp: self.kp, ki: self.ki, kd: self.kd }
    }
}

/// Discrete PID with integral clamping and output saturation.
///
/// The derivative is taken on the error and is zero on the first update after
/// a reset. A non-positive or non-finite `dt` only produces the P term.
#[derive(Debug, Clone)]
pub struct Pid {
    gains: PidGains,
    staged: Option<PidGains>,
    output_min: f32,
    output_max: f32,
    integral_limit: f32,
    deadband: f32,

    integral: f32,
    prev_error: Option<f32>,
}

impl Pid {
    pub fn new(cfg: &PidConfig) -> Result<Self, ConfigError> {
        doctor::check_pid(cfg)?;
        Ok(Self {
            gains: cfg.gains(),
            staged: None,
            output_min: cfg.output_min,
            output_max: cfg.output_max,
            integral_limit: cfg.integral_limit,
            deadband: cfg.deadband,
            integral: 0.0,
            prev_error: None,
        })
    }

    pub fn update(&mut self, error: f32, dt: f32) -> f32 {
        let e = if !error.is_finite() || error.abs() <= self.deadband { 0.0 } else { error };
        let dt_ok = dt.is_finite() && dt > 0.0;

        if dt_ok {
            self.integral = (self.integral + e * dt).clamp(-self.integral_limit, self.integral_limit);
        }

        let d = match self.prev_error {
            Some(prev) if dt_ok => self.gains.kd * (e - prev) / dt,
            _ => 0.0,
        };
        self.prev_error = Some(e);

        let out = self.gains.kp * e + self.gains.ki * self.integral + d;
        if out.is_finite() {
            out.clamp(self.output_min, self.output_max)
        } else {
            0.0
        }
    }

    /// Zero the integral and derivative history, then apply any staged gains.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.prev_error = None;
        if let Some(g) = self.staged.take() {
            debug!("pid: applying staged gains kp={} ki={} kd={}", g.kp, g.ki, g.kd);
            self.gains = g;
        }
    }

    /// Swap gains without touching accumulated state.
    pub fn set_gains(&mut self, gains: PidGains) -> Result<(), ConfigError> {
        doctor::check_gains(&gains)?;
        self.gains = gains;
        self.staged = None;
        Ok(())
    }

    /// Hold gains until the next [`Pid::reset`].
    pub fn stage_gains(&mut self, gains: PidGains) -> Result<(), ConfigError> {
        doctor::check_gains(&gains)?;
        self.staged = Some(gains);
        Ok(())
    }

    pub fn gains(&self) -> PidGains {
        self.gains
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn output_limits(&self) -> (f32, f32) {
        (self.output_min, self.output_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(kp: f32, ki: f32, kd: f32) -> PidConfig {
        PidConfig {
            kp,
            ki,
            kd,
            output_min: -1.0,
            output_max: 1.0,
            integral_limit: 0.5,
            deadband: 0.0,
        }
    }

    #[test]
    fn zero_error_from_rest_is_zero() {
        let mut pid = Pid::new(&cfg(0.8, 0.3, 0.1)).unwrap();
        assert_eq!(pid.update(0.0, 0.05), 0.0);
    }

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(&cfg(0.5, 0.0, 0.0)).unwrap();
        assert_eq!(pid.update(0.4, 0.05), 0.2);
    }

    #[test]
    fn output_never_leaves_clamp() {
        let mut pid = Pid::new(&cfg(50.0, 20.0, 5.0)).unwrap();
        for e in [1e6, -1e6, 3.0, -3.0, f32::MAX, f32::MIN, f32::NAN, 0.0] {
            let out = pid.update(e, 0.05);
            assert!((-1.0..=1.0).contains(&out), "{} -> {}", e, out);
            assert!(pid.integral().abs() <= 0.5);
        }
    }

    #[test]
    fn integral_saturates_at_limit() {
        let mut pid = Pid::new(&cfg(0.0, 1.0, 0.0)).unwrap();
        for _ in 0..1000 {
            pid.update(1.0, 0.1);
        }
        assert_eq!(pid.integral(), 0.5);
        // Unwinds immediately once the error flips.
        pid.update(-1.0, 0.1);
        assert!(pid.integral() < 0.5);
    }

    #[test]
    fn derivative_uses_error_change() {
        let mut pid = Pid::new(&cfg(0.0, 0.0, 0.1)).unwrap();
        assert_eq!(pid.update(0.0, 0.1), 0.0);
        let out = pid.update(0.5, 0.1);
        assert!((out - 0.5).abs() < 1e-5, "{}", out);
    }

    #[test]
    fn bad_dt_gives_p_term_only() {
        let mut pid = Pid::new(&cfg(0.5, 1.0, 1.0)).unwrap();
        pid.update(0.2, 0.1);
        let before = pid.integral();
        assert_eq!(pid.update(0.2, 0.0), 0.1 + before);
        assert_eq!(pid.integral(), before);
    }

    #[test]
    fn reset_clears_history() {
        let mut pid = Pid::new(&cfg(0.0, 1.0, 1.0)).unwrap();
        pid.update(0.4, 0.1);
        pid.update(0.4, 0.1);
        pid.reset();
        assert_eq!(pid.integral(), 0.0);
        assert_eq!(pid.update(0.0, 0.1), 0.0);
    }

    #[test]
    fn deadband_zeroes_small_errors() {
        let mut c = cfg(1.0, 0.0, 0.0);
        c.deadband = 0.05;
        let mut pid = Pid::new(&c).unwrap();
        assert_eq!(pid.update(0.04, 0.05), 0.0);
        assert_eq!(pid.update(-0.5, 0.05), -0.5);
    }

    #[test]
    fn set_gains_keeps_integral_but_staging_waits_for_reset() {
        let mut pid = Pid::new(&cfg(0.1, 1.0, 0.0)).unwrap();
        pid.update(0.3, 0.5);
        let acc = pid.integral();

        pid.set_gains(PidGains { kp: 0.2, ki: 1.0, kd: 0.0 }).unwrap();
        assert_eq!(pid.integral(), acc);
        assert_eq!(pid.gains().kp, 0.2);

        pid.stage_gains(PidGains { kp: 0.9, ki: 0.0, kd: 0.0 }).unwrap();
        assert_eq!(pid.gains().kp, 0.2);
        pid.reset();
        assert_eq!(pid.gains().kp, 0.9);
    }

    #[test]
    fn invalid_gains_are_rejected_and_previous_kept() {
        let mut pid = Pid::new(&cfg(0.1, 0.0, 0.0)).unwrap();
        assert!(pid.set_gains(PidGains { kp: f32::NAN, ki: 0.0, kd: 0.0 }).is_err());
        assert!(pid.set_gains(PidGains { kp: -1.0, ki: 0.0, kd: 0.0 }).is_err());
        assert_eq!(pid.gains().kp, 0.1);
    }

    #[test]
    fn inverted_clamp_is_rejected() {
        let mut c = cfg(0.1, 0.0, 0.0);
        c.output_min = 1.0;
        c.output_max = -1.0;
        assert!(Pid::new(&c).is_err());
    }
}
