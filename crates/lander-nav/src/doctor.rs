use lander_vision::tracker::TrackingConfig;

use crate::phase::PhaseConfig;
use crate::pid::{PidConfig, PidGains};
use crate::ConfigError;

fn ensure(ok: bool, field: &str, reason: &str) -> Result<(), ConfigError> {
    if ok { Ok(()) } else { Err(ConfigError::new(field, reason)) }
}

fn finite_non_negative(v: f32) -> bool {
    v.is_finite() && v >= 0.0
}

pub fn check_gains(g: &PidGains) -> Result<(), ConfigError> {
    ensure(finite_non_negative(g.kp), "kp", "must be finite and >= 0")?;
    ensure(finite_non_negative(g.ki), "ki", "must be finite and >= 0")?;
    ensure(finite_non_negative(g.kd), "kd", "must be finite and >= 0")?;
    Ok(())
}

pub fn check_pid(cfg: &PidConfig) -> Result<(), ConfigError> {
    check_gains(&cfg.gains())?;
    ensure(
        cfg.output_min.is_finite() && cfg.output_max.is_finite() && cfg.output_min < cfg.output_max,
        "output_min/output_max",
        "must be finite with min < max",
    )?;
    // Zero error has to map to zero command.
    ensure(cfg.output_min <= 0.0 && cfg.output_max >= 0.0, "output_min/output_max", "range must contain 0")?;
    ensure(finite_non_negative(cfg.integral_limit), "integral_limit", "must be finite and >= 0")?;
    ensure(finite_non_negative(cfg.deadband) && cfg.deadband < 1.0, "deadband", "must be in 0..1")?;
    Ok(())
}

pub fn check_phase_thresholds(cfg: &PhaseConfig) -> Result<(), ConfigError> {
    ensure(finite_non_negative(cfg.detection_confirm_s), "phase.detection_confirm_s", "must be >= 0")?;
    ensure(
        cfg.loss_timeout_s.is_finite() && cfg.loss_timeout_s > 0.0,
        "phase.loss_timeout_s",
        "must be > 0",
    )?;
    ensure(
        cfg.ground_altitude_m.is_finite()
            && cfg.landing_altitude_m.is_finite()
            && cfg.safety_ceiling_m.is_finite(),
        "phase altitudes",
        "must be finite",
    )?;
    ensure(
        cfg.ground_altitude_m < cfg.landing_altitude_m,
        "phase.ground_altitude_m",
        "must be below landing_altitude_m",
    )?;
    ensure(
        cfg.landing_altitude_m < cfg.safety_ceiling_m,
        "phase.landing_altitude_m",
        "must be below safety_ceiling_m",
    )?;
    Ok(())
}

pub fn check_tracking(cfg: &TrackingConfig) -> Result<(), ConfigError> {
    ensure(
        cfg.stale_after_s.is_finite() && cfg.stale_after_s > 0.0,
        "tracking.stale_after_s",
        "must be > 0",
    )?;
    ensure(
        (0.0..=1.0).contains(&cfg.min_confidence),
        "tracking.min_confidence",
        "must be in 0..=1",
    )?;
    Ok(())
}
