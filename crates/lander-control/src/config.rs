use std::time::Duration;

use lander_nav::doctor;
use lander_nav::{Axis, ConfigError, PhaseConfig, PidConfig};
use lander_proto::{CHANNEL_COUNT, RC_MAX, RC_MID, RC_MIN};
use lander_vision::tracker::TrackingConfig;
use lander_vision::FieldOfView;
use serde::Deserialize;

/// INAV reverts to the receiver below this MSP override rate.
pub const FC_MIN_SEND_HZ: f32 = 5.0;

/// Operational parameters for one landing session. Passed in explicitly,
/// never read from disk by this crate.
#[derive(Debug, Clone, Deserialize)]
pub struct LandingConfig {
    #[serde(default = "default_tick_hz")]
    pub tick_hz: f32,
    #[serde(default = "default_min_send_hz")]
    pub min_send_hz: f32,
    #[serde(default = "default_telemetry_hz")]
    pub telemetry_hz: f32,
    /// Altitude samples older than this count as unknown.
    #[serde(default = "default_altitude_stale_after_s")]
    pub altitude_stale_after_s: f32,
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,

    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub phase: PhaseConfig,
    #[serde(default)]
    pub pid: AxisPids,
    #[serde(default)]
    pub channels: ChannelMap,
    #[serde(default)]
    pub pilot_override: Option<PilotOverride>,
    /// Camera lens, for reporting target offsets in metres.
    #[serde(default)]
    pub fov: Option<FieldOfView>,
}

fn default_tick_hz() -> f32 { 20.0 }
fn default_min_send_hz() -> f32 { FC_MIN_SEND_HZ }
fn default_telemetry_hz() -> f32 { 10.0 }
fn default_altitude_stale_after_s() -> f32 { 1.0 }
fn default_outbound_queue() -> usize { 8 }

impl Default for LandingConfig {
    fn default() -> Self {
        Self {
            tick_hz: default_tick_hz(),
            min_send_hz: default_min_send_hz(),
            telemetry_hz: default_telemetry_hz(),
            altitude_stale_after_s: default_altitude_stale_after_s(),
            outbound_queue: default_outbound_queue(),
            tracking: TrackingConfig::default(),
            phase: PhaseConfig::default(),
            pid: AxisPids::default(),
            channels: ChannelMap::default(),
            pilot_override: None,
            fov: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AxisPids {
    #[serde(default = "default_horizontal_pid")]
    pub roll: PidConfig,
    #[serde(default = "default_horizontal_pid")]
    pub pitch: PidConfig,
    /// Error is height above ground, so the output range should sit at or below zero.
    #[serde(default = "default_descent_pid")]
    pub descent: PidConfig,
}

fn default_horizontal_pid() -> PidConfig {
    PidConfig {
        kp: 0.1,
        ki: 0.0,
        kd: 0.0,
        output_min: -0.4,
        output_max: 0.4,
        integral_limit: 0.5,
        deadband: 0.05,
    }
}

fn default_descent_pid() -> PidConfig {
    PidConfig {
        kp: 0.05,
        ki: 0.0,
        kd: 0.0,
        output_min: -0.25,
        output_max: 0.0,
        integral_limit: 0.5,
        deadband: 0.0,
    }
}

impl Default for AxisPids {
    fn default() -> Self {
        Self { roll: default_horizontal_pid(), pitch: default_horizontal_pid(), descent: default_descent_pid() }
    }
}

impl AxisPids {
    pub fn get(&self, axis: Axis) -> &PidConfig {
        match axis {
            Axis::Roll => &self.roll,
            Axis::Pitch => &self.pitch,
            Axis::Descent => &self.descent,
        }
    }
}

/// Which SET_RAW_RC slots carry each command, and how far a full command moves them.
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelMap {
    #[serde(default = "default_roll_ch")]
    pub roll: usize,
    #[serde(default = "default_pitch_ch")]
    pub pitch: usize,
    #[serde(default = "default_throttle_ch")]
    pub throttle: usize,
    #[serde(default = "default_yaw_ch")]
    pub yaw: usize,
    /// A command of ±1.0 maps to RC_MID ± rc_half_range.
    #[serde(default = "default_rc_half_range")]
    pub rc_half_range: u16,
    /// Fixed throttle fraction below mid during the final descent.
    #[serde(default = "default_final_descent")]
    pub final_descent: f32,
}

fn default_roll_ch() -> usize { 0 }
fn default_pitch_ch() -> usize { 1 }
fn default_throttle_ch() -> usize { 2 }
fn default_yaw_ch() -> usize { 3 }
fn default_rc_half_range() -> u16 { 300 }
fn default_final_descent() -> f32 { 0.08 }

impl Default for ChannelMap {
    fn default() -> Self {
        Self {
            roll: default_roll_ch(),
            pitch: default_pitch_ch(),
            throttle: default_throttle_ch(),
            yaw: default_yaw_ch(),
            rc_half_range: default_rc_half_range(),
            final_descent: default_final_descent(),
        }
    }
}

impl ChannelMap {
    pub fn channel(&self, axis: Axis) -> usize {
        match axis {
            Axis::Roll => self.roll,
            Axis::Pitch => self.pitch,
            Axis::Descent => self.throttle,
        }
    }

    /// Bitmask of the channels the lander drives, for INAV's
    /// `msp_override_channels`. Bit n is RC channel n (0-based).
    pub fn override_mask(&self) -> u16 {
        [self.roll, self.pitch, self.throttle, self.yaw]
            .into_iter()
            .filter(|c| *c < CHANNEL_COUNT)
            .fold(0, |mask, c| mask | 1 << c)
    }
}

/// A receiver switch that takes control back from the lander.
///
/// Every SET_RAW_RC frame carries all 16 channels, and the ones the lander
/// does not steer are written at 1500. The FC only takes the channels named in
/// its `msp_override_channels` mask from those frames, so the switch channel
/// must stay out of that mask or the override hides the pilot's switch.
/// [`ChannelMap::override_mask`] is the mask to configure.
#[derive(Debug, Clone, Deserialize)]
pub struct PilotOverride {
    pub channel: usize,
    #[serde(default = "default_override_threshold")]
    pub threshold: u16,
}

fn default_override_threshold() -> u16 { 1700 }

impl LandingConfig {
    pub fn tick_period(&self) -> Duration {
        Duration::from_micros((1_000_000.0 / self.tick_hz.max(1.0)) as u64)
    }

    /// Longest gap between successful sends before the watchdog cedes control.
    pub fn send_window(&self) -> Duration {
        Duration::from_micros((1_000_000.0 / self.min_send_hz.max(0.1)) as u64)
    }

    pub fn altitude_stale_after(&self) -> Duration {
        Duration::try_from_secs_f32(self.altitude_stale_after_s).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let finite_pos = |v: f32| v.is_finite() && v > 0.0;

        if !(self.min_send_hz.is_finite() && self.min_send_hz >= FC_MIN_SEND_HZ) {
            return Err(ConfigError::new("min_send_hz", format!("must be >= {}", FC_MIN_SEND_HZ)));
        }
        if !(self.tick_hz.is_finite() && self.tick_hz >= self.min_send_hz) {
            return Err(ConfigError::new("tick_hz", "must be >= min_send_hz"));
        }
        if !finite_pos(self.telemetry_hz) {
            return Err(ConfigError::new("telemetry_hz", "must be > 0"));
        }
        if !finite_pos(self.altitude_stale_after_s) {
            return Err(ConfigError::new("altitude_stale_after_s", "must be > 0"));
        }
        if self.outbound_queue == 0 {
            return Err(ConfigError::new("outbound_queue", "must be >= 1"));
        }

        doctor::check_tracking(&self.tracking)?;
        doctor::check_phase_thresholds(&self.phase)?;
        for axis in Axis::ALL {
            doctor::check_pid(self.pid.get(axis)).map_err(|e| ConfigError::new(format!("pid.{}.{}", axis.name(), e.field), e.reason))?;
        }

        let ch = &self.channels;
        let used = [ch.roll, ch.pitch, ch.throttle, ch.yaw];
        if used.iter().any(|c| *c >= CHANNEL_COUNT) {
            return Err(ConfigError::new("channels", format!("indices must be < {}", CHANNEL_COUNT)));
        }
        for (i, a) in used.iter().enumerate() {
            if used[i + 1..].contains(a) {
                return Err(ConfigError::new("channels", "roll/pitch/throttle/yaw must be distinct"));
            }
        }
        if ch.rc_half_range == 0 || ch.rc_half_range > RC_MAX - RC_MID {
            return Err(ConfigError::new("channels.rc_half_range", format!("must be in 1..={}", RC_MAX - RC_MID)));
        }
        if !(ch.final_descent.is_finite() && (0.0..=1.0).contains(&ch.final_descent)) {
            return Err(ConfigError::new("channels.final_descent", "must be in 0..=1"));
        }

        if let Some(p) = &self.pilot_override {
            if p.channel >= CHANNEL_COUNT || used.contains(&p.channel) {
                return Err(ConfigError::new("pilot_override.channel", "must be a free channel index"));
            }
            if !(RC_MIN..=RC_MAX).contains(&p.threshold) {
                return Err(ConfigError::new("pilot_override.threshold", format!("must be in {}..={}", RC_MIN, RC_MAX)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        LandingConfig::default().validate().unwrap();
        assert_eq!(LandingConfig::default().send_window(), Duration::from_millis(200));
        assert_eq!(LandingConfig::default().tick_period(), Duration::from_millis(50));
    }

    #[test]
    fn send_rate_below_fc_failsafe_is_rejected() {
        let cfg = LandingConfig { min_send_hz: 4.0, tick_hz: 4.0, ..LandingConfig::default() };
        assert_eq!(cfg.validate().unwrap_err().field, "min_send_hz");
    }

    #[test]
    fn tick_must_keep_up_with_min_rate() {
        let cfg = LandingConfig { tick_hz: 5.0, min_send_hz: 10.0, ..LandingConfig::default() };
        assert_eq!(cfg.validate().unwrap_err().field, "tick_hz");
    }

    #[test]
    fn duplicate_channels_are_rejected() {
        let mut cfg = LandingConfig::default();
        cfg.channels.pitch = cfg.channels.roll;
        assert_eq!(cfg.validate().unwrap_err().field, "channels");
    }

    #[test]
    fn pid_errors_name_the_axis() {
        let mut cfg = LandingConfig::default();
        cfg.pid.descent.kp = -1.0;
        assert_eq!(cfg.validate().unwrap_err().field, "pid.descent.kp");
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let cfg: LandingConfig = from_json(
            r#"{"tick_hz": 25.0, "pid": {"roll": {"kp": 0.3}}, "pilot_override": {"channel": 6}}"#,
        );
        assert_eq!(cfg.tick_hz, 25.0);
        assert_eq!(cfg.pid.roll.kp, 0.3);
        assert_eq!(cfg.pid.roll.output_max, 1.0);
        assert_eq!(cfg.pid.pitch.kp, 0.1);
        assert_eq!(cfg.pilot_override.unwrap().threshold, 1700);
        assert_eq!(cfg.phase.safety_ceiling_m, 15.0);
    }

    fn from_json(json: &str) -> LandingConfig {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn override_mask_leaves_the_pilot_switch_alone() {
        assert_eq!(ChannelMap::default().override_mask(), 0b1111);

        let cfg = LandingConfig {
            channels: ChannelMap { roll: 4, pitch: 5, throttle: 0, yaw: 3, ..ChannelMap::default() },
            pilot_override: Some(PilotOverride { channel: 6, threshold: 1700 }),
            ..LandingConfig::default()
        };
        cfg.validate().unwrap();
        let mask = cfg.channels.override_mask();
        assert_eq!(mask, 0b0011_1001);
        assert_eq!(mask & (1 << 6), 0);
    }
}
