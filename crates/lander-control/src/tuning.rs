use std::sync::Mutex;

use lander_nav::doctor;
use lander_nav::{Axis, ConfigError, PidGains};
use serde::Serialize;
use tracing::info;

use crate::config::AxisPids;

/// Live-tunable state of one axis. `version` bumps on every accepted change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AxisTuning {
    pub gains: PidGains,
    /// Hold new gains until the controller is next reset.
    pub apply_on_reset: bool,
    pub version: u64,
}

/// Per-axis gain cells shared between the operator surface and the scheduler.
#[derive(Debug)]
pub struct LiveTuning {
    cells: [Mutex<AxisTuning>; 3],
}

impl LiveTuning {
    pub fn new(pids: &AxisPids) -> Self {
        let cell = |axis: Axis| {
            Mutex::new(AxisTuning { gains: pids.get(axis).gains(), apply_on_reset: false, version: 0 })
        };
        Self { cells: [cell(Axis::Roll), cell(Axis::Pitch), cell(Axis::Descent)] }
    }

    pub fn get(&self, axis: Axis) -> AxisTuning {
        *crate::lock(&self.cells[axis.index()])
    }

    /// Validate and publish new gains. On error nothing changes.
    pub fn set_gains(&self, axis: Axis, gains: PidGains) -> Result<u64, ConfigError> {
        doctor::check_gains(&gains).map_err(|e| ConfigError::new(format!("{}.{}", axis.name(), e.field), e.reason))?;
        let mut cell = crate::lock(&self.cells[axis.index()]);
        cell.gains = gains;
        cell.version += 1;
        info!("tuning: {} kp={} ki={} kd={} (v{})", axis.name(), gains.kp, gains.ki, gains.kd, cell.version);
        Ok(cell.version)
    }

    pub fn set_apply_on_reset(&self, axis: Axis, on: bool) {
        crate::lock(&self.cells[axis.index()]).apply_on_reset = on;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepted_change_bumps_version() {
        let t = LiveTuning::new(&AxisPids::default());
        assert_eq!(t.get(Axis::Pitch).version, 0);
        let v = t.set_gains(Axis::Pitch, PidGains { kp: 0.2, ki: 0.01, kd: 0.0 }).unwrap();
        assert_eq!(v, 1);
        assert_eq!(t.get(Axis::Pitch).gains.kp, 0.2);
        assert_eq!(t.get(Axis::Roll).version, 0);
    }

    #[test]
    fn rejected_change_keeps_previous() {
        let t = LiveTuning::new(&AxisPids::default());
        let before = t.get(Axis::Roll);
        let err = t.set_gains(Axis::Roll, PidGains { kp: 0.1, ki: f32::INFINITY, kd: 0.0 }).unwrap_err();
        assert_eq!(err.field, "roll.ki");
        assert_eq!(t.get(Axis::Roll), before);
    }
}
