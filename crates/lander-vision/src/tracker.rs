use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, trace};

use crate::TargetObservation;

#[derive(Debug, Clone, Deserialize)]
pub struct TrackingConfig {
    /// Observations older than this are treated as absent.
    #[serde(default = "default_stale_after_s")]
    pub stale_after_s: f32,
    /// Sightings below this confidence never count as a target.
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_stale_after_s() -> f32 { 0.5 }
fn default_min_confidence() -> f32 { 0.5 }

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { stale_after_s: default_stale_after_s(), min_confidence: default_min_confidence() }
    }
}

impl TrackingConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::try_from_secs_f32(self.stale_after_s).unwrap_or(Duration::ZERO)
    }
}

/// Holds the latest beacon sighting and decides whether it is still usable.
///
/// Every consumer goes through [`TargetTracker::current`], so the control loop
/// and the status surface always agree on whether a target is present.
#[derive(Debug, Clone)]
pub struct TargetTracker {
    cfg: TrackingConfig,
    last: Option<TargetObservation>,
    arrived: Option<Instant>,
}

impl TargetTracker {
    pub fn new(cfg: TrackingConfig) -> Self {
        Self { cfg, last: None, arrived: None }
    }

    /// Store a sighting. Returns false if it is older than the one already held.
    pub fn update(&mut self, obs: TargetObservation, arrived: Instant) -> bool {
        if let Some(prev) = self.last {
            if obs.timestamp < prev.timestamp {
                trace!("tracker: dropping out-of-order observation");
                return false;
            }
        }
        if self.last.is_none() {
            debug!("tracker: first observation conf={:.2}", obs.confidence);
        }
        self.last = Some(obs);
        self.arrived = Some(arrived);
        true
    }

    /// The held sighting if it is fresh and confident enough at `now`.
    pub fn current(&self, now: Instant) -> Option<TargetObservation> {
        let obs = self.last?;
        if obs.age(now) > self.cfg.stale_after() {
            return None;
        }
        if obs.confidence < self.cfg.min_confidence {
            return None;
        }
        Some(obs)
    }

    /// Raw latest sighting regardless of freshness.
    pub fn latest(&self) -> Option<TargetObservation> {
        self.last
    }

    pub fn last_seen(&self) -> Option<Instant> {
        self.arrived
    }

    pub fn clear(&mut self) {
        self.last = None;
        self.arrived = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> TargetTracker {
        TargetTracker::new(TrackingConfig { stale_after_s: 0.5, min_confidence: 0.6 })
    }

    #[test]
    fn empty_tracker_has_no_target() {
        assert!(tracker().current(Instant::now()).is_none());
    }

    #[test]
    fn observation_goes_stale() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.update(TargetObservation::new(0.1, 0.2, 0.9, t0).unwrap(), t0);
        assert!(t.current(t0 + Duration::from_millis(400)).is_some());
        assert!(t.current(t0 + Duration::from_millis(501)).is_none());
        assert!(t.latest().is_some());
    }

    #[test]
    fn low_confidence_is_not_a_target() {
        let t0 = Instant::now();
        let mut t = tracker();
        t.update(TargetObservation::new(0.0, 0.0, 0.3, t0).unwrap(), t0);
        assert!(t.current(t0).is_none());
    }

    #[test]
    fn older_observation_does_not_replace_newer() {
        let t0 = Instant::now();
        let mut t = tracker();
        let newer = TargetObservation::new(0.5, 0.0, 0.9, t0 + Duration::from_millis(100)).unwrap();
        let older = TargetObservation::new(-0.5, 0.0, 0.9, t0).unwrap();
        assert!(t.update(newer, t0));
        assert!(!t.update(older, t0));
        assert_eq!(t.latest().unwrap().x, 0.5);
    }
}
