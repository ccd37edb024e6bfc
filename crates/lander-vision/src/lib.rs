pub mod source;
pub mod tracker;

use std::time::{Duration, Instant};

use serde::Deserialize;

/// A beacon sighting from the vision collaborator.
///
/// Offsets are from the frame centre, normalized so the frame edges are at ±1
/// (+x right, +y down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetObservation {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
    pub timestamp: Instant,
}

impl TargetObservation {
    /// Returns `None` for non-finite input. Finite values are clamped into range.
    pub fn new(x: f32, y: f32, confidence: f32, timestamp: Instant) -> Option<Self> {
        if !(x.is_finite() && y.is_finite() && confidence.is_finite()) {
            return None;
        }
        Some(Self {
            x: x.clamp(-1.0, 1.0),
            y: y.clamp(-1.0, 1.0),
            confidence: confidence.clamp(0.0, 1.0),
            timestamp,
        })
    }

    /// Normalize a pixel position against the frame size.
    pub fn from_pixels(px: f32, py: f32, geometry: &FrameGeometry, confidence: f32, timestamp: Instant) -> Option<Self> {
        if geometry.width == 0 || geometry.height == 0 {
            return None;
        }
        let cx = geometry.width as f32 / 2.0;
        let cy = geometry.height as f32 / 2.0;
        Self::new((px - cx) / cx, (py - cy) / cy, confidence, timestamp)
    }

    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.timestamp)
    }
}

/// Camera frame size, needed when the collaborator reports raw pixels.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FrameGeometry {
    pub width: u32,
    pub height: u32,
}

/// Lens field of view in degrees, for turning normalized offsets into metres.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct FieldOfView {
    pub horizontal_deg: f32,
    pub vertical_deg: f32,
}

impl FieldOfView {
    /// Width and height of the ground patch seen from `altitude_m`.
    pub fn ground_extent_m(&self, altitude_m: f32) -> (f32, f32) {
        let half = |deg: f32| (deg.to_radians() / 2.0).tan();
        let alt = altitude_m.max(0.0);
        (2.0 * alt * half(self.horizontal_deg), 2.0 * alt * half(self.vertical_deg))
    }

    /// Approximate ground offset of a sighting, in metres, under a nadir camera.
    pub fn ground_offset_m(&self, obs: &TargetObservation, altitude_m: f32) -> (f32, f32) {
        let (w, h) = self.ground_extent_m(altitude_m);
        (obs.x * w / 2.0, obs.y * h / 2.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ninety_degree_lens_sees_twice_its_height() {
        let fov = FieldOfView { horizontal_deg: 90.0, vertical_deg: 90.0 };
        let (w, h) = fov.ground_extent_m(5.0);
        assert!((w - 10.0).abs() < 1e-4 && (h - 10.0).abs() < 1e-4);

        let o = TargetObservation::new(0.5, -1.0, 1.0, Instant::now()).unwrap();
        let (dx, dy) = fov.ground_offset_m(&o, 5.0);
        assert!((dx - 2.5).abs() < 1e-4, "{}", dx);
        assert!((dy + 5.0).abs() < 1e-4, "{}", dy);
    }

    #[test]
    fn pixels_normalize_around_centre() {
        let g = FrameGeometry { width: 1456, height: 1088 };
        let now = Instant::now();
        let o = TargetObservation::from_pixels(728.0, 544.0, &g, 0.9, now).unwrap();
        assert_eq!((o.x, o.y), (0.0, 0.0));
        let o = TargetObservation::from_pixels(1456.0, 0.0, &g, 0.9, now).unwrap();
        assert_eq!((o.x, o.y), (1.0, -1.0));
    }

    #[test]
    fn non_finite_is_rejected_and_range_is_clamped() {
        let now = Instant::now();
        assert!(TargetObservation::new(f32::NAN, 0.0, 1.0, now).is_none());
        let o = TargetObservation::new(3.0, -2.0, 1.5, now).unwrap();
        assert_eq!((o.x, o.y, o.confidence), (1.0, -1.0, 1.0));
    }
}
