//! A keyframed zoom into the Mandelbrot set, used as the export scene.

use std::collections::BTreeMap;

use fraktal_export_engine::SceneHost;
use fraktal_project_model::scene::{CameraPose, SceneDescription, SceneSnapshot};
use fraktal_project_model::uniform::UniformValue;

pub const FORMULA: &str = "mandelbrot";

/// Zoom interpolated geometrically between two keyframes, with an optional
/// constant roll.
#[derive(Debug, Clone)]
pub struct ZoomScene {
    center: [f64; 2],
    iterations: u32,
    zoom_start: f64,
    zoom_end: f64,
    first_frame: i64,
    last_frame: i64,
    spin_deg_per_frame: f64,
    frame: i64,
    playing: bool,
}

impl ZoomScene {
    pub fn new(center: [f64; 2], iterations: u32, zoom: (f64, f64), frames: (i64, i64)) -> Self {
        Self {
            center,
            iterations,
            zoom_start: zoom.0.max(f64::MIN_POSITIVE),
            zoom_end: zoom.1.max(f64::MIN_POSITIVE),
            first_frame: frames.0,
            last_frame: frames.1,
            spin_deg_per_frame: 0.0,
            frame: frames.0,
            playing: false,
        }
    }

    pub fn with_spin(mut self, deg_per_frame: f64) -> Self {
        self.spin_deg_per_frame = deg_per_frame;
        self
    }

    pub fn frame(&self) -> i64 {
        self.frame
    }

    /// Zoom at the current frame. Clamped to the keyframe range.
    pub fn zoom(&self) -> f64 {
        let span = (self.last_frame - self.first_frame) as f64;
        let t = if span <= 0.0 {
            0.0
        } else {
            ((self.frame - self.first_frame) as f64 / span).clamp(0.0, 1.0)
        };
        self.zoom_start * (self.zoom_end / self.zoom_start).powf(t)
    }

    fn roll(&self) -> f64 {
        (self.frame as f64 * self.spin_deg_per_frame).rem_euclid(360.0)
    }
}

impl SceneHost for ZoomScene {
    fn scrub(&mut self, frame: i64) {
        self.frame = frame;
    }

    fn uniforms(&self) -> BTreeMap<String, UniformValue> {
        BTreeMap::from([
            ("uCenter".to_string(), UniformValue::Vec2(self.center)),
            ("uZoom".to_string(), UniformValue::Float(self.zoom())),
            (
                "uIterations".to_string(),
                UniformValue::Float(self.iterations as f64),
            ),
            (
                "uRotation".to_string(),
                UniformValue::Vec3([0.0, 0.0, self.roll()]),
            ),
        ])
    }

    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            timeline_frame: self.frame,
            camera: CameraPose {
                position: [self.center[0], self.center[1], 1.0 / self.zoom()],
                rotation: [0.0, 0.0, self.roll()],
                ..CameraPose::default()
            },
            scene_offset: [0.0; 3],
            playing: self.playing,
        }
    }

    fn restore(&mut self, snapshot: &SceneSnapshot) {
        self.frame = snapshot.timeline_frame;
        self.playing = snapshot.playing;
    }

    fn describe(&self) -> SceneDescription {
        let mut description = SceneDescription::new(FORMULA, &self.snapshot());
        description.uniforms = self.uniforms();
        description
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> ZoomScene {
        ZoomScene::new([-0.5, 0.0], 256, (1.0, 100.0), (0, 10))
    }

    #[test]
    fn test_zoom_is_geometric() {
        let mut scene = scene();
        assert!((scene.zoom() - 1.0).abs() < 1e-12);
        scene.scrub(5);
        assert!((scene.zoom() - 10.0).abs() < 1e-9);
        scene.scrub(10);
        assert!((scene.zoom() - 100.0).abs() < 1e-9);
        scene.scrub(20);
        assert!((scene.zoom() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_restore_puts_frame_back() {
        let mut scene = scene().with_spin(3.0);
        scene.scrub(2);
        let snapshot = scene.snapshot();
        scene.scrub(9);
        scene.restore(&snapshot);
        assert_eq!(scene.frame(), 2);
        assert_eq!(scene.snapshot(), snapshot);
    }

    #[test]
    fn test_description_carries_uniforms() {
        let mut scene = scene().with_spin(10.0);
        scene.scrub(4);
        let description = scene.describe();
        assert_eq!(description.formula, FORMULA);
        assert_eq!(description.frame, 4);
        assert_eq!(
            description.uniforms["uRotation"],
            UniformValue::Vec3([0.0, 0.0, 40.0])
        );
    }
}
