//! Scene snapshot and description types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::uniform::UniformValue;

/// Camera placement in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CameraPose {
    /// Eye position.
    pub position: [f64; 3],

    /// Euler rotation in degrees (pitch, yaw, roll).
    pub rotation: [f64; 3],

    /// Vertical field of view in degrees.
    pub fov_deg: f64,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            position: [0.0, 0.0, 3.0],
            rotation: [0.0, 0.0, 0.0],
            fov_deg: 45.0,
        }
    }
}

/// Externally observable scene state captured before an export and
/// restored afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneSnapshot {
    /// Timeline frame the user was looking at.
    pub timeline_frame: i64,

    /// Camera pose.
    pub camera: CameraPose,

    /// Scene-space offset (used for deep zooms to keep precision).
    pub scene_offset: [f64; 3],

    /// Whether timeline playback was running.
    pub playing: bool,
}

impl Default for SceneSnapshot {
    fn default() -> Self {
        Self {
            timeline_frame: 0,
            camera: CameraPose::default(),
            scene_offset: [0.0; 3],
            playing: false,
        }
    }
}

/// Serializable description of a rendered scene, embedded in still images
/// so a render can be reopened with the exact parameters that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneDescription {
    /// Schema version.
    pub version: String,

    /// Formula / distance estimator name.
    pub formula: String,

    /// Timeline frame.
    pub frame: i64,

    /// Camera pose.
    pub camera: CameraPose,

    /// Scene-space offset.
    pub scene_offset: [f64; 3],

    /// Uniform values at render time.
    pub uniforms: BTreeMap<String, UniformValue>,
}

impl SceneDescription {
    pub fn new(formula: impl Into<String>, snapshot: &SceneSnapshot) -> Self {
        Self {
            version: "1.0".to_string(),
            formula: formula.into(),
            frame: snapshot.timeline_frame,
            camera: snapshot.camera,
            scene_offset: snapshot.scene_offset,
            uniforms: BTreeMap::new(),
        }
    }

    /// Serialize to the compact JSON form stored in image metadata.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_description_json_round_trip() {
        let snapshot = SceneSnapshot {
            timeline_frame: 42,
            ..Default::default()
        };
        let mut description = SceneDescription::new("mandelbrot", &snapshot);
        description
            .uniforms
            .insert("uZoom".to_string(), UniformValue::Float(250.0));

        let json = description.to_json().unwrap();
        let parsed = SceneDescription::from_json(&json).unwrap();
        assert_eq!(parsed, description);
        assert_eq!(parsed.frame, 42);
    }

    #[test]
    fn test_snapshot_default_is_paused_at_origin() {
        let snapshot = SceneSnapshot::default();
        assert!(!snapshot.playing);
        assert_eq!(snapshot.timeline_frame, 0);
        assert_eq!(snapshot.scene_offset, [0.0; 3]);
    }
}
