//! Modulation offsets and derived uniforms.
//!
//! Offsets are applied on top of the values the timeline produced for the
//! frame, never on top of the previous frame's modulated values, so
//! modulation cannot drift over a long export.

use std::collections::BTreeMap;

use glam::{DMat3, EulerRot};

use fraktal_project_model::uniform::UniformValue;

/// Euler angles in degrees (pitch, yaw, roll) driving [`ROTATION_MATRIX_UNIFORM`].
pub const ROTATION_UNIFORM: &str = "uRotation";

/// Column-major 3x3 rotation derived from [`ROTATION_UNIFORM`].
pub const ROTATION_MATRIX_UNIFORM: &str = "uRotationMatrix";

/// Split `uCenter.x` into `("uCenter", Some(0))`. Unknown suffixes are
/// treated as part of the name.
fn parse_key(key: &str) -> (&str, Option<usize>) {
    if let Some((name, suffix)) = key.rsplit_once('.') {
        let component = match suffix {
            "x" | "r" => Some(0),
            "y" | "g" => Some(1),
            "z" | "b" => Some(2),
            "w" | "a" => Some(3),
            _ => None,
        };
        if component.is_some() {
            return (name, component);
        }
    }
    (key, None)
}

/// Layer `offsets` over `base`. Returns the complete uniform set for the
/// frame; offsets for unknown uniforms or incompatible types are skipped.
pub fn apply_modulation(
    base: &BTreeMap<String, UniformValue>,
    offsets: &BTreeMap<String, f64>,
) -> BTreeMap<String, UniformValue> {
    let mut out = base.clone();
    for (key, &delta) in offsets {
        let (name, component) = parse_key(key);
        let Some(value) = out.get_mut(name) else {
            tracing::debug!(key = %key, "Modulation target not in scene");
            continue;
        };
        match value.offset_by(component, delta) {
            Some(modulated) => *value = modulated,
            None => tracing::debug!(key = %key, ?value, "Modulation offset does not apply"),
        }
    }
    out
}

/// Rotation from Euler angles in degrees, applied as yaw (Y), then pitch
/// (X), then roll (Z): `R = Ry · Rx · Rz`. Column-major.
pub fn rotation_matrix(euler_deg: [f64; 3]) -> [f64; 9] {
    let [pitch, yaw, roll] = euler_deg.map(f64::to_radians);
    DMat3::from_euler(EulerRot::YXZ, yaw, pitch, roll).to_cols_array()
}

/// Add uniforms computed from other uniforms.
pub fn derive_uniforms(uniforms: &mut BTreeMap<String, UniformValue>) {
    if let Some(UniformValue::Vec3(euler)) = uniforms.get(ROTATION_UNIFORM).copied() {
        uniforms.insert(
            ROTATION_MATRIX_UNIFORM.to_string(),
            UniformValue::Mat3(rotation_matrix(euler)),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BTreeMap<String, UniformValue> {
        BTreeMap::from([
            ("uZoom".to_string(), UniformValue::Float(2.0)),
            ("uCenter".to_string(), UniformValue::Vec2([-0.5, 0.0])),
            ("uRotation".to_string(), UniformValue::Vec3([0.0, 0.0, 0.0])),
            ("uJulia".to_string(), UniformValue::Bool(false)),
        ])
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("uZoom"), ("uZoom", None));
        assert_eq!(parse_key("uCenter.y"), ("uCenter", Some(1)));
        assert_eq!(parse_key("uColor.a"), ("uColor", Some(3)));
        assert_eq!(parse_key("u.name"), ("u.name", None));
    }

    #[test]
    fn test_offsets_apply_over_base() {
        let offsets = BTreeMap::from([
            ("uZoom".to_string(), 0.5),
            ("uCenter.x".to_string(), 0.25),
            ("uCenter.y".to_string(), -1.0),
            ("uMissing".to_string(), 1.0),
            ("uJulia".to_string(), 1.0),
        ]);
        let base = base();
        let out = apply_modulation(&base, &offsets);
        assert_eq!(out["uZoom"], UniformValue::Float(2.5));
        assert_eq!(out["uCenter"], UniformValue::Vec2([-0.25, -1.0]));
        assert_eq!(out["uJulia"], UniformValue::Bool(false));
        assert!(!out.contains_key("uMissing"));
        // Base is untouched.
        assert_eq!(base["uZoom"], UniformValue::Float(2.0));
    }

    #[test]
    fn test_rotation_identity_and_roll() {
        let identity = rotation_matrix([0.0, 0.0, 0.0]);
        let expected = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
        for (a, b) in identity.iter().zip(expected) {
            assert!((a - b).abs() < 1e-12);
        }

        // Roll of 90 degrees maps x to y.
        let roll = rotation_matrix([0.0, 0.0, 90.0]);
        assert!(roll[0].abs() < 1e-12);
        assert!((roll[1] - 1.0).abs() < 1e-12);
        assert!((roll[3] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rotation_is_orthonormal() {
        let m = rotation_matrix([30.0, -45.0, 12.5]);
        for i in 0..3 {
            for j in 0..3 {
                let dot: f64 = (0..3).map(|k| m[i * 3 + k] * m[j * 3 + k]).sum();
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((dot - expected).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_derive_adds_matrix() {
        let mut uniforms = base();
        uniforms.insert("uRotation".to_string(), UniformValue::Vec3([0.0, 90.0, 0.0]));
        derive_uniforms(&mut uniforms);
        let Some(UniformValue::Mat3(m)) = uniforms.get(ROTATION_MATRIX_UNIFORM) else {
            panic!("rotation matrix not derived");
        };
        // Yaw of 90 degrees maps z to x.
        assert!((m[6] - 1.0).abs() < 1e-12);
    }
}
