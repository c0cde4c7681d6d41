//! Typed shader uniform values.

use serde::{Deserialize, Serialize};

/// Value of a single shader uniform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UniformValue {
    Float(f64),
    Int(i64),
    Bool(bool),
    Vec2([f64; 2]),
    Vec3([f64; 3]),
    Vec4([f64; 4]),
    /// Column-major 3x3 matrix.
    Mat3([f64; 9]),
}

impl UniformValue {
    /// Scalar value, if this is a float or int uniform.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Vector components, if this is a vector uniform.
    pub fn components(&self) -> Option<&[f64]> {
        match self {
            Self::Vec2(v) => Some(v),
            Self::Vec3(v) => Some(v),
            Self::Vec4(v) => Some(v),
            _ => None,
        }
    }

    /// Add `delta` to the whole value (`component == None`) or to one vector
    /// component. Returns `None` when the offset does not apply to this type.
    pub fn offset_by(&self, component: Option<usize>, delta: f64) -> Option<UniformValue> {
        match (self, component) {
            (Self::Float(v), None) => Some(Self::Float(v + delta)),
            (Self::Int(v), None) => Some(Self::Float(*v as f64 + delta)),
            (Self::Vec2(v), Some(i)) if i < 2 => {
                let mut out = *v;
                out[i] += delta;
                Some(Self::Vec2(out))
            }
            (Self::Vec3(v), Some(i)) if i < 3 => {
                let mut out = *v;
                out[i] += delta;
                Some(Self::Vec3(out))
            }
            (Self::Vec4(v), Some(i)) if i < 4 => {
                let mut out = *v;
                out[i] += delta;
                Some(Self::Vec4(out))
            }
            (Self::Vec2(v), None) => Some(Self::Vec2(v.map(|c| c + delta))),
            (Self::Vec3(v), None) => Some(Self::Vec3(v.map(|c| c + delta))),
            (Self::Vec4(v), None) => Some(Self::Vec4(v.map(|c| c + delta))),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_scalar() {
        let value = UniformValue::Float(1.5).offset_by(None, 0.25).unwrap();
        assert_eq!(value, UniformValue::Float(1.75));
    }

    #[test]
    fn test_offset_vector_component() {
        let value = UniformValue::Vec3([1.0, 2.0, 3.0])
            .offset_by(Some(1), -0.5)
            .unwrap();
        assert_eq!(value, UniformValue::Vec3([1.0, 1.5, 3.0]));
        assert!(UniformValue::Vec2([0.0, 0.0]).offset_by(Some(2), 1.0).is_none());
    }

    #[test]
    fn test_offset_rejects_bool_and_matrix() {
        assert!(UniformValue::Bool(true).offset_by(None, 1.0).is_none());
        assert!(UniformValue::Mat3([0.0; 9]).offset_by(None, 1.0).is_none());
    }

    #[test]
    fn test_serialization_is_tagged() {
        let json = serde_json::to_string(&UniformValue::Vec2([0.5, -1.0])).unwrap();
        assert_eq!(json, r#"{"vec2":[0.5,-1.0]}"#);
        let parsed: UniformValue = serde_json::from_str(r#"{"int":7}"#).unwrap();
        assert_eq!(parsed, UniformValue::Int(7));
    }
}
