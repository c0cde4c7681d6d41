//! Adaptive sampling policy for tiled renders.

use serde::{Deserialize, Serialize};

use crate::export::ModelError;

/// Sample budget and convergence threshold for one tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    /// Samples always taken before convergence is considered.
    pub min_samples: u32,

    /// Samples after which a tile stops even if it has not converged.
    pub max_samples: u32,

    /// Convergence threshold as a percentage of full dynamic range
    /// (`0.1` means a max per-channel change of 0.001).
    pub convergence_threshold_percent: f32,

    /// Absolute cap on samples per tile, bounding worst-case time.
    pub safety_cap: u32,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_samples: 4,
            max_samples: 256,
            convergence_threshold_percent: 0.1,
            safety_cap: 1024,
        }
    }
}

impl QualityPolicy {
    /// Threshold as a fraction of full range.
    pub fn threshold_fraction(&self) -> f32 {
        self.convergence_threshold_percent / 100.0
    }

    /// Whether another sample should be taken for a tile that has `samples`
    /// accumulated and whose last convergence measurement was `convergence`.
    pub fn should_continue(&self, samples: u32, convergence: f32) -> bool {
        if samples >= self.safety_cap {
            return false;
        }
        if samples < self.min_samples {
            return true;
        }
        convergence > self.threshold_fraction() && samples < self.max_samples
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.min_samples == 0 {
            return Err(ModelError::invalid("min samples must be at least 1"));
        }
        if self.max_samples < self.min_samples {
            return Err(ModelError::invalid(format!(
                "max samples ({}) is below min samples ({})",
                self.max_samples, self.min_samples
            )));
        }
        if self.safety_cap == 0 {
            return Err(ModelError::invalid("safety cap must be at least 1"));
        }
        if !(self.convergence_threshold_percent.is_finite()
            && self.convergence_threshold_percent >= 0.0)
        {
            return Err(ModelError::invalid(
                "convergence threshold must be a non-negative percentage",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_floor_wins_over_convergence() {
        let policy = QualityPolicy {
            min_samples: 4,
            ..Default::default()
        };
        assert!(policy.should_continue(1, 0.0));
        assert!(policy.should_continue(3, 0.0));
        assert!(!policy.should_continue(4, 0.0));
    }

    #[test]
    fn test_ceiling_stops_unconverged_tile() {
        let policy = QualityPolicy {
            min_samples: 1,
            max_samples: 8,
            convergence_threshold_percent: 0.1,
            safety_cap: 100,
        };
        assert!(policy.should_continue(7, 0.5));
        assert!(!policy.should_continue(8, 0.5));
    }

    #[test]
    fn test_safety_cap_bounds_floor() {
        let policy = QualityPolicy {
            min_samples: 50,
            max_samples: 60,
            convergence_threshold_percent: 0.1,
            safety_cap: 10,
        };
        assert!(!policy.should_continue(10, 1.0));
    }

    #[test]
    fn test_threshold_fraction() {
        let policy = QualityPolicy::default();
        assert!((policy.threshold_fraction() - 0.001).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_inverted_bounds() {
        let policy = QualityPolicy {
            min_samples: 10,
            max_samples: 2,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }
}
