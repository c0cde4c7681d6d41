//! Low-discrepancy sub-pixel jitter.

use crate::device::Jitter;

/// Length of the jitter cycle. Sample `n` and `n + JITTER_PERIOD` share an offset.
pub const JITTER_PERIOD: u32 = 16;

/// Radical inverse of `index` in `base`, in `[0, 1)`.
pub fn halton(mut index: u32, base: u32) -> f64 {
    let mut fraction = 1.0;
    let mut result = 0.0;
    let base_f = base as f64;
    while index > 0 {
        fraction /= base_f;
        result += fraction * (index % base) as f64;
        index /= base;
    }
    result
}

/// Jitter for the given sample index, from the Halton(2, 3) sequence
/// centered on the pixel. Sample 0 is never jittered so a single-sample
/// render lands on pixel centers.
pub fn jitter_for_sample(sample_index: u32) -> Jitter {
    let i = sample_index % JITTER_PERIOD;
    if i == 0 {
        return Jitter::ZERO;
    }
    Jitter::new(halton(i, 2) - 0.5, halton(i, 3) - 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_halton_base_two() {
        assert_eq!(halton(0, 2), 0.0);
        assert_eq!(halton(1, 2), 0.5);
        assert_eq!(halton(2, 2), 0.25);
        assert_eq!(halton(3, 2), 0.75);
    }

    #[test]
    fn test_halton_base_three() {
        assert!((halton(1, 3) - 1.0 / 3.0).abs() < 1e-12);
        assert!((halton(2, 3) - 2.0 / 3.0).abs() < 1e-12);
        assert!((halton(4, 3) - 4.0 / 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_first_sample_is_centered() {
        assert_eq!(jitter_for_sample(0), Jitter::ZERO);
        assert_eq!(jitter_for_sample(16), Jitter::ZERO);
        assert_eq!(jitter_for_sample(5), jitter_for_sample(21));
    }

    #[test]
    fn test_jitter_stays_inside_pixel() {
        for i in 0..64 {
            let j = jitter_for_sample(i);
            assert!((-0.5..0.5).contains(&j.x));
            assert!((-0.5..0.5).contains(&j.y));
        }
    }
}
