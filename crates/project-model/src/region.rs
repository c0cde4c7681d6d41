//! Pixel and normalized rectangle types for tiles and active regions.
//!
//! Pixel rectangles are half-open: a rect covers columns `x..x + width`
//! and rows `y..y + height`.

use serde::{Deserialize, Serialize};

/// A rectangle in device pixels (bottom-left origin).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    /// Left column.
    pub x: u32,
    /// Bottom row.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rect covering a whole surface.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    /// One past the right-most column.
    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    /// One past the top-most row.
    pub fn top(&self) -> u32 {
        self.y + self.height
    }

    /// Number of pixels covered.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Check if a pixel is inside this rect.
    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.top()
    }

    /// Whether two rects share at least one pixel.
    pub fn intersects(&self, other: &PixelRect) -> bool {
        self.x < other.right()
            && other.x < self.right()
            && self.y < other.top()
            && other.y < self.top()
    }

    /// Clip this rect to a `width` x `height` surface.
    pub fn clipped_to(&self, width: u32, height: u32) -> PixelRect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        PixelRect {
            x,
            y,
            width: self.right().min(width) - x,
            height: self.top().min(height) - y,
        }
    }
}

/// A rectangle normalized to `[0.0, 1.0]` of a full target.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRect {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl NormalizedRect {
    /// The whole target.
    pub const FULL: NormalizedRect = NormalizedRect {
        min_x: 0.0,
        min_y: 0.0,
        max_x: 1.0,
        max_y: 1.0,
    };

    /// Create a new rect, clamping values to valid range.
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        let min_x = min_x.clamp(0.0, 1.0);
        let min_y = min_y.clamp(0.0, 1.0);
        Self {
            min_x,
            min_y,
            max_x: max_x.clamp(min_x, 1.0),
            max_y: max_y.clamp(min_y, 1.0),
        }
    }

    /// Normalize a pixel rect against a `width` x `height` target.
    pub fn from_pixels(rect: &PixelRect, width: u32, height: u32) -> Self {
        let w = width.max(1) as f64;
        let h = height.max(1) as f64;
        Self::new(
            rect.x as f64 / w,
            rect.y as f64 / h,
            rect.right() as f64 / w,
            rect.top() as f64 / h,
        )
    }

    /// Map back to pixels of a `width` x `height` target.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let x0 = (self.min_x * width as f64).round() as u32;
        let y0 = (self.min_y * height as f64).round() as u32;
        let x1 = (self.max_x * width as f64).round() as u32;
        let y1 = (self.max_y * height as f64).round() as u32;
        PixelRect::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// Check if a normalized point is within this rect.
    pub fn contains(&self, px: f64, py: f64) -> bool {
        px >= self.min_x && px <= self.max_x && py >= self.min_y && py <= self.max_y
    }

    /// Packed `[min_x, min_y, max_x, max_y]` for a vec4 uniform.
    pub fn as_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }
}

impl Default for NormalizedRect {
    fn default() -> Self {
        Self::FULL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_rect_contains_is_half_open() {
        let rect = PixelRect::new(10, 20, 5, 5);
        assert!(rect.contains(10, 20));
        assert!(rect.contains(14, 24));
        assert!(!rect.contains(15, 24));
        assert!(!rect.contains(14, 25));
    }

    #[test]
    fn test_adjacent_rects_do_not_intersect() {
        let a = PixelRect::new(0, 0, 400, 400);
        let b = PixelRect::new(400, 0, 400, 400);
        assert!(!a.intersects(&b));
        assert!(a.intersects(&PixelRect::new(399, 399, 10, 10)));
    }

    #[test]
    fn test_clipped_to_surface() {
        let rect = PixelRect::new(800, 800, 400, 400).clipped_to(1000, 1000);
        assert_eq!(rect, PixelRect::new(800, 800, 200, 200));
    }

    #[test]
    fn test_normalized_round_trip() {
        let rect = PixelRect::new(400, 800, 400, 200);
        let normalized = NormalizedRect::from_pixels(&rect, 1000, 1000);
        assert!((normalized.min_x - 0.4).abs() < 1e-12);
        assert!((normalized.max_y - 1.0).abs() < 1e-12);
        assert_eq!(normalized.to_pixels(1000, 1000), rect);
    }

    #[test]
    fn test_normalized_new_clamps() {
        let rect = NormalizedRect::new(-0.5, 0.2, 2.0, 0.1);
        assert_eq!(rect.min_x, 0.0);
        assert_eq!(rect.max_x, 1.0);
        assert_eq!(rect.max_y, 0.2);
        assert_eq!(rect.height(), 0.0);
    }

    proptest::proptest! {
        #[test]
        fn prop_clipped_rect_stays_inside_surface(
            x in 0u32..2000,
            y in 0u32..2000,
            w in 0u32..2000,
            h in 0u32..2000,
            sw in 1u32..1500,
            sh in 1u32..1500,
        ) {
            let clipped = PixelRect::new(x, y, w, h).clipped_to(sw, sh);
            proptest::prop_assert!(clipped.right() <= sw);
            proptest::prop_assert!(clipped.top() <= sh);
            proptest::prop_assert!(clipped.area() <= PixelRect::new(x, y, w, h).area());
        }
    }
}
