//! The render device seam.
//!
//! Everything the accumulation pipeline needs from a GPU is behind
//! [`RenderDevice`]: render targets, uniforms, one jittered draw, and a
//! pixel readback. The formula compiler and the real graphics API live on the
//! other side of this trait.

use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_project_model::region::PixelRect;
use fraktal_project_model::uniform::UniformValue;

/// Handle to a render target owned by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Sub-pixel offset applied to one sample, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Jitter {
    pub x: f64,
    pub y: f64,
}

impl Jitter {
    pub const ZERO: Jitter = Jitter { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Linear RGBA32F pixels, rows stored bottom-up like a GPU readback.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl PixelBuffer {
    /// Zero-filled buffer.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0.0; width as usize * height as usize * 4],
        }
    }

    /// Wrap existing RGBA data. Fails if the length does not match.
    pub fn from_rgba(width: u32, height: u32, data: Vec<f32>) -> FraktalResult<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(FraktalError::render(format!(
                "pixel buffer length {} does not match {}x{} RGBA ({expected})",
                data.len(),
                width,
                height
            )));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    /// Buffer where every pixel has the same value.
    pub fn filled(width: u32, height: u32, rgba: [f32; 4]) -> Self {
        let mut buffer = Self::new(width, height);
        for px in buffer.data.chunks_exact_mut(4) {
            px.copy_from_slice(&rgba);
        }
        buffer
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn into_data(self) -> Vec<f32> {
        self.data
    }

    fn offset(&self, x: u32, y: u32) -> usize {
        (y as usize * self.width as usize + x as usize) * 4
    }

    /// RGBA at `(x, y)`, `y` counted from the bottom row.
    pub fn pixel(&self, x: u32, y: u32) -> [f32; 4] {
        let i = self.offset(x, y);
        [
            self.data[i],
            self.data[i + 1],
            self.data[i + 2],
            self.data[i + 3],
        ]
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [f32; 4]) {
        let i = self.offset(x, y);
        self.data[i..i + 4].copy_from_slice(&rgba);
    }

    /// Full-surface rect.
    pub fn bounds(&self) -> PixelRect {
        PixelRect::full(self.width, self.height)
    }

    /// Copy the pixels of `rect` out of this buffer.
    pub fn crop(&self, rect: PixelRect) -> PixelBuffer {
        let rect = rect.clipped_to(self.width, self.height);
        let mut out = PixelBuffer::new(rect.width, rect.height);
        let row_len = rect.width as usize * 4;
        for row in 0..rect.height {
            let src = self.offset(rect.x, rect.y + row);
            let dst = out.offset(0, row);
            out.data[dst..dst + row_len].copy_from_slice(&self.data[src..src + row_len]);
        }
        out
    }

    /// Write `tile` into this buffer with its bottom-left corner at
    /// `(x, y)`. Only the overlapping pixels are touched.
    pub fn blit(&mut self, tile: &PixelBuffer, x: u32, y: u32) {
        let rect = PixelRect::new(x, y, tile.width, tile.height).clipped_to(self.width, self.height);
        let row_len = rect.width as usize * 4;
        for row in 0..rect.height {
            let src = tile.offset(0, row);
            let dst = self.offset(rect.x, rect.y + row);
            self.data[dst..dst + row_len].copy_from_slice(&tile.data[src..src + row_len]);
        }
    }
}

/// A GPU (or GPU stand-in) the accumulation pipeline renders through.
///
/// Render targets may disappear underneath the caller (context loss); a
/// target for which [`RenderDevice::is_target_valid`] returns `false` must
/// not be rendered to again.
pub trait RenderDevice: Send {
    /// Allocate a float render target.
    fn create_target(&mut self, width: u32, height: u32) -> FraktalResult<TargetId>;

    /// Release a target. Unknown ids are ignored.
    fn dispose_target(&mut self, target: TargetId);

    /// Whether the target still exists and can be drawn to.
    fn is_target_valid(&self, target: TargetId) -> bool;

    /// Set a named uniform for subsequent draws.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    /// Draw one sample into `target` with the given sub-pixel jitter.
    fn render(&mut self, target: TargetId, jitter: Jitter) -> FraktalResult<()>;

    /// Read back `rect` of `target` as RGBA32F, bottom row first.
    fn read_pixels(&mut self, target: TargetId, rect: PixelRect) -> FraktalResult<PixelBuffer>;

    /// Show pixels on the display surface.
    fn present(&mut self, pixels: &PixelBuffer) -> FraktalResult<()>;

    /// Device name for logs.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_length() {
        assert!(PixelBuffer::from_rgba(2, 2, vec![0.0; 16]).is_ok());
        assert!(PixelBuffer::from_rgba(2, 2, vec![0.0; 15]).is_err());
    }

    #[test]
    fn test_crop_and_blit_touch_only_the_rect() {
        let mut source = PixelBuffer::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                source.set_pixel(x, y, [x as f32, y as f32, 0.0, 1.0]);
            }
        }
        let tile = source.crop(PixelRect::new(1, 2, 2, 2));
        assert_eq!(tile.width(), 2);
        assert_eq!(tile.pixel(0, 0), [1.0, 2.0, 0.0, 1.0]);
        assert_eq!(tile.pixel(1, 1), [2.0, 3.0, 0.0, 1.0]);

        let mut composite = PixelBuffer::filled(4, 4, [9.0; 4]);
        composite.blit(&tile, 1, 2);
        assert_eq!(composite.pixel(1, 2), [1.0, 2.0, 0.0, 1.0]);
        assert_eq!(composite.pixel(0, 2), [9.0; 4]);
        assert_eq!(composite.pixel(1, 1), [9.0; 4]);
    }

    #[test]
    fn test_blit_clips_at_edges() {
        let mut composite = PixelBuffer::new(3, 3);
        let tile = PixelBuffer::filled(2, 2, [1.0; 4]);
        composite.blit(&tile, 2, 2);
        assert_eq!(composite.pixel(2, 2), [1.0; 4]);
        assert_eq!(composite.pixel(1, 1), [0.0; 4]);
    }
}
