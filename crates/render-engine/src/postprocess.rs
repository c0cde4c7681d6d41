//! Conversion of accumulated float pixels to output images.
//!
//! Accumulated buffers are linear RGBA32F with rows bottom-up. Encoders and
//! PNG expect 8-bit RGBA top-down, so every output goes through
//! [`downsample`] (when supersampled), [`tone_map`], [`flip_vertical`] and,
//! for stills, [`force_opaque`].

use crate::device::PixelBuffer;

/// Quantize one channel to 8 bits. Values outside `[0, 1]` are clamped.
pub fn tone_map_channel(v: f32) -> u8 {
    if v.is_nan() {
        return 0;
    }
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Tone map a float buffer to 8-bit RGBA, keeping row order.
pub fn tone_map(buffer: &PixelBuffer) -> Vec<u8> {
    buffer.data().iter().map(|&v| tone_map_channel(v)).collect()
}

/// Box-filter resample to `width` x `height`. Each output pixel averages the
/// source area it covers, weighting partially covered source pixels.
pub fn downsample(buffer: &PixelBuffer, width: u32, height: u32) -> PixelBuffer {
    if buffer.width() == width && buffer.height() == height {
        return buffer.clone();
    }
    let mut out = PixelBuffer::new(width, height);
    if width == 0 || height == 0 || buffer.width() == 0 || buffer.height() == 0 {
        return out;
    }

    let scale_x = buffer.width() as f64 / width as f64;
    let scale_y = buffer.height() as f64 / height as f64;

    for oy in 0..height {
        let y0 = oy as f64 * scale_y;
        let y1 = y0 + scale_y;
        for ox in 0..width {
            let x0 = ox as f64 * scale_x;
            let x1 = x0 + scale_x;

            let mut acc = [0.0f64; 4];
            let mut total = 0.0f64;
            let mut sy = y0.floor() as u32;
            while (sy as f64) < y1 && sy < buffer.height() {
                let wy = (y1.min(sy as f64 + 1.0) - y0.max(sy as f64)).max(0.0);
                let mut sx = x0.floor() as u32;
                while (sx as f64) < x1 && sx < buffer.width() {
                    let wx = (x1.min(sx as f64 + 1.0) - x0.max(sx as f64)).max(0.0);
                    let w = wx * wy;
                    let px = buffer.pixel(sx, sy);
                    for (a, &c) in acc.iter_mut().zip(&px) {
                        *a += c as f64 * w;
                    }
                    total += w;
                    sx += 1;
                }
                sy += 1;
            }

            if total > 0.0 {
                out.set_pixel(ox, oy, acc.map(|a| (a / total) as f32));
            }
        }
    }
    out
}

/// Reverse row order of a tightly packed RGBA8 image in place.
pub fn flip_vertical(rgba: &mut [u8], width: u32, height: u32) {
    let row_len = width as usize * 4;
    let rows = height as usize;
    for row in 0..rows / 2 {
        let (top, bottom) = rgba.split_at_mut((rows - 1 - row) * row_len);
        top[row * row_len..(row + 1) * row_len].swap_with_slice(&mut bottom[..row_len]);
    }
}

/// Set every alpha byte to 255.
pub fn force_opaque(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        px[3] = 255;
    }
}

/// Downsample, tone map and flip to top-down RGBA8 at `width` x `height`.
pub fn to_rgba8_top_down(buffer: &PixelBuffer, width: u32, height: u32) -> Vec<u8> {
    let sized = downsample(buffer, width, height);
    let mut rgba = tone_map(&sized);
    flip_vertical(&mut rgba, width, height);
    rgba
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_map_clamps_and_rounds() {
        assert_eq!(tone_map_channel(-1.0), 0);
        assert_eq!(tone_map_channel(0.5), 128);
        assert_eq!(tone_map_channel(4.0), 255);
        assert_eq!(tone_map_channel(f32::NAN), 0);
    }

    #[test]
    fn test_downsample_averages_blocks() {
        let mut source = PixelBuffer::new(4, 2);
        source.set_pixel(0, 0, [1.0, 0.0, 0.0, 1.0]);
        source.set_pixel(1, 1, [1.0, 0.0, 0.0, 1.0]);
        let out = downsample(&source, 2, 1);
        assert_eq!(out.pixel(0, 0), [0.5, 0.0, 0.0, 0.5]);
        assert_eq!(out.pixel(1, 0), [0.0; 4]);
    }

    #[test]
    fn test_downsample_fractional_scale() {
        let source = PixelBuffer::filled(3, 3, [0.25, 0.5, 0.75, 1.0]);
        let out = downsample(&source, 2, 2);
        for px in out.data().chunks_exact(4) {
            assert!((px[0] - 0.25).abs() < 1e-6);
            assert!((px[3] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn test_flip_vertical_reverses_rows() {
        let mut rgba: Vec<u8> = (0..3).flat_map(|row| [row as u8; 8]).collect();
        flip_vertical(&mut rgba, 2, 3);
        assert_eq!(&rgba[0..8], &[2; 8]);
        assert_eq!(&rgba[8..16], &[1; 8]);
        assert_eq!(&rgba[16..24], &[0; 8]);
    }

    #[test]
    fn test_top_down_conversion() {
        let mut source = PixelBuffer::new(1, 2);
        source.set_pixel(0, 0, [1.0, 1.0, 1.0, 1.0]);
        let mut rgba = to_rgba8_top_down(&source, 1, 2);
        assert_eq!(rgba, vec![0, 0, 0, 0, 255, 255, 255, 255]);
        force_opaque(&mut rgba);
        assert_eq!(rgba[3], 255);
    }
}
