//! CPU render device.
//!
//! Renders a distance-estimated Mandelbrot set with smooth iteration
//! coloring. It honours the same uniforms a fragment shader would
//! (`uCenter`, `uZoom`, `uIterations`, `uRotationMatrix`, `uResolution`,
//! `uRegion`) and only shades pixels inside `uRegion`, the way a scissored
//! draw would. Used headless and as the device behind the CLI.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts::{LN_2, TAU};

use glam::{DMat3, DVec2};
use rayon::prelude::*;

use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_project_model::region::{NormalizedRect, PixelRect};
use fraktal_project_model::uniform::UniformValue;

use crate::device::{Jitter, PixelBuffer, RenderDevice, TargetId};

/// Escape radius. Large so the distance estimate is accurate.
const BAILOUT: f64 = 1.0e3;

/// Complex number used by the iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Complex {
    re: f64,
    im: f64,
}

impl Complex {
    fn new(re: f64, im: f64) -> Self {
        Self { re, im }
    }

    fn from_vec2(v: DVec2) -> Self {
        Self::new(v.x, v.y)
    }

    fn norm_sqr(self) -> f64 {
        self.re * self.re + self.im * self.im
    }

    fn norm(self) -> f64 {
        self.norm_sqr().sqrt()
    }

    fn add(self, other: Complex) -> Complex {
        Complex::new(self.re + other.re, self.im + other.im)
    }

    fn mul(self, other: Complex) -> Complex {
        Complex::new(
            self.re * other.re - self.im * other.im,
            self.re * other.im + self.im * other.re,
        )
    }

    fn sqr(self) -> Complex {
        Complex::new(
            self.re * self.re - self.im * self.im,
            2.0 * self.re * self.im,
        )
    }

    fn scale(self, s: f64) -> Complex {
        Complex::new(self.re * s, self.im * s)
    }
}

/// Escape-time result for one point.
#[derive(Debug, Clone, Copy)]
struct Escape {
    escaped: bool,
    smooth_iter: f64,
    distance: f64,
}

/// z' tracks dz/dc so the exterior distance is `2·|z|·ln|z| / |z'|`.
fn iterate_mandelbrot(c: Complex, max_iter: u32) -> Escape {
    let mut z = Complex::new(0.0, 0.0);
    let mut dz = Complex::new(0.0, 0.0);
    let mut iterations = 0u32;
    let bailout_sqr = BAILOUT * BAILOUT;

    while iterations < max_iter {
        if z.norm_sqr() > bailout_sqr {
            break;
        }
        dz = z.mul(dz).scale(2.0).add(Complex::new(1.0, 0.0));
        z = z.sqr().add(c);
        iterations += 1;
    }

    let escaped = iterations < max_iter || z.norm_sqr() > bailout_sqr;
    if !escaped {
        return Escape {
            escaped,
            smooth_iter: iterations as f64,
            distance: 0.0,
        };
    }

    let z_norm = z.norm();
    let dz_norm = dz.norm();
    let distance = if dz_norm > 0.0 {
        2.0 * z_norm * z_norm.ln() / dz_norm
    } else {
        0.0
    };
    Escape {
        escaped,
        smooth_iter: iterations as f64 + 1.0 - z_norm.ln().ln() / LN_2,
        distance,
    }
}

/// Cosine palette over `t` in `[0, 1)`.
fn palette(t: f64) -> [f64; 3] {
    let phase = [0.0, 0.33, 0.67];
    phase.map(|p| 0.5 + 0.5 * (TAU * (t + p)).cos())
}

/// Per-draw shading parameters, shared read-only across worker threads.
#[derive(Debug, Clone, Copy)]
struct Shading {
    resolution: DVec2,
    /// Device pixels per `uResolution` unit.
    pixel_scale: DVec2,
    center: DVec2,
    rotation: DMat3,
    zoom: f64,
    max_iter: u32,
    jitter: DVec2,
}

impl Shading {
    fn shade(&self, px: u32, py: u32) -> [f32; 4] {
        // Normalized device coordinates, y up.
        let pixel = DVec2::new(px as f64, py as f64) + 0.5 + self.jitter;
        let ndc = pixel / self.pixel_scale / self.resolution - 0.5;
        let aspect = self.resolution.x / self.resolution.y.max(1.0);
        let plane = ndc * DVec2::new(aspect, 1.0) * (2.0 / self.zoom);
        let c = Complex::from_vec2(self.center + self.rotation.transform_vector2(plane));

        let escape = iterate_mandelbrot(c, self.max_iter);
        if !escape.escaped {
            return [0.0, 0.0, 0.0, 1.0];
        }
        let rgb = palette((escape.smooth_iter / 64.0).fract());
        // Darken toward the boundary.
        let edge = (escape.distance * self.zoom * self.resolution.y * 0.5)
            .clamp(0.0, 1.0)
            .sqrt();
        [
            (rgb[0] * edge) as f32,
            (rgb[1] * edge) as f32,
            (rgb[2] * edge) as f32,
            1.0,
        ]
    }
}

#[derive(Debug)]
struct Target {
    width: u32,
    height: u32,
    pixels: PixelBuffer,
}

/// A [`RenderDevice`] that shades on the CPU.
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    targets: HashMap<u64, Target>,
    next_id: u64,
    uniforms: BTreeMap<String, UniformValue>,
    lost: bool,
    renders: u64,
    presented: Option<PixelBuffer>,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of targets currently allocated.
    pub fn live_targets(&self) -> usize {
        self.targets.len()
    }

    /// Total draws since creation.
    pub fn render_count(&self) -> u64 {
        self.renders
    }

    /// Drop every target, as a GPU reset would. Targets cannot be created
    /// again until [`SoftwareDevice::restore_context`].
    pub fn lose_context(&mut self) {
        tracing::warn!(targets = self.targets.len(), "Software device context lost");
        self.targets.clear();
        self.lost = true;
    }

    pub fn restore_context(&mut self) {
        self.lost = false;
    }

    /// Current value of a uniform.
    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    /// Last image handed to [`RenderDevice::present`].
    pub fn presented(&self) -> Option<&PixelBuffer> {
        self.presented.as_ref()
    }

    fn vec2(&self, name: &str) -> Option<[f64; 2]> {
        match self.uniforms.get(name) {
            Some(UniformValue::Vec2(v)) => Some(*v),
            _ => None,
        }
    }

    fn float(&self, name: &str) -> Option<f64> {
        self.uniforms.get(name).and_then(UniformValue::as_float)
    }

    /// Only the upper-left 2x2 is used when mapping the image plane.
    fn rotation(&self) -> DMat3 {
        match self.uniforms.get("uRotationMatrix") {
            Some(UniformValue::Mat3(m)) => DMat3::from_cols_array(m),
            _ => DMat3::IDENTITY,
        }
    }

    fn region(&self, width: u32, height: u32) -> PixelRect {
        match self.uniforms.get("uRegion") {
            Some(UniformValue::Vec4(r)) => {
                NormalizedRect::new(r[0], r[1], r[2], r[3]).to_pixels(width, height)
            }
            _ => PixelRect::full(width, height),
        }
    }
}

impl RenderDevice for SoftwareDevice {
    fn create_target(&mut self, width: u32, height: u32) -> FraktalResult<TargetId> {
        if self.lost {
            return Err(FraktalError::context_lost("create target"));
        }
        self.next_id += 1;
        let id = self.next_id;
        self.targets.insert(
            id,
            Target {
                width,
                height,
                pixels: PixelBuffer::new(width, height),
            },
        );
        Ok(TargetId(id))
    }

    fn dispose_target(&mut self, target: TargetId) {
        self.targets.remove(&target.0);
    }

    fn is_target_valid(&self, target: TargetId) -> bool {
        !self.lost && self.targets.contains_key(&target.0)
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.uniforms.insert(name.to_string(), value);
    }

    fn render(&mut self, target: TargetId, jitter: Jitter) -> FraktalResult<()> {
        let (width, height) = match self.targets.get(&target.0) {
            Some(t) => (t.width, t.height),
            None => return Err(FraktalError::context_lost("render")),
        };

        let [res_x, res_y] = self
            .vec2("uResolution")
            .unwrap_or([width as f64, height as f64]);
        let resolution = DVec2::new(res_x, res_y).max(DVec2::ONE);
        let center = self.vec2("uCenter").unwrap_or([-0.5, 0.0]);
        let shading = Shading {
            resolution,
            pixel_scale: DVec2::new(width as f64, height as f64) / resolution,
            center: DVec2::from_array(center),
            rotation: self.rotation(),
            zoom: self.float("uZoom").unwrap_or(1.0).max(f64::MIN_POSITIVE),
            max_iter: self.float("uIterations").unwrap_or(256.0).max(1.0) as u32,
            jitter: DVec2::new(jitter.x, jitter.y),
        };
        let region = self.region(width, height);

        let rows: Vec<Vec<[f32; 4]>> = (region.y..region.top())
            .into_par_iter()
            .map(|py| {
                (region.x..region.right())
                    .map(|px| shading.shade(px, py))
                    .collect()
            })
            .collect();

        let target = self
            .targets
            .get_mut(&target.0)
            .ok_or_else(|| FraktalError::context_lost("render"))?;
        for (py, row) in (region.y..).zip(rows) {
            for (px, rgba) in (region.x..).zip(row) {
                target.pixels.set_pixel(px, py, rgba);
            }
        }
        self.renders += 1;
        Ok(())
    }

    fn read_pixels(&mut self, target: TargetId, rect: PixelRect) -> FraktalResult<PixelBuffer> {
        let target = self
            .targets
            .get(&target.0)
            .filter(|_| !self.lost)
            .ok_or_else(|| FraktalError::context_lost("read pixels"))?;
        if rect.right() > target.width || rect.top() > target.height {
            return Err(FraktalError::render(format!(
                "readback rect {rect:?} exceeds {}x{} target",
                target.width, target.height
            )));
        }
        Ok(target.pixels.crop(rect))
    }

    fn present(&mut self, pixels: &PixelBuffer) -> FraktalResult<()> {
        self.presented = Some(pixels.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "software"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interior_point_does_not_escape() {
        let escape = iterate_mandelbrot(Complex::new(-0.1, 0.1), 200);
        assert!(!escape.escaped);
        assert_eq!(escape.distance, 0.0);
    }

    #[test]
    fn test_exterior_distance_is_positive() {
        let escape = iterate_mandelbrot(Complex::new(1.0, 1.0), 200);
        assert!(escape.escaped);
        assert!(escape.distance > 0.0);
        assert!(escape.smooth_iter.is_finite());
    }

    #[test]
    fn test_render_only_touches_region() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(8, 8).unwrap();
        device.set_uniform("uRegion", UniformValue::Vec4([0.0, 0.0, 0.5, 0.5]));
        device.render(target, Jitter::ZERO).unwrap();

        let inside = device.read_pixels(target, PixelRect::new(0, 0, 4, 4)).unwrap();
        assert!(inside.data().chunks_exact(4).all(|px| px[3] == 1.0));
        let outside = device.read_pixels(target, PixelRect::new(4, 4, 4, 4)).unwrap();
        assert!(outside.data().iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_context_loss_invalidates_targets() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(4, 4).unwrap();
        assert!(device.is_target_valid(target));

        device.lose_context();
        assert!(!device.is_target_valid(target));
        assert!(device.render(target, Jitter::ZERO).unwrap_err().is_context_lost());
        assert!(device.create_target(4, 4).unwrap_err().is_context_lost());

        device.restore_context();
        assert!(device.create_target(4, 4).is_ok());
    }

    #[test]
    fn test_half_turn_mirrors_the_view() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(8, 8).unwrap();
        device.set_uniform("uCenter", UniformValue::Vec2([0.0, 0.0]));
        device.render(target, Jitter::ZERO).unwrap();
        let upright = device.read_pixels(target, PixelRect::full(8, 8)).unwrap();

        let half_turn = [-1.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, 0.0, 1.0];
        device.set_uniform("uRotationMatrix", UniformValue::Mat3(half_turn));
        device.render(target, Jitter::ZERO).unwrap();
        let rotated = device.read_pixels(target, PixelRect::full(8, 8)).unwrap();

        for y in 0..8 {
            for x in 0..8 {
                assert_eq!(upright.pixel(x, y), rotated.pixel(7 - x, 7 - y));
            }
        }
    }

    #[test]
    fn test_jitter_changes_edge_pixels() {
        let mut device = SoftwareDevice::new();
        let target = device.create_target(16, 16).unwrap();
        device.set_uniform("uZoom", UniformValue::Float(1.5));
        device.render(target, Jitter::ZERO).unwrap();
        let a = device.read_pixels(target, PixelRect::full(16, 16)).unwrap();
        device.render(target, Jitter::new(0.37, -0.21)).unwrap();
        let b = device.read_pixels(target, PixelRect::full(16, 16)).unwrap();
        assert_ne!(a, b);
        assert_eq!(device.render_count(), 2);
    }
}
