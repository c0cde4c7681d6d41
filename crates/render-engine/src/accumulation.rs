//! Progressive accumulation of jittered samples into a running mean.
//!
//! Two equally sized buffers alternate roles: the current one holds the
//! mean of every sample so far, the other receives the next blend. After
//! `n` samples the current buffer is the arithmetic mean of the `n`
//! per-sample renders, and the previous buffer holds the mean of the first
//! `n - 1`, which is what convergence is measured against.

use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_project_model::region::PixelRect;
use fraktal_project_model::uniform::UniformValue;

use crate::device::{PixelBuffer, RenderDevice, TargetId};
use crate::halton::jitter_for_sample;

/// Uniform carrying the monotonically increasing sample counter.
pub const FRAME_COUNTER_UNIFORM: &str = "uFrameCounter";

/// Running-mean accumulator bound to one device render target.
#[derive(Debug)]
pub struct AccumulationRenderer {
    width: u32,
    height: u32,
    target: Option<TargetId>,
    buffers: [PixelBuffer; 2],
    current: usize,
    samples: u32,
    frame_counter: u64,
    active_region: PixelRect,
}

impl AccumulationRenderer {
    /// Create an accumulator with no device target yet. Call
    /// [`AccumulationRenderer::resize`] before sampling.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            target: None,
            buffers: [PixelBuffer::new(width, height), PixelBuffer::new(width, height)],
            current: 0,
            samples: 0,
            frame_counter: 0,
            active_region: PixelRect::full(width, height),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Samples blended since the last reset.
    pub fn samples(&self) -> u32 {
        self.samples
    }

    /// Total samples ever rendered by this accumulator.
    pub fn frame_counter(&self) -> u64 {
        self.frame_counter
    }

    pub fn target(&self) -> Option<TargetId> {
        self.target
    }

    pub fn active_region(&self) -> PixelRect {
        self.active_region
    }

    /// Ensure a device target of `width` x `height` exists. The target is
    /// only reallocated when the size actually changes; resizing clears the
    /// accumulation and the active region.
    pub fn resize(
        &mut self,
        device: &mut dyn RenderDevice,
        width: u32,
        height: u32,
    ) -> FraktalResult<()> {
        if width == 0 || height == 0 {
            return Err(FraktalError::render(format!(
                "cannot accumulate into a {width}x{height} target"
            )));
        }

        let same_size = width == self.width && height == self.height;
        if let Some(target) = self.target {
            if same_size && device.is_target_valid(target) {
                return Ok(());
            }
            device.dispose_target(target);
            self.target = None;
        }

        self.target = Some(device.create_target(width, height)?);
        if !same_size {
            self.width = width;
            self.height = height;
            self.buffers = [PixelBuffer::new(width, height), PixelBuffer::new(width, height)];
        }
        self.active_region = PixelRect::full(width, height);
        self.reset();

        tracing::debug!(
            width,
            height,
            device = device.name(),
            "Accumulation target allocated"
        );
        Ok(())
    }

    /// Zero both buffers and the sample count. The frame counter keeps
    /// running.
    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.data_mut().fill(0.0);
        }
        self.current = 0;
        self.samples = 0;
    }

    /// Restrict sampling to `region`, clipped to the target.
    pub fn set_active_region(&mut self, region: PixelRect) {
        self.active_region = region.clipped_to(self.width, self.height);
    }

    /// Render one jittered sample and blend it into the running mean with
    /// weight `1 / (sample_index + 1)`.
    pub fn accumulate_sample(
        &mut self,
        device: &mut dyn RenderDevice,
        sample_index: u32,
    ) -> FraktalResult<()> {
        let target = match self.target {
            Some(target) if device.is_target_valid(target) => target,
            _ => return Err(FraktalError::context_lost("accumulate sample")),
        };

        device.set_uniform(
            FRAME_COUNTER_UNIFORM,
            UniformValue::Int(self.frame_counter as i64),
        );
        self.frame_counter += 1;

        device.render(target, jitter_for_sample(sample_index))?;
        let region = self.active_region;
        let sample = device.read_pixels(target, region)?;
        if sample.width() != region.width || sample.height() != region.height {
            return Err(FraktalError::render(format!(
                "readback returned {}x{} for a {}x{} region",
                sample.width(),
                sample.height(),
                region.width,
                region.height
            )));
        }

        let weight = 1.0 / (sample_index as f32 + 1.0);
        let (first, second) = self.buffers.split_at_mut(1);
        let (prev, next) = if self.current == 0 {
            (&first[0], &mut second[0])
        } else {
            (&second[0], &mut first[0])
        };

        next.data_mut().copy_from_slice(prev.data());
        let stride = self.width as usize * 4;
        let row_len = region.width as usize * 4;
        for row in 0..region.height as usize {
            let base = (region.y as usize + row) * stride + region.x as usize * 4;
            let src = &sample.data()[row * row_len..(row + 1) * row_len];
            let old = &prev.data()[base..base + row_len];
            let out = &mut next.data_mut()[base..base + row_len];
            for ((o, &p), &v) in out.iter_mut().zip(old).zip(src) {
                *o = p + (v - p) * weight;
            }
        }

        self.current = 1 - self.current;
        self.samples += 1;
        Ok(())
    }

    /// Largest per-channel change between the last two accumulated states
    /// inside `region`, as a fraction of full range.
    pub fn measure_convergence(&self, region: PixelRect) -> f32 {
        let region = region.clipped_to(self.width, self.height);
        let current = self.buffers[self.current].data();
        let previous = self.buffers[1 - self.current].data();
        let stride = self.width as usize * 4;
        let row_len = region.width as usize * 4;

        let mut max_delta = 0.0f32;
        for row in 0..region.height as usize {
            let base = (region.y as usize + row) * stride + region.x as usize * 4;
            for (a, b) in current[base..base + row_len]
                .iter()
                .zip(&previous[base..base + row_len])
            {
                max_delta = max_delta.max((a - b).abs());
            }
        }
        max_delta
    }

    /// The accumulated image.
    pub fn image(&self) -> &PixelBuffer {
        &self.buffers[self.current]
    }

    /// Copy of the accumulated pixels inside `region`.
    pub fn region_pixels(&self, region: PixelRect) -> PixelBuffer {
        self.image().crop(region)
    }

    /// Dispose the device target.
    pub fn release(&mut self, device: &mut dyn RenderDevice) {
        if let Some(target) = self.target.take() {
            device.dispose_target(target);
            tracing::debug!(device = device.name(), "Accumulation target released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::SoftwareDevice;

    /// Device that returns a fixed sequence of flat colors, one per render.
    struct SequenceDevice {
        values: Vec<f32>,
        next: usize,
        valid: bool,
        counters: Vec<i64>,
    }

    impl SequenceDevice {
        fn new(values: Vec<f32>) -> Self {
            Self {
                values,
                next: 0,
                valid: true,
                counters: Vec::new(),
            }
        }
    }

    impl RenderDevice for SequenceDevice {
        fn create_target(&mut self, _width: u32, _height: u32) -> FraktalResult<TargetId> {
            Ok(TargetId(1))
        }

        fn dispose_target(&mut self, _target: TargetId) {}

        fn is_target_valid(&self, _target: TargetId) -> bool {
            self.valid
        }

        fn set_uniform(&mut self, name: &str, value: UniformValue) {
            if let (FRAME_COUNTER_UNIFORM, UniformValue::Int(v)) = (name, value) {
                self.counters.push(v);
            }
        }

        fn render(&mut self, _target: TargetId, _jitter: crate::Jitter) -> FraktalResult<()> {
            self.next += 1;
            Ok(())
        }

        fn read_pixels(&mut self, _target: TargetId, rect: PixelRect) -> FraktalResult<PixelBuffer> {
            let v = self.values[(self.next - 1) % self.values.len()];
            Ok(PixelBuffer::filled(rect.width, rect.height, [v, v, v, 1.0]))
        }

        fn present(&mut self, _pixels: &PixelBuffer) -> FraktalResult<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            "sequence"
        }
    }

    #[test]
    fn test_mean_of_samples() {
        let mut device = SequenceDevice::new(vec![0.2, 0.4, 0.9]);
        let mut acc = AccumulationRenderer::new(4, 4);
        acc.resize(&mut device, 4, 4).unwrap();
        for i in 0..3 {
            acc.accumulate_sample(&mut device, i).unwrap();
        }
        let px = acc.image().pixel(2, 2);
        assert!((px[0] - 0.5).abs() < 1e-6);
        assert_eq!(acc.samples(), 3);
    }

    #[test]
    fn test_convergence_is_last_change() {
        let mut device = SequenceDevice::new(vec![0.5, 0.7]);
        let mut acc = AccumulationRenderer::new(2, 2);
        acc.resize(&mut device, 2, 2).unwrap();
        acc.accumulate_sample(&mut device, 0).unwrap();
        assert!((acc.measure_convergence(PixelRect::full(2, 2)) - 1.0).abs() < 1e-6);
        acc.accumulate_sample(&mut device, 1).unwrap();
        // 0.5 -> 0.6
        assert!((acc.measure_convergence(PixelRect::full(2, 2)) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_pixels_outside_region_carry_over() {
        let mut device = SequenceDevice::new(vec![1.0, 0.0]);
        let mut acc = AccumulationRenderer::new(4, 4);
        acc.resize(&mut device, 4, 4).unwrap();
        acc.accumulate_sample(&mut device, 0).unwrap();

        acc.set_active_region(PixelRect::new(0, 0, 2, 2));
        acc.accumulate_sample(&mut device, 1).unwrap();
        assert!((acc.image().pixel(0, 0)[0] - 0.5).abs() < 1e-6);
        assert_eq!(acc.image().pixel(3, 3)[0], 1.0);
        assert_eq!(acc.measure_convergence(PixelRect::new(2, 2, 2, 2)), 0.0);
    }

    #[test]
    fn test_frame_counter_survives_reset() {
        let mut device = SequenceDevice::new(vec![0.5]);
        let mut acc = AccumulationRenderer::new(2, 2);
        acc.resize(&mut device, 2, 2).unwrap();
        acc.accumulate_sample(&mut device, 0).unwrap();
        acc.accumulate_sample(&mut device, 1).unwrap();
        acc.reset();
        acc.accumulate_sample(&mut device, 0).unwrap();
        assert_eq!(device.counters, vec![0, 1, 2]);
        assert_eq!(acc.samples(), 1);
        assert_eq!(acc.frame_counter(), 3);
    }

    #[test]
    fn test_invalid_target_is_context_lost() {
        let mut device = SequenceDevice::new(vec![0.5]);
        let mut acc = AccumulationRenderer::new(2, 2);
        let err = acc.accumulate_sample(&mut device, 0).unwrap_err();
        assert!(err.is_context_lost());

        acc.resize(&mut device, 2, 2).unwrap();
        device.valid = false;
        let err = acc.accumulate_sample(&mut device, 0).unwrap_err();
        assert!(err.is_context_lost());
    }

    #[test]
    fn test_resize_reallocates_only_on_change() {
        let mut device = SoftwareDevice::new();
        let mut acc = AccumulationRenderer::new(8, 8);
        acc.resize(&mut device, 8, 8).unwrap();
        let first = acc.target();
        acc.resize(&mut device, 8, 8).unwrap();
        assert_eq!(acc.target(), first);
        assert_eq!(device.live_targets(), 1);

        acc.resize(&mut device, 16, 8).unwrap();
        assert_ne!(acc.target(), first);
        assert_eq!(device.live_targets(), 1);
        assert_eq!(acc.image().width(), 16);

        acc.release(&mut device);
        assert_eq!(device.live_targets(), 0);
    }

    proptest::proptest! {
        #[test]
        fn prop_running_mean_matches_arithmetic_mean(
            values in proptest::collection::vec(0.0f32..1.0, 1..24)
        ) {
            let mut device = SequenceDevice::new(values.clone());
            let mut acc = AccumulationRenderer::new(2, 2);
            acc.resize(&mut device, 2, 2).unwrap();
            for i in 0..values.len() as u32 {
                acc.accumulate_sample(&mut device, i).unwrap();
            }
            let mean = values.iter().sum::<f32>() / values.len() as f32;
            let px = acc.image().pixel(1, 0);
            proptest::prop_assert!((px[0] - mean).abs() < 1e-4);
            proptest::prop_assert!((px[3] - 1.0).abs() < 1e-6);
        }
    }
}
