//! Tiled still rendering with adaptive per-tile sampling.
//!
//! The target is split into buckets that exactly cover it. Buckets are
//! rendered strictly one at a time: each gets its own accumulation run that
//! stops once the tile converges (or hits its sample ceiling), then its
//! pixels are copied into the composite and the next bucket starts.

use std::path::PathBuf;

use serde::Serialize;

use fraktal_common::clock::RenderClock;
use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_project_model::quality::QualityPolicy;
use fraktal_project_model::region::{NormalizedRect, PixelRect};
use fraktal_project_model::scene::SceneDescription;
use fraktal_project_model::uniform::UniformValue;

use crate::accumulation::AccumulationRenderer;
use crate::device::{PixelBuffer, RenderDevice};
use crate::png_meta::{embed_scene_description, encode_png};
use crate::postprocess::{flip_vertical, force_opaque, tone_map};

/// Uniform carrying the active tile as normalized `[min_x, min_y, max_x, max_y]`.
pub const REGION_UNIFORM: &str = "uRegion";

/// Uniform carrying the full target size in pixels.
pub const RESOLUTION_UNIFORM: &str = "uResolution";

/// One tile of a bucket render.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Bucket {
    /// Row-major position.
    pub index: usize,
    /// Device pixels, bottom-left origin.
    pub rect: PixelRect,
    /// Same rect normalized to the target.
    pub normalized: NormalizedRect,
    /// Samples accumulated for this tile.
    pub samples: u32,
}

/// Split a `width` x `height` target into `tile_size` squares, row-major
/// from the bottom-left. The last row and column are clipped to the target.
pub fn partition(width: u32, height: u32, tile_size: u32) -> Vec<Bucket> {
    if width == 0 || height == 0 || tile_size == 0 {
        return Vec::new();
    }
    let cols = width.div_ceil(tile_size);
    let rows = height.div_ceil(tile_size);
    let mut buckets = Vec::with_capacity((cols * rows) as usize);
    for row in 0..rows {
        for col in 0..cols {
            let rect = PixelRect::new(col * tile_size, row * tile_size, tile_size, tile_size)
                .clipped_to(width, height);
            buckets.push(Bucket {
                index: buckets.len(),
                rect,
                normalized: NormalizedRect::from_pixels(&rect, width, height),
                samples: 0,
            });
        }
    }
    buckets
}

/// What happens to the composite once every tile is done.
#[derive(Debug, Clone)]
pub enum BucketOutput {
    /// Keep it and show it on the display surface.
    Present,
    /// Tone map and write a PNG, optionally tagged with the scene.
    Png {
        path: PathBuf,
        scene: Option<SceneDescription>,
    },
}

/// Parameters of one bucket render.
#[derive(Debug, Clone)]
pub struct BucketJob {
    pub width: u32,
    pub height: u32,
    pub tile_size: u32,
    pub quality: QualityPolicy,
    pub output: BucketOutput,
}

/// Final state of a finished tile.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileReport {
    pub index: usize,
    pub rect: PixelRect,
    pub samples: u32,
    /// Convergence measured after the last sample.
    pub convergence: f32,
    /// Whether the tile stopped below the threshold rather than at a cap.
    pub converged: bool,
}

/// Result of a completed bucket render.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketOutcome {
    Presented,
    Written { path: PathBuf, bytes: usize },
}

/// What a single [`BucketScheduler::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum BucketStep {
    Sampled {
        tile: usize,
        samples: u32,
        convergence: f32,
    },
    TileComplete(TileReport),
    Finished(BucketOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SchedulerState {
    Rendering,
    Finished,
    Cancelled,
    Failed,
}

/// Drives a bucket render one sample per tick.
#[derive(Debug)]
pub struct BucketScheduler {
    width: u32,
    height: u32,
    quality: QualityPolicy,
    output: BucketOutput,
    accumulator: AccumulationRenderer,
    buckets: Vec<Bucket>,
    current: usize,
    tile_ready: bool,
    last_convergence: Option<f32>,
    composite: PixelBuffer,
    reports: Vec<TileReport>,
    state: SchedulerState,
    clock: RenderClock,
}

impl BucketScheduler {
    /// Validate the job, allocate the accumulation target and clear the
    /// composite.
    pub fn start(device: &mut dyn RenderDevice, job: BucketJob) -> FraktalResult<Self> {
        if job.width == 0 || job.height == 0 {
            return Err(FraktalError::render(format!(
                "cannot bucket render a {}x{} target",
                job.width, job.height
            )));
        }
        if job.tile_size == 0 {
            return Err(FraktalError::config("tile size must be at least 1 pixel"));
        }
        job.quality
            .validate()
            .map_err(|e| FraktalError::config(e.to_string()))?;

        let mut accumulator = AccumulationRenderer::new(job.width, job.height);
        accumulator.resize(device, job.width, job.height)?;
        let buckets = partition(job.width, job.height, job.tile_size);
        let clock = RenderClock::start();

        tracing::info!(
            width = job.width,
            height = job.height,
            tile_size = job.tile_size,
            tiles = buckets.len(),
            device = device.name(),
            started_at = clock.epoch_wall(),
            "Bucket render started"
        );

        Ok(Self {
            width: job.width,
            height: job.height,
            quality: job.quality,
            output: job.output,
            accumulator,
            buckets,
            current: 0,
            tile_ready: false,
            last_convergence: None,
            composite: PixelBuffer::new(job.width, job.height),
            reports: Vec::new(),
            state: SchedulerState::Rendering,
            clock,
        })
    }

    pub fn buckets(&self) -> &[Bucket] {
        &self.buckets
    }

    pub fn reports(&self) -> &[TileReport] {
        &self.reports
    }

    /// The composite assembled so far.
    pub fn composite(&self) -> &PixelBuffer {
        &self.composite
    }

    /// Percentage of tiles completed, `0..=100`.
    pub fn progress(&self) -> f64 {
        if self.buckets.is_empty() {
            return 100.0;
        }
        self.reports.len() as f64 / self.buckets.len() as f64 * 100.0
    }

    pub fn is_rendering(&self) -> bool {
        self.state == SchedulerState::Rendering
    }

    /// Advance by one unit of work: one sample, one tile completion, or the
    /// final output.
    pub fn tick(&mut self, device: &mut dyn RenderDevice) -> FraktalResult<BucketStep> {
        if self.state != SchedulerState::Rendering {
            return Err(FraktalError::invalid_state(format!(
                "bucket render is {:?}",
                self.state
            )));
        }
        let index = self.current;
        if !self.tile_ready {
            self.prepare_tile(device, index);
        }

        let samples = self.buckets[index].samples;
        let convergence = self.last_convergence.unwrap_or(f32::INFINITY);
        if self.quality.should_continue(samples, convergence) {
            if let Err(e) = self.accumulator.accumulate_sample(device, samples) {
                self.fail(device, &e);
                return Err(e);
            }
            let bucket = &mut self.buckets[index];
            bucket.samples += 1;
            let convergence = self.accumulator.measure_convergence(bucket.rect);
            self.last_convergence = Some(convergence);
            return Ok(BucketStep::Sampled {
                tile: index,
                samples: bucket.samples,
                convergence,
            });
        }

        let report = self.complete_tile(index, convergence);
        if self.current < self.buckets.len() {
            return Ok(BucketStep::TileComplete(report));
        }

        match self.finish(device) {
            Ok(outcome) => Ok(BucketStep::Finished(outcome)),
            Err(e) => {
                self.fail(device, &e);
                Err(e)
            }
        }
    }

    /// Tick until the render finishes or fails.
    pub fn run(&mut self, device: &mut dyn RenderDevice) -> FraktalResult<BucketOutcome> {
        loop {
            if let BucketStep::Finished(outcome) = self.tick(device)? {
                return Ok(outcome);
            }
        }
    }

    /// Abandon the render and release the device target.
    pub fn cancel(&mut self, device: &mut dyn RenderDevice) {
        if self.state == SchedulerState::Rendering {
            tracing::info!(
                completed = self.reports.len(),
                tiles = self.buckets.len(),
                "Bucket render cancelled"
            );
            self.state = SchedulerState::Cancelled;
        }
        self.accumulator.release(device);
    }

    fn prepare_tile(&mut self, device: &mut dyn RenderDevice, index: usize) {
        let bucket = self.buckets[index];
        device.set_uniform(
            REGION_UNIFORM,
            UniformValue::Vec4(bucket.normalized.as_array()),
        );
        device.set_uniform(
            RESOLUTION_UNIFORM,
            UniformValue::Vec2([self.width as f64, self.height as f64]),
        );
        self.accumulator.set_active_region(bucket.rect);
        self.accumulator.reset();
        self.last_convergence = None;
        self.tile_ready = true;
    }

    fn complete_tile(&mut self, index: usize, convergence: f32) -> TileReport {
        let bucket = self.buckets[index];
        let tile = self.accumulator.region_pixels(bucket.rect);
        self.composite.blit(&tile, bucket.rect.x, bucket.rect.y);

        let report = TileReport {
            index,
            rect: bucket.rect,
            samples: bucket.samples,
            convergence,
            converged: convergence <= self.quality.threshold_fraction(),
        };
        tracing::debug!(
            tile = index,
            samples = report.samples,
            convergence = report.convergence,
            converged = report.converged,
            "Tile complete"
        );

        self.reports.push(report);
        self.current += 1;
        self.tile_ready = false;
        report
    }

    fn finish(&mut self, device: &mut dyn RenderDevice) -> FraktalResult<BucketOutcome> {
        self.accumulator.release(device);
        let outcome = match &self.output {
            BucketOutput::Present => {
                device.present(&self.composite)?;
                BucketOutcome::Presented
            }
            BucketOutput::Png { path, scene } => {
                let mut rgba = tone_map(&self.composite);
                flip_vertical(&mut rgba, self.width, self.height);
                force_opaque(&mut rgba);
                let mut png = encode_png(&rgba, self.width, self.height)?;
                if let Some(scene) = scene {
                    png = embed_scene_description(&png, scene)?;
                }
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)?;
                }
                std::fs::write(path, &png)?;
                BucketOutcome::Written {
                    path: path.clone(),
                    bytes: png.len(),
                }
            }
        };

        self.state = SchedulerState::Finished;
        let total_samples: u64 = self.reports.iter().map(|r| r.samples as u64).sum();
        tracing::info!(
            tiles = self.reports.len(),
            total_samples,
            elapsed_secs = self.clock.elapsed_secs(),
            "Bucket render finished"
        );
        Ok(outcome)
    }

    fn fail(&mut self, device: &mut dyn RenderDevice, error: &FraktalError) {
        tracing::error!(
            tile = self.current,
            error = %error,
            "Bucket render aborted"
        );
        self.state = SchedulerState::Failed;
        self.accumulator.release(device);
    }
}
