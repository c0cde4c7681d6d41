//! Bucket-render a still image to PNG.

use std::path::PathBuf;

use fraktal_common::config::AppConfig;
use fraktal_export_engine::{derive_uniforms, SceneHost};
use fraktal_project_model::quality::QualityPolicy;
use fraktal_render_engine::{
    BucketJob, BucketOutcome, BucketOutput, BucketScheduler, BucketStep, RenderDevice,
    SoftwareDevice,
};

use crate::scene::ZoomScene;
use crate::ViewArgs;

pub struct RenderArgs {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub zoom: f64,
    pub tile_size: Option<u32>,
    pub min_samples: Option<u32>,
    pub max_samples: Option<u32>,
    pub threshold: Option<f32>,
    pub embed_scene: bool,
    pub view: ViewArgs,
}

pub fn run(config: &AppConfig, args: RenderArgs) -> anyhow::Result<()> {
    let defaults = &config.bucket;
    let quality = QualityPolicy {
        min_samples: args.min_samples.unwrap_or(defaults.min_samples),
        max_samples: args.max_samples.unwrap_or(defaults.max_samples),
        convergence_threshold_percent: args
            .threshold
            .unwrap_or(defaults.convergence_threshold_percent),
        safety_cap: defaults.safety_cap,
    };
    let tile_size = args.tile_size.unwrap_or(defaults.tile_size);

    let scene = ZoomScene::new(
        [args.view.center_x, args.view.center_y],
        args.view.iterations,
        (args.zoom, args.zoom),
        (0, 0),
    );

    println!("Rendering {}x{} to {}", args.width, args.height, args.output.display());
    println!(
        "  Center: ({}, {})  Zoom: {}  Iterations: {}",
        args.view.center_x, args.view.center_y, args.zoom, args.view.iterations
    );
    println!(
        "  Tiles: {tile_size}px  Samples: {}..{}  Threshold: {}%",
        quality.min_samples, quality.max_samples, quality.convergence_threshold_percent
    );

    let mut device = SoftwareDevice::new();
    let mut uniforms = scene.uniforms();
    derive_uniforms(&mut uniforms);
    for (name, value) in &uniforms {
        device.set_uniform(name, *value);
    }

    let job = BucketJob {
        width: args.width,
        height: args.height,
        tile_size,
        quality,
        output: BucketOutput::Png {
            path: args.output,
            scene: args.embed_scene.then(|| scene.describe()),
        },
    };

    let mut scheduler = BucketScheduler::start(&mut device, job)?;
    let tiles = scheduler.buckets().len();
    loop {
        match scheduler.tick(&mut device)? {
            BucketStep::Sampled { .. } => {}
            BucketStep::TileComplete(report) => {
                print!(
                    "\r  Tile {}/{}: {} samples ({})    ",
                    report.index + 1,
                    tiles,
                    report.samples,
                    if report.converged { "converged" } else { "capped" }
                );
            }
            BucketStep::Finished(outcome) => {
                println!();
                if let BucketOutcome::Written { path, bytes } = outcome {
                    println!("Wrote {} ({bytes} bytes)", path.display());
                }
                break;
            }
        }
    }

    let total: u64 = scheduler.reports().iter().map(|r| r.samples as u64).sum();
    tracing::info!(
        tiles,
        samples = total,
        draws = device.render_count(),
        "Render finished"
    );
    Ok(())
}
