//! Fraktal CLI: offline renders and video export of Mandelbrot zooms.
//!
//! Usage:
//!   fraktal render [OPTIONS]      Bucket-render a still to PNG
//!   fraktal export [OPTIONS]      Export a zoom animation to MP4/WebM
//!   fraktal inspect <PNG>         Print the scene embedded in a render
//!   fraktal check                 Check encoder availability

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;
mod scene;

#[derive(Parser)]
#[command(
    name = "fraktal",
    about = "Progressive fractal rendering and frame-accurate video export",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to look in the Mandelbrot set.
#[derive(Args, Debug, Clone)]
pub struct ViewArgs {
    /// Real part of the view center
    #[arg(long, default_value = "-0.743643887037151", allow_hyphen_values = true)]
    pub center_x: f64,

    /// Imaginary part of the view center
    #[arg(long, default_value = "0.131825904205330", allow_hyphen_values = true)]
    pub center_y: f64,

    /// Iteration limit
    #[arg(long, default_value = "512")]
    pub iterations: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Bucket-render a single still image to PNG
    Render {
        /// Output PNG path
        #[arg(short, long, default_value = "fraktal.png")]
        output: PathBuf,

        /// Image width
        #[arg(long, default_value = "1920")]
        width: u32,

        /// Image height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Zoom factor
        #[arg(long, default_value = "1.0")]
        zoom: f64,

        /// Tile edge in pixels (defaults to the config file)
        #[arg(long)]
        tile_size: Option<u32>,

        /// Minimum samples per tile
        #[arg(long)]
        min_samples: Option<u32>,

        /// Maximum samples per tile
        #[arg(long)]
        max_samples: Option<u32>,

        /// Convergence threshold in percent of full range
        #[arg(long)]
        threshold: Option<f32>,

        /// Do not embed the scene description in the PNG
        #[arg(long)]
        no_metadata: bool,

        #[command(flatten)]
        view: ViewArgs,
    },

    /// Export a zoom animation to video
    Export {
        /// Output file path (extension defaults from the codec)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Codec: avc, hevc, av1, vp9
        #[arg(long)]
        codec: Option<String>,

        /// Container: mp4, webm (defaults from the codec)
        #[arg(long)]
        container: Option<String>,

        /// Output width
        #[arg(long, default_value = "1280")]
        width: u32,

        /// Output height
        #[arg(long, default_value = "720")]
        height: u32,

        /// Frames per second
        #[arg(long)]
        fps: Option<u32>,

        /// First timeline frame
        #[arg(long, default_value = "0")]
        start: i64,

        /// Last timeline frame (inclusive)
        #[arg(long, default_value = "119")]
        end: i64,

        /// Timeline frames advanced per output frame
        #[arg(long, default_value = "1")]
        step: u32,

        /// Samples accumulated per output frame
        #[arg(long)]
        samples: Option<u32>,

        /// Internal render scale
        #[arg(long)]
        supersampling: Option<f32>,

        /// Zoom at the first frame
        #[arg(long, default_value = "1.0")]
        zoom_start: f64,

        /// Zoom at the last frame
        #[arg(long, default_value = "1000.0")]
        zoom_end: f64,

        /// Roll added per timeline frame, in degrees
        #[arg(long, default_value = "0.0", allow_hyphen_values = true)]
        spin: f64,

        /// Path to the ffmpeg executable
        #[arg(long, default_value = "ffmpeg")]
        ffmpeg: String,

        #[command(flatten)]
        view: ViewArgs,
    },

    /// Print the scene description embedded in a rendered PNG
    Inspect {
        /// Path to the PNG
        path: PathBuf,

        /// Print raw JSON only
        #[arg(long)]
        json: bool,
    },

    /// Check encoder availability and configuration
    Check {
        /// Write the current settings to the config file if none exists
        #[arg(long)]
        write_config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = fraktal_common::config::AppConfig::load();

    let mut logging = config.logging.clone();
    if cli.verbose {
        logging.level = "debug".to_string();
    }
    fraktal_common::logging::init_logging(&logging);

    match cli.command {
        Commands::Render {
            output,
            width,
            height,
            zoom,
            tile_size,
            min_samples,
            max_samples,
            threshold,
            no_metadata,
            view,
        } => commands::render::run(
            &config,
            commands::render::RenderArgs {
                output,
                width,
                height,
                zoom,
                tile_size,
                min_samples,
                max_samples,
                threshold,
                embed_scene: !no_metadata,
                view,
            },
        ),
        Commands::Export {
            output,
            codec,
            container,
            width,
            height,
            fps,
            start,
            end,
            step,
            samples,
            supersampling,
            zoom_start,
            zoom_end,
            spin,
            ffmpeg,
            view,
        } => {
            commands::export::run(
                &config,
                commands::export::ExportArgs {
                    output,
                    codec,
                    container,
                    width,
                    height,
                    fps,
                    start,
                    end,
                    step,
                    samples,
                    supersampling,
                    zoom_start,
                    zoom_end,
                    spin,
                    ffmpeg,
                    view,
                },
            )
            .await
        }
        Commands::Inspect { path, json } => commands::inspect::run(path, json),
        Commands::Check { write_config } => commands::check::run(&config, write_config),
    }
}
