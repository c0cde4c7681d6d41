//! Export a zoom animation to video.

use std::io::Write;
use std::path::PathBuf;

use fraktal_common::config::AppConfig;
use fraktal_encode_engine::{ExportArtifact, FfmpegEncoder, OutputTarget, SinkMode};
use fraktal_export_engine::{
    ExportContext, ExportProgress, ExportSession, ExportStage, SessionOutcome,
};
use fraktal_project_model::export::{
    ContainerFormat, ExportConfig, MissingConfigPolicy, VideoCodec,
};
use fraktal_render_engine::SoftwareDevice;

use crate::scene::ZoomScene;
use crate::ViewArgs;

pub struct ExportArgs {
    pub output: Option<PathBuf>,
    pub codec: Option<String>,
    pub container: Option<String>,
    pub width: u32,
    pub height: u32,
    pub fps: Option<u32>,
    pub start: i64,
    pub end: i64,
    pub step: u32,
    pub samples: Option<u32>,
    pub supersampling: Option<f32>,
    pub zoom_start: f64,
    pub zoom_end: f64,
    pub spin: f64,
    pub ffmpeg: String,
    pub view: ViewArgs,
}

fn build_config(defaults: &AppConfig, args: &ExportArgs) -> anyhow::Result<ExportConfig> {
    let export = &defaults.export;
    let codec: VideoCodec = args
        .codec
        .as_deref()
        .unwrap_or(&export.codec)
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let mut config = ExportConfig::new(
        args.width,
        args.height,
        args.fps.unwrap_or(export.fps),
        codec,
    );
    if let Some(container) = &args.container {
        config.container = container
            .parse::<ContainerFormat>()
            .map_err(|e| anyhow::anyhow!("{e}"))?;
    }
    config.bitrate_bps = export.bitrate_bps;
    config.samples_per_frame = args.samples.unwrap_or(export.samples_per_frame);
    config.supersampling = args.supersampling.unwrap_or(export.supersampling);
    config.start_frame = args.start;
    config.end_frame = args.end;
    config.frame_step = args.step;
    config.mux_queue_depth = export.mux_queue_depth;
    config.missing_config_policy = export
        .missing_config_policy
        .parse::<MissingConfigPolicy>()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid export settings: {e}"))?;
    Ok(config)
}

pub async fn run(defaults: &AppConfig, args: ExportArgs) -> anyhow::Result<()> {
    let config = build_config(defaults, &args)?;
    let output_path = args.output.clone().unwrap_or_else(|| {
        defaults
            .output_dir
            .join(format!("fraktal.{}", config.container.extension()))
    });

    println!("Exporting zoom to: {}", output_path.display());
    println!("  Format: {} in {}", config.codec, config.container.extension());
    println!(
        "  Resolution: {}x{} @ {}fps (render {}x{})",
        config.width,
        config.height,
        config.fps,
        config.render_width(),
        config.render_height()
    );
    println!(
        "  Frames: {} ({}..={} step {}), {} samples each",
        config.total_frames(),
        config.start_frame,
        config.end_frame,
        config.frame_step,
        config.samples_per_frame
    );
    println!("Press Ctrl+C to cancel...");

    let scene = ZoomScene::new(
        [args.view.center_x, args.view.center_y],
        args.view.iterations,
        (args.zoom_start, args.zoom_end),
        (config.start_frame, config.end_frame),
    )
    .with_spin(args.spin);

    let progress_cb = Box::new(|p: &ExportProgress| {
        if p.stage == ExportStage::Rendering {
            let eta = p
                .eta_secs
                .map(|s| format!("{s:.0}s"))
                .unwrap_or_else(|| "--".to_string());
            print!(
                "\r  Progress: {:.1}% ({}/{} frames, ETA: {eta})  ",
                p.progress, p.frames_rendered, p.total_frames,
            );
            let _ = std::io::stdout().flush();
        }
    });

    let context = ExportContext::new(Box::new(scene), Box::new(SoftwareDevice::new()))
        .with_observer(progress_cb);
    let mut session = ExportSession::new(context);

    let encoder = FfmpegEncoder::with_binary(args.ffmpeg);
    session
        .start(config, OutputTarget::Disk(output_path), Box::new(encoder))
        .await?;

    let control = session.control();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            control.cancel();
        }
    });

    let outcome = session.run().await;
    interrupt.abort();
    println!();

    match outcome? {
        SessionOutcome::Cancelled => println!("Export cancelled; partial output removed."),
        SessionOutcome::Completed(report) => {
            println!(
                "Export complete: {} frames, {:.2}s, {:?} bitrate",
                report.frames, report.summary.duration_secs, report.bitrate_mode
            );
            match (report.artifact, report.sink_mode) {
                (ExportArtifact::File(path), _) => println!("  Written to {}", path.display()),
                (ExportArtifact::Blob(bytes), SinkMode::Memory { .. }) => {
                    let fallback = defaults
                        .output_dir
                        .join(format!("fraktal-recovered.{}", container_extension(&bytes)));
                    if let Some(parent) = fallback.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&fallback, &bytes)?;
                    println!(
                        "  Output location was unavailable; saved {} bytes to {}",
                        bytes.len(),
                        fallback.display()
                    );
                }
                (ExportArtifact::Blob(bytes), SinkMode::Disk(path)) => {
                    std::fs::write(&path, &bytes)?;
                    println!("  Written to {}", path.display());
                }
            }
        }
    }

    Ok(())
}

/// Guess the extension of a finished container from its first box/element.
fn container_extension(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        "webm"
    } else {
        "mp4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_args() -> ExportArgs {
        ExportArgs {
            output: None,
            codec: None,
            container: None,
            width: 640,
            height: 360,
            fps: None,
            start: 0,
            end: 9,
            step: 1,
            samples: Some(8),
            supersampling: None,
            zoom_start: 1.0,
            zoom_end: 10.0,
            spin: 0.0,
            ffmpeg: "ffmpeg".to_string(),
            view: ViewArgs {
                center_x: -0.5,
                center_y: 0.0,
                iterations: 128,
            },
        }
    }

    #[test]
    fn test_config_from_defaults() {
        let config = build_config(&AppConfig::default(), &base_args()).unwrap();
        assert_eq!(config.codec, VideoCodec::Avc);
        assert_eq!(config.container, ContainerFormat::Mp4);
        assert_eq!(config.fps, 30);
        assert_eq!(config.samples_per_frame, 8);
        assert_eq!(config.total_frames(), 10);
    }

    #[test]
    fn test_vp9_defaults_to_webm() {
        let mut args = base_args();
        args.codec = Some("vp9".to_string());
        let config = build_config(&AppConfig::default(), &args).unwrap();
        assert_eq!(config.container, ContainerFormat::Webm);
    }

    #[test]
    fn test_rejects_bad_settings() {
        let mut args = base_args();
        args.codec = Some("mpeg2".to_string());
        assert!(build_config(&AppConfig::default(), &args).is_err());

        let mut args = base_args();
        args.codec = Some("vp9".to_string());
        args.container = Some("mp4".to_string());
        assert!(build_config(&AppConfig::default(), &args).is_err());

        let mut args = base_args();
        args.end = -1;
        assert!(build_config(&AppConfig::default(), &args).is_err());
    }

    #[test]
    fn test_extension_sniffing() {
        assert_eq!(container_extension(&[0x1A, 0x45, 0xDF, 0xA3, 0x01]), "webm");
        assert_eq!(container_extension(b"\0\0\0\x20ftypisom"), "mp4");
    }
}
