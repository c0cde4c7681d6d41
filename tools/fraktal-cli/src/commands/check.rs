//! Check encoder availability and configuration.

use fraktal_common::config::{config_file_path, AppConfig};
use fraktal_encode_engine::ffmpeg::supports_cbr;
use fraktal_encode_engine::is_ffmpeg_on_path;
use fraktal_project_model::export::VideoCodec;
use fraktal_project_model::region::PixelRect;
use fraktal_render_engine::{Jitter, RenderDevice, SoftwareDevice};

pub fn run(config: &AppConfig, write_config: bool) -> anyhow::Result<()> {
    println!("Fraktal System Check");
    println!("{}", "=".repeat(50));

    let path = config_file_path();
    if path.exists() {
        println!("[OK] Config: {}", path.display());
    } else if write_config {
        config.save()?;
        println!("[OK] Config: wrote defaults to {}", path.display());
    } else {
        println!("[--] Config: defaults ({} not found)", path.display());
    }
    println!("     Output directory: {}", config.output_dir.display());

    let ffmpeg = is_ffmpeg_on_path();
    if ffmpeg {
        println!("[OK] ffmpeg found on PATH");
    } else {
        println!("[FAIL] ffmpeg not found on PATH (required for video export)");
    }
    for codec in [VideoCodec::Avc, VideoCodec::Hevc, VideoCodec::Av1, VideoCodec::Vp9] {
        println!(
            "     {:<5} -> {:<4} ({})",
            codec.as_str(),
            codec.default_container().extension(),
            if supports_cbr(codec) {
                "CBR"
            } else {
                "VBR fallback"
            }
        );
    }

    let mut device = SoftwareDevice::new();
    let target = device.create_target(8, 8)?;
    device.render(target, Jitter::ZERO)?;
    let pixels = device.read_pixels(target, PixelRect::full(8, 8))?;
    device.dispose_target(target);
    if pixels.data().iter().all(|v| v.is_finite()) {
        println!("[OK] Software renderer: {}", device.name());
    } else {
        println!("[FAIL] Software renderer produced non-finite output");
    }

    println!();
    if ffmpeg {
        println!("All capabilities are available. Fraktal is ready.");
    } else {
        println!("Still renders work; install ffmpeg to export video.");
    }

    Ok(())
}
