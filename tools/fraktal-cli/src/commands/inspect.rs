//! Print the scene embedded in a rendered PNG.

use std::path::PathBuf;

use fraktal_render_engine::png_meta::extract_scene_description;

pub fn run(path: PathBuf, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(&path)
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", path.display()))?;

    let Some(scene) = extract_scene_description(&bytes)? else {
        anyhow::bail!("{} carries no scene description", path.display());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&scene)?);
        return Ok(());
    }

    println!("Scene: {}", path.display());
    println!("  Formula: {}", scene.formula);
    println!("  Version: {}", scene.version);
    println!("  Frame: {}", scene.frame);
    println!(
        "  Camera: position {:?}, rotation {:?}, fov {}",
        scene.camera.position, scene.camera.rotation, scene.camera.fov_deg
    );
    println!();
    println!("Uniforms:");
    for (name, value) in &scene.uniforms {
        println!("  {name}: {value:?}");
    }

    Ok(())
}
