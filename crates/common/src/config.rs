//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Global application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory where renders and exports are written by default.
    pub output_dir: PathBuf,

    /// Default video export settings.
    pub export: ExportDefaults,

    /// Default bucket (tiled still) render settings.
    pub bucket: BucketDefaults,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

/// Default video export parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportDefaults {
    /// Default FPS.
    pub fps: u32,

    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,

    /// Default codec selector (`avc`, `hevc`, `av1`, `vp9`).
    pub codec: String,

    /// Accumulated samples per output frame.
    pub samples_per_frame: u32,

    /// Internal supersampling scale applied before downsampling to export size.
    pub supersampling: f32,

    /// Maximum number of encoded packets waiting in the mux queue.
    #[serde(default = "default_mux_queue_depth")]
    pub mux_queue_depth: usize,

    /// What to do when a packet arrives before any codec configuration
    /// (`defer` or `fail`).
    #[serde(default = "default_missing_config_policy")]
    pub missing_config_policy: String,
}

/// Default bucket render parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketDefaults {
    /// Tile edge length in pixels.
    pub tile_size: u32,

    /// Minimum samples per tile.
    pub min_samples: u32,

    /// Sample ceiling per tile once converged.
    pub max_samples: u32,

    /// Convergence threshold as a percentage of full dynamic range.
    pub convergence_threshold_percent: f32,

    /// Hard cap bounding worst-case time per tile.
    pub safety_cap: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "fraktal=debug,warn").
    pub level: String,

    /// Whether to output structured JSON logs.
    pub json: bool,

    /// Optional log file path.
    pub file: Option<PathBuf>,
}

fn default_mux_queue_depth() -> usize {
    64
}

fn default_missing_config_policy() -> String {
    "defer".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: dirs_default_output(),
            export: ExportDefaults::default(),
            bucket: BucketDefaults::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for ExportDefaults {
    fn default() -> Self {
        Self {
            fps: 30,
            bitrate_bps: 12_000_000,
            codec: "avc".to_string(),
            samples_per_frame: 16,
            supersampling: 1.0,
            mux_queue_depth: default_mux_queue_depth(),
            missing_config_policy: default_missing_config_policy(),
        }
    }
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            tile_size: 512,
            min_samples: 4,
            max_samples: 256,
            convergence_threshold_percent: 0.1,
            safety_cap: 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            file: None,
        }
    }
}

impl AppConfig {
    /// Load config from the standard location, falling back to defaults.
    pub fn load() -> Self {
        let config_path = config_file_path();
        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(content) => match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(e) => {
                        tracing::warn!("Failed to parse config at {:?}: {}", config_path, e);
                    }
                },
                Err(e) => {
                    tracing::warn!("Failed to read config at {:?}: {}", config_path, e);
                }
            }
        }
        Self::default()
    }

    /// Save config to the standard location.
    pub fn save(&self) -> Result<(), std::io::Error> {
        let config_path = config_file_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(config_path, json)
    }
}

/// Standard config file location.
pub fn config_file_path() -> PathBuf {
    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        });
    base.join("fraktal").join("config.json")
}

/// Default output directory.
fn dirs_default_output() -> PathBuf {
    let base = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local").join("share")
        });
    base.join("fraktal").join("renders")
}
