//! Export configuration types.
//!
//! An [`ExportConfig`] is created once per export session and never mutated
//! while the session runs.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Video codec selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    /// H.264 / AVC.
    Avc,
    /// H.265 / HEVC.
    Hevc,
    /// AOMedia Video 1.
    Av1,
    /// VP9.
    Vp9,
}

impl VideoCodec {
    /// Short lowercase name used in config files and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Avc => "avc",
            Self::Hevc => "hevc",
            Self::Av1 => "av1",
            Self::Vp9 => "vp9",
        }
    }

    /// The container this codec is written into by default.
    pub fn default_container(self) -> ContainerFormat {
        match self {
            Self::Avc | Self::Hevc | Self::Av1 => ContainerFormat::Mp4,
            Self::Vp9 => ContainerFormat::Webm,
        }
    }
}

impl fmt::Display for VideoCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoCodec {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "avc" | "h264" | "avc1" => Ok(Self::Avc),
            "hevc" | "h265" | "hvc1" => Ok(Self::Hevc),
            "av1" | "av01" => Ok(Self::Av1),
            "vp9" | "vp09" => Ok(Self::Vp9),
            other => Err(ModelError::invalid(format!(
                "unknown codec '{other}' (expected avc, hevc, av1, vp9)"
            ))),
        }
    }
}

/// Output container format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    Mp4,
    Webm,
}

impl ContainerFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
        }
    }

    /// Whether this container can carry the given codec.
    pub fn supports(self, codec: VideoCodec) -> bool {
        matches!(
            (self, codec),
            (Self::Mp4, VideoCodec::Avc)
                | (Self::Mp4, VideoCodec::Hevc)
                | (Self::Mp4, VideoCodec::Av1)
                | (Self::Webm, VideoCodec::Vp9)
        )
    }
}

impl FromStr for ContainerFormat {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(Self::Mp4),
            "webm" => Ok(Self::Webm),
            other => Err(ModelError::invalid(format!(
                "unknown container '{other}' (expected mp4, webm)"
            ))),
        }
    }
}

/// Requested rate-control mode. Encoders that cannot honour
/// [`BitrateMode::Constant`] fall back to [`BitrateMode::Variable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    #[default]
    Constant,
    Variable,
}

/// Behaviour when the muxer receives packets before a codec configuration
/// record exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MissingConfigPolicy {
    /// Hold packets until a keyframe supplies parameter sets; fail if the
    /// stream ends first.
    #[default]
    Defer,
    /// Fail the session on the first packet without a configuration.
    Fail,
}

impl FromStr for MissingConfigPolicy {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "defer" | "wait" => Ok(Self::Defer),
            "fail" => Ok(Self::Fail),
            other => Err(ModelError::invalid(format!(
                "unknown missing-config policy '{other}' (expected defer, fail)"
            ))),
        }
    }
}

/// Immutable per-session export configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Output width in pixels (even).
    pub width: u32,

    /// Output height in pixels (even).
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Target bitrate in bits per second.
    pub bitrate_bps: u64,

    /// Video codec.
    pub codec: VideoCodec,

    /// Output container.
    pub container: ContainerFormat,

    /// Accumulated samples per output frame.
    pub samples_per_frame: u32,

    /// First timeline frame (inclusive).
    pub start_frame: i64,

    /// Last timeline frame (inclusive).
    pub end_frame: i64,

    /// Timeline frames advanced per output frame.
    pub frame_step: u32,

    /// Internal render scale relative to the output size.
    pub supersampling: f32,

    /// Requested rate-control mode.
    #[serde(default)]
    pub bitrate_mode: BitrateMode,

    /// Maximum encoded packets pending in the mux queue.
    #[serde(default = "default_queue_depth")]
    pub mux_queue_depth: usize,

    /// Policy for packets that arrive before any codec configuration.
    #[serde(default)]
    pub missing_config_policy: MissingConfigPolicy,
}

fn default_queue_depth() -> usize {
    64
}

impl ExportConfig {
    /// Configuration with sensible defaults for everything but size, rate and codec.
    pub fn new(width: u32, height: u32, fps: u32, codec: VideoCodec) -> Self {
        Self {
            width,
            height,
            fps,
            bitrate_bps: 12_000_000,
            codec,
            container: codec.default_container(),
            samples_per_frame: 16,
            start_frame: 0,
            end_frame: 0,
            frame_step: 1,
            supersampling: 1.0,
            bitrate_mode: BitrateMode::Constant,
            mux_queue_depth: default_queue_depth(),
            missing_config_policy: MissingConfigPolicy::Defer,
        }
    }

    /// Number of output frames in the configured range.
    pub fn total_frames(&self) -> u64 {
        if self.end_frame < self.start_frame || self.frame_step == 0 {
            return 0;
        }
        ((self.end_frame - self.start_frame) as u64) / self.frame_step as u64 + 1
    }

    /// Timeline frame scrubbed for the given output frame index.
    pub fn timeline_frame(&self, output_index: u64) -> i64 {
        self.start_frame + (output_index as i64) * self.frame_step as i64
    }

    /// Internal render width after supersampling.
    pub fn render_width(&self) -> u32 {
        scaled_dimension(self.width, self.supersampling)
    }

    /// Internal render height after supersampling.
    pub fn render_height(&self) -> u32 {
        scaled_dimension(self.height, self.supersampling)
    }

    /// Validate all fields and the codec/container pairing.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.width == 0 || self.height == 0 {
            return Err(ModelError::invalid("export width/height must be non-zero"));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ModelError::invalid(
                "export width/height must be even (required for 4:2:0 output)",
            ));
        }
        if self.fps == 0 {
            return Err(ModelError::invalid("export fps must be non-zero"));
        }
        if self.bitrate_bps == 0 {
            return Err(ModelError::invalid("export bitrate must be non-zero"));
        }
        if self.samples_per_frame == 0 {
            return Err(ModelError::invalid("samples per frame must be at least 1"));
        }
        if self.frame_step == 0 {
            return Err(ModelError::invalid("frame step must be at least 1"));
        }
        if self.end_frame < self.start_frame {
            return Err(ModelError::invalid(format!(
                "frame range is empty: start {} > end {}",
                self.start_frame, self.end_frame
            )));
        }
        if !(self.supersampling.is_finite() && self.supersampling > 0.0) {
            return Err(ModelError::invalid("supersampling scale must be positive"));
        }
        if self.mux_queue_depth == 0 {
            return Err(ModelError::invalid("mux queue depth must be at least 1"));
        }
        if !self.container.supports(self.codec) {
            return Err(ModelError::invalid(format!(
                "{} cannot be written into a {} container",
                self.codec,
                self.container.extension()
            )));
        }
        Ok(())
    }
}

fn scaled_dimension(value: u32, scale: f32) -> u32 {
    ((value as f64 * scale as f64).round() as u32).max(1)
}

/// Errors raised while validating model records.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Parse error: {source}")]
    Parse {
        #[from]
        source: serde_json::Error,
    },
}

impl ModelError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid {
            message: msg.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scenario_config() -> ExportConfig {
        let mut config = ExportConfig::new(640, 360, 30, VideoCodec::Avc);
        config.samples_per_frame = 8;
        config.start_frame = 0;
        config.end_frame = 9;
        config
    }

    #[test]
    fn test_total_frames_inclusive_range() {
        let config = scenario_config();
        assert_eq!(config.total_frames(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_total_frames_with_step() {
        let mut config = scenario_config();
        config.start_frame = 10;
        config.end_frame = 20;
        config.frame_step = 3;
        // 10, 13, 16, 19
        assert_eq!(config.total_frames(), 4);
        assert_eq!(config.timeline_frame(3), 19);
    }

    #[test]
    fn test_validate_rejects_odd_dimensions() {
        let mut config = scenario_config();
        config.width = 641;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_mismatched_container() {
        let mut config = scenario_config();
        config.container = ContainerFormat::Webm;
        assert!(config.validate().is_err());

        config.codec = VideoCodec::Vp9;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_render_size_applies_supersampling() {
        let mut config = scenario_config();
        config.supersampling = 1.5;
        assert_eq!(config.render_width(), 960);
        assert_eq!(config.render_height(), 540);
    }

    #[test]
    fn test_codec_parsing_accepts_aliases() {
        assert_eq!("h264".parse::<VideoCodec>().unwrap(), VideoCodec::Avc);
        assert_eq!("HEVC".parse::<VideoCodec>().unwrap(), VideoCodec::Hevc);
        assert!("mpeg2".parse::<VideoCodec>().is_err());
        assert_eq!(VideoCodec::Vp9.default_container(), ContainerFormat::Webm);
    }

    #[test]
    fn test_config_serialization_defaults_queue_fields() {
        let mut value = serde_json::to_value(scenario_config()).unwrap();
        let object = value.as_object_mut().unwrap();
        object.remove("mux_queue_depth");
        object.remove("missing_config_policy");
        object.remove("bitrate_mode");

        let parsed: ExportConfig = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.mux_queue_depth, 64);
        assert_eq!(parsed.missing_config_policy, MissingConfigPolicy::Defer);
        assert_eq!(parsed.bitrate_mode, BitrateMode::Constant);
    }
}
