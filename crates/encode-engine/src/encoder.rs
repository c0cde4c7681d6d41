//! Encoder abstraction.

use fraktal_bitstream::EncodedPacket;
use fraktal_common::FraktalResult;
use fraktal_project_model::{BitrateMode, ExportConfig, VideoCodec};
use tokio::sync::mpsc;

/// A rendered frame ready for encoding.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoFrame {
    /// Tightly packed RGBA8, top row first.
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp_us: i64,
    pub duration_us: i64,
}

impl VideoFrame {
    pub fn expected_len(width: u32, height: u32) -> usize {
        width as usize * height as usize * 4
    }
}

/// Encoder settings derived from an [`ExportConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub bitrate_bps: u64,
    /// Requested mode; the encoder may grant [`BitrateMode::Variable`] instead.
    pub bitrate_mode: BitrateMode,
    /// Frames between forced keyframes.
    pub keyframe_interval: u32,
}

impl EncoderConfig {
    pub fn from_export(config: &ExportConfig) -> Self {
        Self {
            codec: config.codec,
            width: config.width,
            height: config.height,
            fps: config.fps,
            bitrate_bps: config.bitrate_bps,
            bitrate_mode: config.bitrate_mode,
            keyframe_interval: config.fps.saturating_mul(2).max(1),
        }
    }
}

/// Out-of-band data an encoder may attach to a packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EncoderMetadata {
    /// Decoder configuration record, if the encoder exposes one.
    pub description: Option<Vec<u8>>,
}

/// Everything an encoder reports through its output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncoderOutput {
    Packet {
        packet: EncodedPacket,
        metadata: Option<EncoderMetadata>,
    },
    /// The encoder failed; no further output follows.
    Error(String),
}

/// Trait for video encoder backends.
///
/// Packets are delivered through the channel handed to `configure`, in
/// output order, which for every backend equals submission order.
#[async_trait::async_trait]
pub trait FrameEncoder: Send {
    /// Prepare the encoder. Returns the bitrate mode actually in effect.
    async fn configure(
        &mut self,
        config: &EncoderConfig,
        output: mpsc::Sender<EncoderOutput>,
    ) -> FraktalResult<BitrateMode>;

    /// Submit one frame.
    async fn encode(&mut self, frame: VideoFrame, key_frame: bool) -> FraktalResult<()>;

    /// Finish encoding; every packet has been sent when this returns.
    async fn flush(&mut self) -> FraktalResult<()>;

    /// Release encoder resources without waiting for pending output.
    async fn close(&mut self);

    /// Backend name for logs.
    fn name(&self) -> &str;
}
