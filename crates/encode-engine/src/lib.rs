//! Fraktal Encode Engine
//!
//! Turns rendered RGBA frames into a finished video container:
//! - [`FrameEncoder`] trait with an ffmpeg-backed implementation
//! - [`Mp4Writer`] (progressive MP4, moov at end) and [`WebmWriter`]
//! - [`MuxQueue`]: single consumer task that converts and writes packets
//!   strictly in submission order, with a bounded backlog
//! - [`OutputSink`]: memory or disk target, falling back to memory when
//!   the disk location cannot be opened

pub mod container;
pub mod encoder;
pub mod ffmpeg;
pub mod mp4;
pub mod queue;
pub mod sink;
pub mod webm;

pub use container::{ContainerWriter, MuxSummary, TrackParams};
pub use encoder::{EncoderConfig, EncoderMetadata, EncoderOutput, FrameEncoder, VideoFrame};
pub use ffmpeg::{is_ffmpeg_on_path, FfmpegEncoder};
pub use mp4::Mp4Writer;
pub use queue::{MuxOutcome, MuxQueue};
pub use sink::{ExportArtifact, OutputSink, OutputTarget, SinkMode};
pub use webm::WebmWriter;
