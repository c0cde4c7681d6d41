//! Fraktal Render Engine
//!
//! Progressive accumulation rendering on top of an abstract render device,
//! and the tiled ("bucket") still renderer built on it.
//!
//! # Pipeline Architecture
//!
//! ```text
//! RenderDevice ── render(target, jitter) ──┐
//!                                          ├── AccumulationRenderer (running mean, ping/pong)
//! Halton(2,3) jitter ──────────────────────┘         │
//!                                                    ├── BucketScheduler (tile by tile, adaptive)
//!                                                    │         │
//!                                                    │         ├── composite → present
//!                                                    │         └── composite → tone map → PNG + tEXt
//!                                                    │
//!                                                    └── ExportSession (one frame at a time)
//! ```

pub mod accumulation;
pub mod bucket;
pub mod device;
pub mod halton;
pub mod png_meta;
pub mod postprocess;
pub mod software;

pub use accumulation::AccumulationRenderer;
pub use bucket::{
    partition, Bucket, BucketJob, BucketOutcome, BucketOutput, BucketScheduler, BucketStep,
    TileReport,
};
pub use device::{Jitter, PixelBuffer, RenderDevice, TargetId};
pub use png_meta::{embed_text_chunk, encode_png, extract_text_chunk, SCENE_METADATA_KEYWORD};
pub use software::SoftwareDevice;
