//! Fraktal Bitstream
//!
//! Parsing and rewriting of encoder elementary streams so they can be
//! written into MP4-family and WebM containers:
//! - **NAL scanning:** start-code search over Annex-B buffers (H.264 and HEVC)
//! - **AVCC conversion:** start codes replaced by 4-byte big-endian lengths
//! - **Configuration records:** `avcC`, `hvcC` and `av1C` synthesized from
//!   in-band parameter sets
//! - **Framing:** access-unit splitting and IVF reading for encoder output pipes
//! - **Strategy table:** per `(container, codec)` conversion and config extraction
//!
//! ```text
//! encoder ──► EncodedPacket (Annex-B) ──► BitstreamConverter ──► EncodedPacket (AVCC)
//!                                               │
//!                                               └──► CodecConfigRecord (once)
//! ```

pub mod access_unit;
pub mod av1;
pub mod avcc;
pub mod hevc;
pub mod ivf;
pub mod nal;
pub mod packet;
pub mod strategy;
pub mod vp9;

pub use avcc::create_avcc_description;
pub use nal::{convert_chunk_to_avcc, find_nalus, AvccChunk, NalSyntax, NalUnit};
pub use packet::{CodecConfigRecord, EncodedPacket};
pub use strategy::{BitstreamConverter, FormatStrategy, ParameterSets};
