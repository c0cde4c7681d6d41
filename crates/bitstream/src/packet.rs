//! Encoded packet and codec configuration types.

use fraktal_project_model::VideoCodec;

/// One encoded video frame as produced by an encoder.
///
/// `data` is in the encoder's native framing (Annex-B for AVC/HEVC, raw
/// OBUs for AV1, a VP9 frame for VP9) until a
/// [`BitstreamConverter`](crate::BitstreamConverter) rewrites it for the
/// target container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedPacket {
    pub data: Vec<u8>,

    /// Presentation timestamp in microseconds.
    pub timestamp_us: i64,

    /// Duration in microseconds.
    pub duration_us: i64,

    /// Whether the packet is a random access point.
    pub key_frame: bool,
}

impl EncodedPacket {
    pub fn new(data: Vec<u8>, timestamp_us: i64, duration_us: i64, key_frame: bool) -> Self {
        Self {
            data,
            timestamp_us,
            duration_us,
            key_frame,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Codec configuration for a container track.
///
/// `description` holds the container-level decoder configuration
/// (`avcC`, `hvcC` or `av1C` body). VP9 in WebM needs none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecConfigRecord {
    pub codec: VideoCodec,

    /// RFC 6381 style codec string, e.g. `avc1.64001f`.
    pub codec_string: String,

    pub description: Option<Vec<u8>>,
}
