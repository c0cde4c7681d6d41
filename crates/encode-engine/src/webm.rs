//! WebM (Matroska subset) writer for VP9.
//!
//! Timecodes are in milliseconds (`TimecodeScale` = 1 000 000 ns). The
//! Segment size and `Duration` are written as placeholders and patched at
//! finalize. A new Cluster starts on every keyframe, or when a block's
//! relative timecode would overflow 16 bits.

use std::io::{Seek, SeekFrom, Write};

use fraktal_bitstream::{CodecConfigRecord, EncodedPacket};
use fraktal_common::{FraktalError, FraktalResult};
use fraktal_project_model::VideoCodec;

use crate::container::{MuxSummary, TrackParams};

mod id {
    pub const EBML: u32 = 0x1A45_DFA3;
    pub const EBML_VERSION: u32 = 0x4286;
    pub const EBML_READ_VERSION: u32 = 0x42F7;
    pub const EBML_MAX_ID_LENGTH: u32 = 0x42F2;
    pub const EBML_MAX_SIZE_LENGTH: u32 = 0x42F3;
    pub const DOC_TYPE: u32 = 0x4282;
    pub const DOC_TYPE_VERSION: u32 = 0x4287;
    pub const DOC_TYPE_READ_VERSION: u32 = 0x4285;
    pub const SEGMENT: u32 = 0x1853_8067;
    pub const INFO: u32 = 0x1549_A966;
    pub const TIMECODE_SCALE: u32 = 0x2A_D7B1;
    pub const MUXING_APP: u32 = 0x4D80;
    pub const WRITING_APP: u32 = 0x5741;
    pub const DURATION: u32 = 0x4489;
    pub const TRACKS: u32 = 0x1654_AE6B;
    pub const TRACK_ENTRY: u32 = 0xAE;
    pub const TRACK_NUMBER: u32 = 0xD7;
    pub const TRACK_UID: u32 = 0x73C5;
    pub const TRACK_TYPE: u32 = 0x83;
    pub const CODEC_ID: u32 = 0x86;
    pub const CODEC_PRIVATE: u32 = 0x63A2;
    pub const DEFAULT_DURATION: u32 = 0x23_E383;
    pub const VIDEO: u32 = 0xE0;
    pub const PIXEL_WIDTH: u32 = 0xB0;
    pub const PIXEL_HEIGHT: u32 = 0xBA;
    pub const CLUSTER: u32 = 0x1F43_B675;
    pub const TIMECODE: u32 = 0xE7;
    pub const SIMPLE_BLOCK: u32 = 0xA3;
}

const TIMECODE_SCALE_NS: u64 = 1_000_000;
const UNKNOWN_SIZE_LEN: usize = 8;

#[derive(Debug)]
struct OpenCluster {
    /// Offset of the cluster's size field.
    size_pos: u64,
    /// Offset of the first byte of cluster content.
    data_start: u64,
    timecode_ms: i64,
}

#[derive(Debug)]
pub struct WebmWriter<W: Write + Seek> {
    out: W,
    params: TrackParams,
    position: u64,
    segment_size_pos: u64,
    segment_data_start: u64,
    duration_pos: u64,
    has_track: bool,
    cluster: Option<OpenCluster>,
    first_pts_us: Option<i64>,
    last_pts_us: i64,
    end_us: i64,
    blocks: u64,
}

impl<W: Write + Seek> WebmWriter<W> {
    /// Write the EBML header, Segment header and Info.
    pub fn new(mut out: W, params: TrackParams) -> FraktalResult<Self> {
        let start = out.stream_position()?;

        let mut head = Vec::new();
        write_master(&mut head, id::EBML, |b| {
            write_uint(b, id::EBML_VERSION, 1);
            write_uint(b, id::EBML_READ_VERSION, 1);
            write_uint(b, id::EBML_MAX_ID_LENGTH, 4);
            write_uint(b, id::EBML_MAX_SIZE_LENGTH, 8);
            write_string(b, id::DOC_TYPE, "webm");
            write_uint(b, id::DOC_TYPE_VERSION, 4);
            write_uint(b, id::DOC_TYPE_READ_VERSION, 2);
        });

        write_id(&mut head, id::SEGMENT);
        let segment_size_pos = start + head.len() as u64;
        write_unknown_size(&mut head);
        let segment_data_start = start + head.len() as u64;

        // Info is written by hand so the Duration offset is known.
        let mut info = Vec::new();
        write_uint(&mut info, id::TIMECODE_SCALE, TIMECODE_SCALE_NS);
        write_string(&mut info, id::MUXING_APP, "fraktal");
        write_string(&mut info, id::WRITING_APP, "fraktal");
        write_id(&mut info, id::DURATION);
        write_size(&mut info, 8);
        let duration_offset = info.len();
        info.extend_from_slice(&0f64.to_be_bytes());

        write_id(&mut head, id::INFO);
        write_size(&mut head, info.len() as u64);
        let duration_pos = start + (head.len() + duration_offset) as u64;
        head.extend_from_slice(&info);

        out.write_all(&head)?;

        Ok(Self {
            out,
            params,
            position: start + head.len() as u64,
            segment_size_pos,
            segment_data_start,
            duration_pos,
            has_track: false,
            cluster: None,
            first_pts_us: None,
            last_pts_us: i64::MIN,
            end_us: 0,
            blocks: 0,
        })
    }

    pub fn has_track(&self) -> bool {
        self.has_track
    }

    /// Write the Tracks element.
    pub fn add_track(&mut self, config: &CodecConfigRecord) -> FraktalResult<()> {
        if self.has_track {
            return Err(FraktalError::mux("WebM video track already exists"));
        }
        let codec_id = match config.codec {
            VideoCodec::Vp9 => "V_VP9",
            VideoCodec::Av1 => "V_AV1",
            other => {
                return Err(FraktalError::unsupported(format!(
                    "{other} cannot be written to WebM"
                )))
            }
        };

        let params = self.params;
        let mut tracks = Vec::new();
        write_master(&mut tracks, id::TRACKS, |b| {
            write_master(b, id::TRACK_ENTRY, |b| {
                write_uint(b, id::TRACK_NUMBER, 1);
                write_uint(b, id::TRACK_UID, 1);
                write_uint(b, id::TRACK_TYPE, 1);
                write_string(b, id::CODEC_ID, codec_id);
                if let Some(private) = &config.description {
                    write_binary(b, id::CODEC_PRIVATE, private);
                }
                write_uint(
                    b,
                    id::DEFAULT_DURATION,
                    1_000_000_000 / params.fps.max(1) as u64,
                );
                write_master(b, id::VIDEO, |b| {
                    write_uint(b, id::PIXEL_WIDTH, params.width as u64);
                    write_uint(b, id::PIXEL_HEIGHT, params.height as u64);
                });
            });
        });
        self.emit(&tracks)?;
        self.has_track = true;
        tracing::debug!(codec_id, "WebM track created");
        Ok(())
    }

    /// Append one frame as a SimpleBlock.
    pub fn write_block(&mut self, packet: &EncodedPacket) -> FraktalResult<()> {
        if !self.has_track {
            return Err(FraktalError::mux("block written before the track was created"));
        }
        if packet.timestamp_us <= self.last_pts_us {
            return Err(FraktalError::mux(format!(
                "non-increasing block timestamp {} after {}",
                packet.timestamp_us, self.last_pts_us
            )));
        }

        let first = *self.first_pts_us.get_or_insert(packet.timestamp_us);
        let timecode_ms = us_to_ms(packet.timestamp_us - first);

        let needs_cluster = match &self.cluster {
            None => true,
            Some(cluster) => {
                packet.key_frame || timecode_ms - cluster.timecode_ms > i16::MAX as i64
            }
        };
        if needs_cluster {
            self.close_cluster()?;
            self.open_cluster(timecode_ms)?;
        }
        let cluster_timecode = self
            .cluster
            .as_ref()
            .map(|c| c.timecode_ms)
            .unwrap_or(timecode_ms);

        let mut block = Vec::with_capacity(packet.data.len() + 16);
        write_id(&mut block, id::SIMPLE_BLOCK);
        write_size(&mut block, packet.data.len() as u64 + 4);
        block.push(0x81); // track number 1 as vint
        block.extend_from_slice(&((timecode_ms - cluster_timecode) as i16).to_be_bytes());
        block.push(if packet.key_frame { 0x80 } else { 0x00 });
        block.extend_from_slice(&packet.data);
        self.emit(&block)?;

        self.last_pts_us = packet.timestamp_us;
        self.end_us = packet.timestamp_us + packet.duration_us.max(0) - first;
        self.blocks += 1;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Close the last cluster, patch Segment size and Duration.
    pub fn finalize(mut self) -> FraktalResult<(W, MuxSummary)> {
        if !self.has_track {
            return Err(FraktalError::mux("WebM finalized without a video track"));
        }
        self.close_cluster()?;

        let end = self.position;
        let duration_ms = self.end_us as f64 / 1000.0;
        self.patch(self.duration_pos, &duration_ms.to_be_bytes())?;
        let segment_size = end - self.segment_data_start;
        self.patch(self.segment_size_pos, &sized_vint(segment_size))?;
        self.out.seek(SeekFrom::Start(end))?;
        self.out.flush()?;

        let summary = MuxSummary {
            samples: self.blocks,
            duration_secs: duration_ms / 1000.0,
            bytes: end,
        };
        tracing::info!(
            blocks = summary.samples,
            duration_secs = summary.duration_secs,
            bytes = summary.bytes,
            "WebM finalized"
        );
        Ok((self.out, summary))
    }

    fn open_cluster(&mut self, timecode_ms: i64) -> FraktalResult<()> {
        let mut head = Vec::new();
        write_id(&mut head, id::CLUSTER);
        let size_pos = self.position + head.len() as u64;
        write_unknown_size(&mut head);
        let data_start = self.position + head.len() as u64;
        write_uint(&mut head, id::TIMECODE, timecode_ms.max(0) as u64);
        self.emit(&head)?;
        self.cluster = Some(OpenCluster {
            size_pos,
            data_start,
            timecode_ms,
        });
        Ok(())
    }

    fn close_cluster(&mut self) -> FraktalResult<()> {
        if let Some(cluster) = self.cluster.take() {
            let size = self.position - cluster.data_start;
            self.patch(cluster.size_pos, &sized_vint(size))?;
            self.out.seek(SeekFrom::Start(self.position))?;
        }
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> FraktalResult<()> {
        self.out.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    fn patch(&mut self, pos: u64, bytes: &[u8]) -> FraktalResult<()> {
        self.out.seek(SeekFrom::Start(pos))?;
        self.out.write_all(bytes)?;
        Ok(())
    }
}

fn us_to_ms(us: i64) -> i64 {
    (us as f64 / 1000.0).round() as i64
}

fn write_id(buf: &mut Vec<u8>, id: u32) {
    let bytes = id.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(3);
    buf.extend_from_slice(&bytes[skip..]);
}

/// Minimal-length EBML variable size integer.
fn write_size(buf: &mut Vec<u8>, size: u64) {
    let len = (1..=8usize)
        .find(|&len| size < (1u64 << (7 * len)) - 1)
        .unwrap_or(8);
    let marked = size | (1u64 << (7 * len));
    buf.extend_from_slice(&marked.to_be_bytes()[8 - len..]);
}

/// Fixed 8-byte size field for later patching.
fn sized_vint(size: u64) -> [u8; UNKNOWN_SIZE_LEN] {
    let mut out = (size & 0x00FF_FFFF_FFFF_FFFF).to_be_bytes();
    out[0] = 0x01;
    out
}

fn write_unknown_size(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&[0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
}

fn write_uint(buf: &mut Vec<u8>, id: u32, value: u64) {
    let bytes = value.to_be_bytes();
    let skip = bytes.iter().take_while(|&&b| b == 0).count().min(7);
    write_id(buf, id);
    write_size(buf, (8 - skip) as u64);
    buf.extend_from_slice(&bytes[skip..]);
}

fn write_string(buf: &mut Vec<u8>, id: u32, value: &str) {
    write_binary(buf, id, value.as_bytes());
}

fn write_binary(buf: &mut Vec<u8>, id: u32, value: &[u8]) {
    write_id(buf, id);
    write_size(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

fn write_master(buf: &mut Vec<u8>, id: u32, body: impl FnOnce(&mut Vec<u8>)) {
    let mut content = Vec::new();
    body(&mut content);
    write_binary(buf, id, &content);
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fraktal_common::{frame_duration_us, frame_timestamp_us};

    use super::*;

    fn vp9_config() -> CodecConfigRecord {
        CodecConfigRecord {
            codec: VideoCodec::Vp9,
            codec_string: "vp09.00.10.08".to_string(),
            description: None,
        }
    }

    fn params() -> TrackParams {
        TrackParams {
            width: 320,
            height: 240,
            fps: 30,
        }
    }

    fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
        haystack.windows(needle.len()).position(|w| w == needle)
    }

    #[test]
    fn test_vint_sizes() {
        let mut buf = Vec::new();
        write_size(&mut buf, 5);
        assert_eq!(buf, vec![0x85]);
        buf.clear();
        write_size(&mut buf, 127);
        assert_eq!(buf, vec![0x40, 0x7F]);
        assert_eq!(sized_vint(0x1234)[..], [0x01, 0, 0, 0, 0, 0, 0x12, 0x34]);
    }

    #[test]
    fn test_duration_and_segment_size_patched() {
        let mut writer = WebmWriter::new(Cursor::new(Vec::new()), params()).unwrap();
        writer.add_track(&vp9_config()).unwrap();
        for i in 0..3u64 {
            let packet = EncodedPacket::new(
                vec![0x82, 0x49, i as u8],
                frame_timestamp_us(i, 30),
                frame_duration_us(30),
                i == 0,
            );
            writer.write_block(&packet).unwrap();
        }
        let (cursor, summary) = writer.finalize().unwrap();
        let bytes = cursor.into_inner();

        assert_eq!(&bytes[..4], &[0x1A, 0x45, 0xDF, 0xA3]);
        assert_eq!(summary.samples, 3);
        assert!((summary.duration_secs - 0.1).abs() < 1e-9);

        let duration_at = find(&bytes, &[0x44, 0x89, 0x88]).unwrap() + 3;
        let duration = f64::from_be_bytes(bytes[duration_at..duration_at + 8].try_into().unwrap());
        assert_eq!(duration, 100.0);

        let segment_at = find(&bytes, &[0x18, 0x53, 0x80, 0x67]).unwrap() + 4;
        let size = u64::from_be_bytes(bytes[segment_at..segment_at + 8].try_into().unwrap())
            & 0x00FF_FFFF_FFFF_FFFF;
        assert_eq!(size as usize, bytes.len() - (segment_at + 8));
        assert!(find(&bytes, b"V_VP9").is_some());
    }

    #[test]
    fn test_keyframe_starts_cluster() {
        let mut writer = WebmWriter::new(Cursor::new(Vec::new()), params()).unwrap();
        writer.add_track(&vp9_config()).unwrap();
        for (i, key) in [true, false, true, false].into_iter().enumerate() {
            let packet =
                EncodedPacket::new(vec![0x82], frame_timestamp_us(i as u64, 30), 33_333, key);
            writer.write_block(&packet).unwrap();
        }
        let (cursor, _) = writer.finalize().unwrap();
        let bytes = cursor.into_inner();
        let clusters = bytes
            .windows(4)
            .filter(|w| *w == [0x1F, 0x43, 0xB6, 0x75])
            .count();
        assert_eq!(clusters, 2);
    }

    #[test]
    fn test_avc_rejected() {
        let mut writer = WebmWriter::new(Cursor::new(Vec::new()), params()).unwrap();
        let config = CodecConfigRecord {
            codec: VideoCodec::Avc,
            codec_string: "avc1".to_string(),
            description: Some(vec![1, 2, 3, 4]),
        };
        assert!(writer.add_track(&config).is_err());
    }
}
