//! Progressive MP4 writer.
//!
//! Layout: `ftyp`, `mdat` (64-bit size patched at finalize), `moov`. The
//! sample table is held in memory and written once all samples are known.
//!
//! ```text
//! ftyp
//! mdat            sample data, in decode order
//! moov
//!   mvhd
//!   trak
//!     tkhd
//!     mdia
//!       mdhd, hdlr
//!       minf
//!         vmhd, dinf
//!         stbl    stsd, stts, stss, stsc, stsz, stco|co64
//! ```

use std::io::{Seek, SeekFrom, Write};

use fraktal_bitstream::{CodecConfigRecord, EncodedPacket};
use fraktal_common::{us_to_ticks, FraktalError, FraktalResult};
use fraktal_project_model::VideoCodec;

use crate::container::{MuxSummary, TrackParams};

const TRACK_ID: u32 = 1;
const MATRIX: [u32; 9] = [0x00010000, 0, 0, 0, 0x00010000, 0, 0, 0, 0x40000000];

#[derive(Debug, Clone, Copy)]
struct Sample {
    offset: u64,
    size: u32,
    pts_us: i64,
    duration_us: i64,
    key_frame: bool,
}

#[derive(Debug)]
pub struct Mp4Writer<W: Write + Seek> {
    out: W,
    params: TrackParams,
    timescale: u32,
    config: Option<CodecConfigRecord>,
    mdat_start: u64,
    position: u64,
    samples: Vec<Sample>,
}

impl<W: Write + Seek> Mp4Writer<W> {
    /// Write `ftyp` and the `mdat` header.
    pub fn new(mut out: W, params: TrackParams) -> FraktalResult<Self> {
        let start = out.stream_position()?;

        let mut head = Vec::with_capacity(48);
        write_box(&mut head, b"ftyp", |b| {
            b.extend_from_slice(b"isom");
            b.extend_from_slice(&0x200u32.to_be_bytes());
            for brand in [b"isom", b"iso2", b"mp41"] {
                b.extend_from_slice(brand);
            }
        });
        let mdat_start = start + head.len() as u64;
        head.extend_from_slice(&1u32.to_be_bytes()); // size in largesize field
        head.extend_from_slice(b"mdat");
        head.extend_from_slice(&0u64.to_be_bytes());
        out.write_all(&head)?;

        Ok(Self {
            out,
            params,
            timescale: params.fps.max(1) * 1000,
            config: None,
            mdat_start,
            position: start + head.len() as u64,
            samples: Vec::new(),
        })
    }

    pub fn has_track(&self) -> bool {
        self.config.is_some()
    }

    /// Media timescale (ticks per second).
    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    pub fn add_track(&mut self, config: &CodecConfigRecord) -> FraktalResult<()> {
        if self.config.is_some() {
            return Err(FraktalError::mux("MP4 video track already exists"));
        }
        if config.description.is_none() {
            return Err(FraktalError::mux(format!(
                "{} track needs a decoder configuration record",
                config.codec
            )));
        }
        tracing::debug!(codec = %config.codec_string, timescale = self.timescale, "MP4 track created");
        self.config = Some(config.clone());
        Ok(())
    }

    /// Append one sample. Timestamps must strictly increase.
    pub fn write_sample(&mut self, packet: &EncodedPacket) -> FraktalResult<()> {
        if self.config.is_none() {
            return Err(FraktalError::mux("sample written before the track was created"));
        }
        if let Some(last) = self.samples.last() {
            if packet.timestamp_us <= last.pts_us {
                return Err(FraktalError::mux(format!(
                    "non-increasing sample timestamp {} after {}",
                    packet.timestamp_us, last.pts_us
                )));
            }
        }
        let size = u32::try_from(packet.data.len())
            .map_err(|_| FraktalError::mux("sample larger than 4 GiB"))?;

        self.out.write_all(&packet.data)?;
        self.samples.push(Sample {
            offset: self.position,
            size,
            pts_us: packet.timestamp_us,
            duration_us: packet.duration_us,
            key_frame: packet.key_frame,
        });
        self.position += size as u64;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Patch the `mdat` size, append `moov` and return the sink.
    pub fn finalize(mut self) -> FraktalResult<(W, MuxSummary)> {
        let config = self
            .config
            .take()
            .ok_or_else(|| FraktalError::mux("MP4 finalized without a video track"))?;

        let mdat_size = self.position - self.mdat_start;
        self.out.seek(SeekFrom::Start(self.mdat_start + 8))?;
        self.out.write_all(&mdat_size.to_be_bytes())?;
        self.out.seek(SeekFrom::Start(self.position))?;

        let durations = self.sample_durations();
        let total_ticks: u64 = durations.iter().sum();
        let moov = self.build_moov(&config, &durations, total_ticks)?;
        self.out.write_all(&moov)?;
        self.out.flush()?;

        let summary = MuxSummary {
            samples: self.samples.len() as u64,
            duration_secs: total_ticks as f64 / self.timescale as f64,
            bytes: self.position + moov.len() as u64,
        };
        tracing::info!(
            samples = summary.samples,
            duration_secs = summary.duration_secs,
            bytes = summary.bytes,
            "MP4 finalized"
        );
        Ok((self.out, summary))
    }

    /// Per-sample durations in ticks, from successive timestamps so that
    /// rounding never accumulates; the last one uses the packet duration.
    fn sample_durations(&self) -> Vec<u64> {
        let ticks = |us: i64| us_to_ticks(us, self.timescale);
        self.samples
            .iter()
            .enumerate()
            .map(|(i, sample)| {
                let end_us = match self.samples.get(i + 1) {
                    Some(next) => next.pts_us,
                    None => sample.pts_us + sample.duration_us.max(0),
                };
                ticks(end_us).saturating_sub(ticks(sample.pts_us))
            })
            .collect()
    }

    fn build_moov(
        &self,
        config: &CodecConfigRecord,
        durations: &[u64],
        total_ticks: u64,
    ) -> FraktalResult<Vec<u8>> {
        let duration = u32::try_from(total_ticks)
            .map_err(|_| FraktalError::mux("movie duration exceeds 32-bit tick range"))?;
        let TrackParams { width, height, .. } = self.params;
        let timescale = self.timescale;

        let mut moov = Vec::new();
        write_box(&mut moov, b"moov", |b| {
            write_full_box(b, b"mvhd", 0, 0, |b| {
                b.extend_from_slice(&0u32.to_be_bytes()); // creation time
                b.extend_from_slice(&0u32.to_be_bytes()); // modification time
                b.extend_from_slice(&timescale.to_be_bytes());
                b.extend_from_slice(&duration.to_be_bytes());
                b.extend_from_slice(&0x00010000u32.to_be_bytes()); // rate 1.0
                b.extend_from_slice(&0x0100u16.to_be_bytes()); // volume 1.0
                b.extend_from_slice(&[0; 10]);
                write_matrix(b);
                b.extend_from_slice(&[0; 24]);
                b.extend_from_slice(&(TRACK_ID + 1).to_be_bytes());
            });
            write_box(b, b"trak", |b| {
                write_full_box(b, b"tkhd", 0, 0x3, |b| {
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&TRACK_ID.to_be_bytes());
                    b.extend_from_slice(&0u32.to_be_bytes());
                    b.extend_from_slice(&duration.to_be_bytes());
                    b.extend_from_slice(&[0; 8]);
                    b.extend_from_slice(&0u16.to_be_bytes()); // layer
                    b.extend_from_slice(&0u16.to_be_bytes()); // alternate group
                    b.extend_from_slice(&0u16.to_be_bytes()); // volume
                    b.extend_from_slice(&0u16.to_be_bytes());
                    write_matrix(b);
                    b.extend_from_slice(&(width << 16).to_be_bytes());
                    b.extend_from_slice(&(height << 16).to_be_bytes());
                });
                write_box(b, b"mdia", |b| {
                    write_full_box(b, b"mdhd", 0, 0, |b| {
                        b.extend_from_slice(&0u32.to_be_bytes());
                        b.extend_from_slice(&0u32.to_be_bytes());
                        b.extend_from_slice(&timescale.to_be_bytes());
                        b.extend_from_slice(&duration.to_be_bytes());
                        b.extend_from_slice(&0x55c4u16.to_be_bytes()); // und
                        b.extend_from_slice(&0u16.to_be_bytes());
                    });
                    write_full_box(b, b"hdlr", 0, 0, |b| {
                        b.extend_from_slice(&0u32.to_be_bytes());
                        b.extend_from_slice(b"vide");
                        b.extend_from_slice(&[0; 12]);
                        b.extend_from_slice(b"VideoHandler\0");
                    });
                    write_box(b, b"minf", |b| {
                        write_full_box(b, b"vmhd", 0, 1, |b| {
                            b.extend_from_slice(&[0; 8]);
                        });
                        write_box(b, b"dinf", |b| {
                            write_full_box(b, b"dref", 0, 0, |b| {
                                b.extend_from_slice(&1u32.to_be_bytes());
                                write_full_box(b, b"url ", 0, 1, |_| {});
                            });
                        });
                        write_box(b, b"stbl", |b| {
                            self.write_stsd(b, config, width, height);
                            write_stts(b, durations);
                            self.write_stss(b);
                            write_full_box(b, b"stsc", 0, 0, |b| {
                                if self.samples.is_empty() {
                                    b.extend_from_slice(&0u32.to_be_bytes());
                                } else {
                                    b.extend_from_slice(&1u32.to_be_bytes());
                                    b.extend_from_slice(&1u32.to_be_bytes()); // first chunk
                                    b.extend_from_slice(&1u32.to_be_bytes()); // samples per chunk
                                    b.extend_from_slice(&1u32.to_be_bytes()); // description index
                                }
                            });
                            write_full_box(b, b"stsz", 0, 0, |b| {
                                b.extend_from_slice(&0u32.to_be_bytes());
                                b.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
                                for sample in &self.samples {
                                    b.extend_from_slice(&sample.size.to_be_bytes());
                                }
                            });
                            self.write_chunk_offsets(b);
                        });
                    });
                });
            });
        });
        Ok(moov)
    }

    fn write_stsd(&self, buf: &mut Vec<u8>, config: &CodecConfigRecord, width: u32, height: u32) {
        let (entry, config_box): (&[u8; 4], &[u8; 4]) = match config.codec {
            VideoCodec::Avc => (b"avc1", b"avcC"),
            VideoCodec::Hevc => (b"hev1", b"hvcC"),
            VideoCodec::Av1 | VideoCodec::Vp9 => (b"av01", b"av1C"),
        };
        let description = config.description.as_deref().unwrap_or_default();

        write_full_box(buf, b"stsd", 0, 0, |b| {
            b.extend_from_slice(&1u32.to_be_bytes());
            write_box(b, entry, |b| {
                b.extend_from_slice(&[0; 6]);
                b.extend_from_slice(&1u16.to_be_bytes()); // data reference index
                b.extend_from_slice(&[0; 16]);
                b.extend_from_slice(&(width as u16).to_be_bytes());
                b.extend_from_slice(&(height as u16).to_be_bytes());
                b.extend_from_slice(&0x00480000u32.to_be_bytes()); // 72 dpi
                b.extend_from_slice(&0x00480000u32.to_be_bytes());
                b.extend_from_slice(&0u32.to_be_bytes());
                b.extend_from_slice(&1u16.to_be_bytes()); // frame count
                let mut compressor = [0u8; 32];
                let name = b"Fraktal";
                compressor[0] = name.len() as u8;
                compressor[1..1 + name.len()].copy_from_slice(name);
                b.extend_from_slice(&compressor);
                b.extend_from_slice(&0x0018u16.to_be_bytes()); // depth
                b.extend_from_slice(&(-1i16).to_be_bytes());
                write_box(b, config_box, |b| b.extend_from_slice(description));
            });
        });
    }

    fn write_stss(&self, buf: &mut Vec<u8>) {
        let keys: Vec<u32> = self
            .samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.key_frame)
            .map(|(i, _)| i as u32 + 1)
            .collect();
        write_full_box(buf, b"stss", 0, 0, |b| {
            b.extend_from_slice(&(keys.len() as u32).to_be_bytes());
            for key in keys {
                b.extend_from_slice(&key.to_be_bytes());
            }
        });
    }

    fn write_chunk_offsets(&self, buf: &mut Vec<u8>) {
        let large = self
            .samples
            .last()
            .is_some_and(|s| s.offset > u32::MAX as u64);
        let kind = if large { b"co64" } else { b"stco" };
        write_full_box(buf, kind, 0, 0, |b| {
            b.extend_from_slice(&(self.samples.len() as u32).to_be_bytes());
            for sample in &self.samples {
                if large {
                    b.extend_from_slice(&sample.offset.to_be_bytes());
                } else {
                    b.extend_from_slice(&(sample.offset as u32).to_be_bytes());
                }
            }
        });
    }
}

fn write_stts(buf: &mut Vec<u8>, durations: &[u64]) {
    let mut runs: Vec<(u32, u32)> = Vec::new();
    for &delta in durations {
        let delta = delta.min(u32::MAX as u64) as u32;
        match runs.last_mut() {
            Some((count, last)) if *last == delta => *count += 1,
            _ => runs.push((1, delta)),
        }
    }
    write_full_box(buf, b"stts", 0, 0, |b| {
        b.extend_from_slice(&(runs.len() as u32).to_be_bytes());
        for (count, delta) in runs {
            b.extend_from_slice(&count.to_be_bytes());
            b.extend_from_slice(&delta.to_be_bytes());
        }
    });
}

fn write_matrix(buf: &mut Vec<u8>) {
    for value in MATRIX {
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

fn write_box(buf: &mut Vec<u8>, kind: &[u8; 4], body: impl FnOnce(&mut Vec<u8>)) {
    let start = buf.len();
    buf.extend_from_slice(&[0; 4]);
    buf.extend_from_slice(kind);
    body(buf);
    let size = (buf.len() - start) as u32;
    buf[start..start + 4].copy_from_slice(&size.to_be_bytes());
}

fn write_full_box(
    buf: &mut Vec<u8>,
    kind: &[u8; 4],
    version: u8,
    flags: u32,
    body: impl FnOnce(&mut Vec<u8>),
) {
    write_box(buf, kind, |b| {
        b.push(version);
        b.extend_from_slice(&flags.to_be_bytes()[1..]);
        body(b);
    });
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use fraktal_common::{frame_duration_us, frame_timestamp_us};

    use super::*;

    /// Find a box by path (e.g. `["moov", "mvhd"]`) and return its body.
    fn find_box<'a>(mut data: &'a [u8], path: &[&str]) -> Option<&'a [u8]> {
        let mut remaining = path;
        loop {
            let (name, rest) = remaining.split_first()?;
            let mut found = None;
            let mut offset = 0;
            while offset + 8 <= data.len() {
                let mut size = u32::from_be_bytes(data[offset..offset + 4].try_into().ok()?) as usize;
                let kind = &data[offset + 4..offset + 8];
                let mut header = 8;
                if size == 1 {
                    size = u64::from_be_bytes(data[offset + 8..offset + 16].try_into().ok()?) as usize;
                    header = 16;
                }
                if size < header || offset + size > data.len() {
                    return None;
                }
                if kind == name.as_bytes() {
                    found = Some(&data[offset + header..offset + size]);
                    break;
                }
                offset += size;
            }
            data = found?;
            if rest.is_empty() {
                return Some(data);
            }
            remaining = rest;
        }
    }

    fn stbl_path(leaf: &'static str) -> Vec<&'static str> {
        vec!["moov", "trak", "mdia", "minf", "stbl", leaf]
    }

    fn avc_config() -> CodecConfigRecord {
        CodecConfigRecord {
            codec: VideoCodec::Avc,
            codec_string: "avc1.64001f".to_string(),
            description: Some(vec![0x01, 0x64, 0x00, 0x1F, 0xFF, 0xE1, 0x00, 0x00, 0x01, 0x00, 0x00]),
        }
    }

    fn write_scenario(frames: u64) -> Vec<u8> {
        let params = TrackParams {
            width: 640,
            height: 360,
            fps: 30,
        };
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()), params).unwrap();
        writer.add_track(&avc_config()).unwrap();
        for i in 0..frames {
            let packet = EncodedPacket::new(
                vec![0, 0, 0, 2, 0x65, i as u8],
                frame_timestamp_us(i, 30),
                frame_duration_us(30),
                i == 0,
            );
            writer.write_sample(&packet).unwrap();
        }
        let (cursor, summary) = writer.finalize().unwrap();
        assert_eq!(summary.samples, frames);
        cursor.into_inner()
    }

    #[test]
    fn test_mvhd_duration_is_exact() {
        let bytes = write_scenario(10);
        let mvhd = find_box(&bytes, &["moov", "mvhd"]).unwrap();
        let timescale = u32::from_be_bytes(mvhd[12..16].try_into().unwrap());
        let duration = u32::from_be_bytes(mvhd[16..20].try_into().unwrap());
        assert_eq!(timescale, 30_000);
        assert_eq!(duration, 10_000);
    }

    #[test]
    fn test_sample_tables() {
        let bytes = write_scenario(10);
        let stts = find_box(&bytes, &stbl_path("stts")).unwrap();
        // one run of ten 1000-tick samples
        assert_eq!(&stts[4..16], &[0, 0, 0, 1, 0, 0, 0, 10, 0, 0, 0x03, 0xE8]);

        let stss = find_box(&bytes, &stbl_path("stss")).unwrap();
        assert_eq!(&stss[4..12], &[0, 0, 0, 1, 0, 0, 0, 1]);

        let stco = find_box(&bytes, &stbl_path("stco")).unwrap();
        let first = u32::from_be_bytes(stco[8..12].try_into().unwrap()) as usize;
        assert_eq!(&bytes[first..first + 6], &[0, 0, 0, 2, 0x65, 0]);

        let stsd = find_box(&bytes, &stbl_path("stsd")).unwrap();
        assert_eq!(&stsd[12..16], b"avc1");
    }

    #[test]
    fn test_mdat_size_patched() {
        let bytes = write_scenario(3);
        let mdat = find_box(&bytes, &["mdat"]).unwrap();
        assert_eq!(mdat.len(), 3 * 6);
    }

    #[test]
    fn test_out_of_order_sample_rejected() {
        let params = TrackParams {
            width: 64,
            height: 64,
            fps: 30,
        };
        let mut writer = Mp4Writer::new(Cursor::new(Vec::new()), params).unwrap();
        let packet = EncodedPacket::new(vec![1], 33_333, 33_333, true);
        assert!(writer.write_sample(&packet).is_err());

        writer.add_track(&avc_config()).unwrap();
        writer.write_sample(&packet).unwrap();
        let earlier = EncodedPacket::new(vec![2], 0, 33_333, false);
        assert!(writer.write_sample(&earlier).is_err());
    }
}
