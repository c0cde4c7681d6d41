//! Container writer selection.

use std::io::{Seek, Write};

use fraktal_bitstream::{CodecConfigRecord, EncodedPacket};
use fraktal_common::FraktalResult;
use fraktal_project_model::{ContainerFormat, ExportConfig};

use crate::mp4::Mp4Writer;
use crate::webm::WebmWriter;

/// Track geometry and rate, known before the first packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackParams {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl TrackParams {
    pub fn from_export(config: &ExportConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            fps: config.fps,
        }
    }
}

/// What a finalized container holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MuxSummary {
    pub samples: u64,
    pub duration_secs: f64,
    pub bytes: u64,
}

/// One of the supported container writers.
#[derive(Debug)]
pub enum ContainerWriter<W: Write + Seek> {
    Mp4(Mp4Writer<W>),
    Webm(WebmWriter<W>),
}

impl<W: Write + Seek> ContainerWriter<W> {
    /// Start a container; headers that do not depend on the codec are
    /// written immediately.
    pub fn new(format: ContainerFormat, out: W, params: TrackParams) -> FraktalResult<Self> {
        Ok(match format {
            ContainerFormat::Mp4 => Self::Mp4(Mp4Writer::new(out, params)?),
            ContainerFormat::Webm => Self::Webm(WebmWriter::new(out, params)?),
        })
    }

    pub fn has_track(&self) -> bool {
        match self {
            Self::Mp4(w) => w.has_track(),
            Self::Webm(w) => w.has_track(),
        }
    }

    /// Create the video track.
    pub fn add_track(&mut self, config: &CodecConfigRecord) -> FraktalResult<()> {
        match self {
            Self::Mp4(w) => w.add_track(config),
            Self::Webm(w) => w.add_track(config),
        }
    }

    pub fn write_packet(&mut self, packet: &EncodedPacket) -> FraktalResult<()> {
        match self {
            Self::Mp4(w) => w.write_sample(packet),
            Self::Webm(w) => w.write_block(packet),
        }
    }

    /// Abandon the container and return the underlying sink as-is.
    pub fn into_inner(self) -> W {
        match self {
            Self::Mp4(w) => w.into_inner(),
            Self::Webm(w) => w.into_inner(),
        }
    }

    /// Write trailing structures and return the underlying sink.
    pub fn finalize(self) -> FraktalResult<(W, MuxSummary)> {
        match self {
            Self::Mp4(w) => w.finalize(),
            Self::Webm(w) => w.finalize(),
        }
    }
}
