//! Annex-B NAL unit scanning and AVCC conversion.
//!
//! Annex-B separates NAL units with `00 00 01` or `00 00 00 01` start
//! codes. MP4 sample data instead prefixes each unit with its length as a
//! 4-byte big-endian integer.

use fraktal_common::{FraktalError, FraktalResult};

/// H.264 NAL unit type constants.
pub mod nal_type {
    /// Non-IDR slice (P frame)
    pub const NON_IDR_SLICE: u8 = 1;
    /// IDR slice (keyframe)
    pub const IDR_SLICE: u8 = 5;
    pub const SEI: u8 = 6;
    /// Sequence parameter set
    pub const SPS: u8 = 7;
    /// Picture parameter set
    pub const PPS: u8 = 8;
    /// Access unit delimiter
    pub const AUD: u8 = 9;
}

/// NAL header syntax of the stream being scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NalSyntax {
    /// 1-byte header, type in the low 5 bits.
    H264,
    /// 2-byte header, type in bits 1..7 of the first byte.
    H265,
}

impl NalSyntax {
    /// NAL unit type from the first header byte.
    pub fn nal_type(self, header: u8) -> u8 {
        match self {
            Self::H264 => header & 0x1F,
            Self::H265 => (header >> 1) & 0x3F,
        }
    }

    /// Type of the access unit delimiter in this syntax.
    pub fn aud_type(self) -> u8 {
        match self {
            Self::H264 => nal_type::AUD,
            Self::H265 => crate::hevc::nal_type::AUD,
        }
    }
}

/// One NAL unit borrowed from an Annex-B buffer (start code removed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    pub nal_type: u8,
    pub payload: &'a [u8],
}

impl NalUnit<'_> {
    pub fn is_idr(&self) -> bool {
        self.nal_type == nal_type::IDR_SLICE
    }

    pub fn is_sps(&self) -> bool {
        self.nal_type == nal_type::SPS
    }

    pub fn is_pps(&self) -> bool {
        self.nal_type == nal_type::PPS
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// A start code found in a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StartCode {
    /// Offset of the first byte of the start code (3 or 4 bytes long).
    pub code_start: usize,
    /// Offset of the first byte of the NAL header.
    pub payload_start: usize,
}

/// Locate every start code in `buf`.
pub(crate) fn find_start_codes(buf: &[u8]) -> Vec<StartCode> {
    let mut codes = Vec::new();
    let mut i = 0;
    while i + 2 < buf.len() {
        if buf[i] == 0 && buf[i + 1] == 0 && buf[i + 2] == 1 {
            let code_start = if i > 0 && buf[i - 1] == 0 { i - 1 } else { i };
            codes.push(StartCode {
                code_start,
                payload_start: i + 3,
            });
            i += 3;
        } else {
            i += 1;
        }
    }
    codes
}

/// Split an Annex-B buffer into NAL payloads, independent of header syntax.
///
/// Bytes before the first start code are ignored. Trailing zero bytes
/// (`trailing_zero_8bits`) are stripped from each payload, and empty
/// payloads are skipped.
pub fn split_annex_b(buf: &[u8]) -> Vec<&[u8]> {
    let codes = find_start_codes(buf);
    let mut payloads = Vec::with_capacity(codes.len());

    for (idx, code) in codes.iter().enumerate() {
        let end = codes
            .get(idx + 1)
            .map(|next| next.code_start)
            .unwrap_or(buf.len());
        if code.payload_start >= end {
            continue;
        }
        let mut payload = &buf[code.payload_start..end];
        while let [rest @ .., 0] = payload {
            payload = rest;
        }
        if !payload.is_empty() {
            payloads.push(payload);
        }
    }

    payloads
}

/// Find all H.264 NAL units in an Annex-B buffer, in stream order.
pub fn find_nalus(buf: &[u8]) -> Vec<NalUnit<'_>> {
    find_nalus_with(buf, NalSyntax::H264)
}

/// Find all NAL units in an Annex-B buffer using the given header syntax.
pub fn find_nalus_with(buf: &[u8], syntax: NalSyntax) -> Vec<NalUnit<'_>> {
    split_annex_b(buf)
        .into_iter()
        .map(|payload| NalUnit {
            nal_type: syntax.nal_type(payload[0]),
            payload,
        })
        .collect()
}

/// Result of converting an Annex-B chunk to length-prefixed form.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AvccChunk {
    /// Every NAL unit, each prefixed with a 4-byte big-endian length.
    pub data: Vec<u8>,

    /// First SPS in the chunk (without start code).
    pub sps: Option<Vec<u8>>,

    /// First PPS in the chunk (without start code).
    pub pps: Option<Vec<u8>>,

    /// Number of NAL units written.
    pub unit_count: usize,
}

/// Length-prefix a sequence of NAL payloads.
pub fn length_prefixed<'a>(units: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for unit in units {
        out.extend_from_slice(&(unit.len() as u32).to_be_bytes());
        out.extend_from_slice(unit);
    }
    out
}

/// Convert an H.264 Annex-B chunk into AVCC sample data.
///
/// All NAL units are kept (parameter sets included), so the output length
/// is the sum of unit lengths plus four bytes per unit. SPS/PPS payloads
/// are also returned separately for building an `avcC` record.
pub fn convert_chunk_to_avcc(buf: &[u8]) -> FraktalResult<AvccChunk> {
    let units = find_nalus(buf);
    if units.is_empty() {
        return Err(FraktalError::bitstream(format!(
            "no Annex-B start code in {}-byte chunk",
            buf.len()
        )));
    }

    let mut chunk = AvccChunk {
        data: Vec::with_capacity(buf.len() + units.len()),
        unit_count: units.len(),
        ..Default::default()
    };
    for unit in &units {
        if unit.is_sps() && chunk.sps.is_none() {
            chunk.sps = Some(unit.payload.to_vec());
        } else if unit.is_pps() && chunk.pps.is_none() {
            chunk.pps = Some(unit.payload.to_vec());
        }
    }
    chunk.data = length_prefixed(units.iter().map(|u| u.payload));
    Ok(chunk)
}
