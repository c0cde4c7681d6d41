//! `avcC` (AVCDecoderConfigurationRecord) synthesis.

use fraktal_common::{FraktalError, FraktalResult};

/// Build an `avcC` record body from one SPS and one PPS (NAL payloads
/// without start codes).
///
/// Layout: version 1, profile/compat/level copied from SPS bytes 1..4,
/// `0xFF` (4-byte NAL lengths), `0xE1` (one SPS), SPS length and bytes,
/// one PPS, PPS length and bytes.
pub fn create_avcc_description(sps: &[u8], pps: &[u8]) -> FraktalResult<Vec<u8>> {
    if sps.len() < 4 {
        return Err(FraktalError::bitstream(format!(
            "SPS too short for avcC ({} bytes)",
            sps.len()
        )));
    }
    if pps.is_empty() {
        return Err(FraktalError::bitstream("empty PPS"));
    }
    if sps.len() > u16::MAX as usize || pps.len() > u16::MAX as usize {
        return Err(FraktalError::bitstream("parameter set exceeds 65535 bytes"));
    }

    let mut out = Vec::with_capacity(11 + sps.len() + pps.len());
    out.push(0x01);
    out.extend_from_slice(&sps[1..4]);
    out.push(0xFF);
    out.push(0xE1);
    out.extend_from_slice(&(sps.len() as u16).to_be_bytes());
    out.extend_from_slice(sps);
    out.push(0x01);
    out.extend_from_slice(&(pps.len() as u16).to_be_bytes());
    out.extend_from_slice(pps);
    Ok(out)
}

/// `avc1.PPCCLL` codec string from an SPS payload.
pub fn avc_codec_string(sps: &[u8]) -> String {
    match sps.get(1..4) {
        Some(bytes) => format!("avc1.{:02x}{:02x}{:02x}", bytes[0], bytes[1], bytes[2]),
        None => "avc1".to_string(),
    }
}
