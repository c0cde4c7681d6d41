//! HEVC parameter sets and `hvcC` (HEVCDecoderConfigurationRecord) synthesis.

use fraktal_common::{FraktalError, FraktalResult};

/// H.265 NAL unit type constants.
pub mod nal_type {
    pub const IDR_W_RADL: u8 = 19;
    pub const IDR_N_LP: u8 = 20;
    pub const CRA: u8 = 21;
    pub const VPS: u8 = 32;
    pub const SPS: u8 = 33;
    pub const PPS: u8 = 34;
    pub const AUD: u8 = 35;

    /// Intra random access point range (BLA, IDR, CRA and reserved IRAP types).
    pub fn is_irap(nal_type: u8) -> bool {
        (16..=23).contains(&nal_type)
    }
}

/// Remove `emulation_prevention_three_byte`s (`00 00 03` → `00 00`).
pub fn remove_emulation_prevention(nal: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(nal.len());
    let mut zeros = 0;
    for &byte in nal {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.push(byte);
    }
    out
}

/// Fields of an HEVC SPS needed for `hvcC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HevcSpsInfo {
    pub max_sub_layers: u8,
    pub temporal_id_nested: bool,
    /// General profile_tier_level: space/tier/profile byte, 4 compat bytes,
    /// 6 constraint bytes and the level byte.
    pub profile_tier_level: [u8; 12],
}

impl HevcSpsInfo {
    pub fn profile_idc(&self) -> u8 {
        self.profile_tier_level[0] & 0x1F
    }

    pub fn tier_flag(&self) -> bool {
        self.profile_tier_level[0] & 0x20 != 0
    }

    pub fn level_idc(&self) -> u8 {
        self.profile_tier_level[11]
    }
}

/// Parse the leading fixed-length part of an SPS (2-byte NAL header included).
pub fn parse_sps(sps: &[u8]) -> FraktalResult<HevcSpsInfo> {
    let rbsp = remove_emulation_prevention(sps);
    if rbsp.len() < 15 {
        return Err(FraktalError::bitstream(format!(
            "HEVC SPS too short ({} bytes)",
            rbsp.len()
        )));
    }
    let mut profile_tier_level = [0u8; 12];
    profile_tier_level.copy_from_slice(&rbsp[3..15]);
    Ok(HevcSpsInfo {
        max_sub_layers: ((rbsp[2] >> 1) & 0x07) + 1,
        temporal_id_nested: rbsp[2] & 0x01 != 0,
        profile_tier_level,
    })
}

/// Build an `hvcC` record body with one VPS, SPS and PPS array.
///
/// Chroma format and bit depth are written as 4:2:0 8-bit, the only pixel
/// format the encoders are configured to produce.
pub fn create_hvcc_description(vps: &[u8], sps: &[u8], pps: &[u8]) -> FraktalResult<Vec<u8>> {
    let info = parse_sps(sps)?;

    let mut out = Vec::with_capacity(23 + 15 + vps.len() + sps.len() + pps.len());
    out.push(0x01);
    out.extend_from_slice(&info.profile_tier_level[..11]);
    out.push(info.level_idc());
    out.extend_from_slice(&[0xF0, 0x00]); // min_spatial_segmentation_idc = 0
    out.push(0xFC); // parallelismType = 0
    out.push(0xFC | 0x01); // chroma_format_idc = 1
    out.push(0xF8); // bit_depth_luma_minus8 = 0
    out.push(0xF8); // bit_depth_chroma_minus8 = 0
    out.extend_from_slice(&[0x00, 0x00]); // avgFrameRate
    out.push((info.max_sub_layers << 3) | ((info.temporal_id_nested as u8) << 2) | 0x03);
    out.push(3);

    for (ty, nal) in [
        (nal_type::VPS, vps),
        (nal_type::SPS, sps),
        (nal_type::PPS, pps),
    ] {
        if nal.len() > u16::MAX as usize {
            return Err(FraktalError::bitstream("parameter set exceeds 65535 bytes"));
        }
        out.push(0x80 | ty);
        out.extend_from_slice(&1u16.to_be_bytes());
        out.extend_from_slice(&(nal.len() as u16).to_be_bytes());
        out.extend_from_slice(nal);
    }
    Ok(out)
}

/// `hev1.<profile>.<compat>.<tier><level>` codec string.
pub fn hevc_codec_string(info: &HevcSpsInfo) -> String {
    let compat = u32::from_be_bytes([
        info.profile_tier_level[1],
        info.profile_tier_level[2],
        info.profile_tier_level[3],
        info.profile_tier_level[4],
    ])
    .reverse_bits();
    format!(
        "hev1.{}.{:X}.{}{}",
        info.profile_idc(),
        compat,
        if info.tier_flag() { 'H' } else { 'L' },
        info.level_idc()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Main profile, level 3.1, one sub-layer, temporal id nesting set.
    const SPS: [u8; 20] = [
        0x42, 0x01, 0x01, 0x01, 0x60, 0x00, 0x00, 0x03, 0x00, 0x90, 0x00, 0x00, 0x03, 0x00,
        0x00, 0x03, 0x00, 0x5D, 0xA0, 0x02,
    ];

    #[test]
    fn test_emulation_prevention_removed() {
        assert_eq!(
            remove_emulation_prevention(&[0x00, 0x00, 0x03, 0x01, 0x00, 0x00, 0x03, 0x00]),
            vec![0x00, 0x00, 0x01, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_parse_sps_profile_tier_level() {
        let info = parse_sps(&SPS).unwrap();
        assert_eq!(info.max_sub_layers, 1);
        assert!(info.temporal_id_nested);
        assert_eq!(info.profile_idc(), 1);
        assert!(!info.tier_flag());
        assert_eq!(info.level_idc(), 93);
        assert_eq!(info.profile_tier_level[5], 0x90);
        assert_eq!(hevc_codec_string(&info), "hev1.1.6.L93");
    }

    #[test]
    fn test_hvcc_arrays() {
        let vps = [0x40, 0x01, 0x0C];
        let pps = [0x44, 0x01, 0xC1];
        let hvcc = create_hvcc_description(&vps, &SPS, &pps).unwrap();

        assert_eq!(hvcc[0], 0x01);
        assert_eq!(hvcc[1], 0x01);
        assert_eq!(hvcc[21], (1 << 3) | (1 << 2) | 0x03);
        assert_eq!(hvcc[22], 3);
        assert_eq!(&hvcc[23..28], &[0x80 | 32, 0x00, 0x01, 0x00, 0x03]);
        assert_eq!(hvcc.len(), 23 + 3 * 5 + vps.len() + SPS.len() + pps.len());
    }

    #[test]
    fn test_irap_range() {
        assert!(nal_type::is_irap(nal_type::IDR_W_RADL));
        assert!(nal_type::is_irap(nal_type::CRA));
        assert!(!nal_type::is_irap(1));
    }
}
