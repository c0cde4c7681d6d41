//! AV1 OBU parsing and `av1C` (AV1CodecConfigurationRecord) synthesis.

use fraktal_common::{FraktalError, FraktalResult};

/// AV1 OBU type constants.
pub mod obu_type {
    pub const SEQUENCE_HEADER: u8 = 1;
    pub const TEMPORAL_DELIMITER: u8 = 2;
    pub const FRAME_HEADER: u8 = 3;
    pub const TILE_GROUP: u8 = 4;
    pub const FRAME: u8 = 6;
}

/// One OBU borrowed from a temporal unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Obu<'a> {
    pub obu_type: u8,
    /// Complete OBU including its header.
    pub data: &'a [u8],
    /// OBU payload (after header and size field).
    pub payload: &'a [u8],
}

/// Read an unsigned LEB128 value. Returns `(value, bytes_consumed)`.
pub fn read_leb128(data: &[u8]) -> Option<(u64, usize)> {
    let mut value = 0u64;
    for (i, &byte) in data.iter().take(8).enumerate() {
        value |= ((byte & 0x7F) as u64) << (i * 7);
        if byte & 0x80 == 0 {
            return Some((value, i + 1));
        }
    }
    None
}

/// Split a temporal unit (low-overhead bitstream format) into OBUs.
pub fn parse_obus(data: &[u8]) -> FraktalResult<Vec<Obu<'_>>> {
    let mut obus = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let header = data[offset];
        let obu_type = (header >> 3) & 0x0F;
        let has_extension = header & 0x04 != 0;
        let has_size = header & 0x02 != 0;

        let mut header_len = 1 + has_extension as usize;
        let payload_len = if has_size {
            let (size, leb_len) = data
                .get(offset + header_len..)
                .and_then(read_leb128)
                .ok_or_else(|| FraktalError::bitstream("truncated OBU size field"))?;
            header_len += leb_len;
            size as usize
        } else {
            data.len().saturating_sub(offset + header_len)
        };

        let end = offset + header_len + payload_len;
        if end > data.len() {
            return Err(FraktalError::bitstream(format!(
                "OBU of type {obu_type} overruns buffer ({end} > {})",
                data.len()
            )));
        }
        obus.push(Obu {
            obu_type,
            data: &data[offset..end],
            payload: &data[offset + header_len..end],
        });
        offset = end;
    }

    Ok(obus)
}

/// The first sequence header OBU in a temporal unit, if any.
pub fn find_sequence_header(data: &[u8]) -> Option<Obu<'_>> {
    parse_obus(data)
        .ok()?
        .into_iter()
        .find(|obu| obu.obu_type == obu_type::SEQUENCE_HEADER)
}

/// MSB-first bit reader over a byte slice.
#[derive(Debug)]
pub struct BitReader<'a> {
    data: &'a [u8],
    position: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, position: 0 }
    }

    pub fn read_bit(&mut self) -> FraktalResult<bool> {
        let byte = self
            .data
            .get(self.position / 8)
            .ok_or_else(|| FraktalError::bitstream("bit reader ran past end of data"))?;
        let bit = (byte >> (7 - self.position % 8)) & 1;
        self.position += 1;
        Ok(bit == 1)
    }

    /// Read `n` bits (n <= 32) as an unsigned value.
    pub fn read_bits(&mut self, n: u32) -> FraktalResult<u32> {
        let mut value = 0u32;
        for _ in 0..n {
            value = (value << 1) | self.read_bit()? as u32;
        }
        Ok(value)
    }

    pub fn skip(&mut self, n: usize) -> FraktalResult<()> {
        if self.position + n > self.data.len() * 8 {
            return Err(FraktalError::bitstream("bit reader ran past end of data"));
        }
        self.position += n;
        Ok(())
    }

    /// Variable length unsigned code (`uvlc()`).
    pub fn read_uvlc(&mut self) -> FraktalResult<u32> {
        let mut leading_zeros = 0u32;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros >= 32 {
                return Ok(u32::MAX);
            }
        }
        let value = self.read_bits(leading_zeros)?;
        Ok(value + ((1u64 << leading_zeros) - 1) as u32)
    }
}

/// Fields of a sequence header needed for `av1C`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceHeaderInfo {
    pub profile: u8,
    pub level: u8,
    pub tier: u8,
}

/// Parse profile, level and tier of operating point 0.
pub fn parse_sequence_header(payload: &[u8]) -> FraktalResult<SequenceHeaderInfo> {
    let mut reader = BitReader::new(payload);
    let profile = reader.read_bits(3)? as u8;
    let _still_picture = reader.read_bit()?;
    let reduced_still_picture_header = reader.read_bit()?;

    if reduced_still_picture_header {
        let level = reader.read_bits(5)? as u8;
        return Ok(SequenceHeaderInfo {
            profile,
            level,
            tier: 0,
        });
    }

    let timing_info_present = reader.read_bit()?;
    if timing_info_present {
        reader.skip(64)?; // num_units_in_display_tick, time_scale
        if reader.read_bit()? {
            reader.read_uvlc()?; // num_ticks_per_picture_minus_1
        }
        let decoder_model_info_present = reader.read_bit()?;
        if decoder_model_info_present {
            // buffer_delay_length_minus_1, num_units_in_decoding_tick,
            // buffer_removal_time_length_minus_1, frame_presentation_time_length_minus_1
            reader.skip(5 + 32 + 5 + 5)?;
        }
    }
    let _initial_display_delay_present = reader.read_bit()?;
    let _operating_points_cnt = reader.read_bits(5)? + 1;
    let _operating_point_idc = reader.read_bits(12)?;
    let level = reader.read_bits(5)? as u8;
    let tier = if level > 7 {
        reader.read_bit()? as u8
    } else {
        0
    };
    Ok(SequenceHeaderInfo {
        profile,
        level,
        tier,
    })
}

/// Build an `av1C` record body from a complete sequence header OBU.
///
/// Color fields are written as 4:2:0 8-bit (`0x0C`), matching the encoder
/// pixel format.
pub fn create_av1c_description(sequence_header: &Obu<'_>) -> FraktalResult<Vec<u8>> {
    let info = parse_sequence_header(sequence_header.payload)?;

    let mut out = Vec::with_capacity(4 + sequence_header.data.len());
    out.push(0x81); // marker + version 1
    out.push((info.profile << 5) | (info.level & 0x1F));
    out.push((info.tier << 7) | 0x0C);
    out.push(0x00); // no initial_presentation_delay
    out.extend_from_slice(sequence_header.data);
    Ok(out)
}

/// `av01.<profile>.<level><tier>.08` codec string.
pub fn av1_codec_string(info: &SequenceHeaderInfo) -> String {
    format!(
        "av01.{}.{:02}{}.08",
        info.profile,
        info.level,
        if info.tier == 1 { 'H' } else { 'M' }
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    // Sequence header OBU: profile 0, no timing info, one operating point,
    // level 8 (4.0), tier 0.
    fn sequence_header_obu() -> Vec<u8> {
        // profile(3) still(1) reduced(1) timing(1) display_delay(1)
        // op_cnt(5) idc(12) level(5)=01000 tier(1)
        let payload = [0x00, 0x00, 0x00, 0x40, 0x00];
        let mut obu = vec![(obu_type::SEQUENCE_HEADER << 3) | 0x02, payload.len() as u8];
        obu.extend_from_slice(&payload);
        obu
    }

    #[test]
    fn test_parse_obus_with_sizes() {
        let mut data = vec![(obu_type::TEMPORAL_DELIMITER << 3) | 0x02, 0x00];
        data.extend_from_slice(&sequence_header_obu());
        let obus = parse_obus(&data).unwrap();
        assert_eq!(obus.len(), 2);
        assert_eq!(obus[0].obu_type, obu_type::TEMPORAL_DELIMITER);
        assert_eq!(obus[1].obu_type, obu_type::SEQUENCE_HEADER);
        assert_eq!(obus[1].payload.len(), 5);
    }

    #[test]
    fn test_truncated_obu_is_error() {
        let data = [(obu_type::FRAME << 3) | 0x02, 0x10, 0x00];
        assert!(parse_obus(&data).is_err());
    }

    #[test]
    fn test_sequence_header_level_and_tier() {
        let obu_bytes = sequence_header_obu();
        let obu = find_sequence_header(&obu_bytes).unwrap();
        let info = parse_sequence_header(obu.payload).unwrap();
        assert_eq!(
            info,
            SequenceHeaderInfo {
                profile: 0,
                level: 8,
                tier: 0
            }
        );
        assert_eq!(av1_codec_string(&info), "av01.0.08M.08");
    }

    #[test]
    fn test_av1c_layout() {
        let obu_bytes = sequence_header_obu();
        let obu = find_sequence_header(&obu_bytes).unwrap();
        let av1c = create_av1c_description(&obu).unwrap();
        assert_eq!(&av1c[..4], &[0x81, 0x08, 0x0C, 0x00]);
        assert_eq!(&av1c[4..], obu_bytes.as_slice());
    }

    #[test]
    fn test_uvlc() {
        // 00101 → leading zeros 2, value bits 01 → 1 + 3 = 4
        let mut reader = BitReader::new(&[0b0010_1000]);
        assert_eq!(reader.read_uvlc().unwrap(), 4);
    }
}
