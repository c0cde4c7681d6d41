//! Container/codec format strategies.
//!
//! Each supported `(container, codec)` pair has one strategy deciding how
//! encoder packets are rewritten for the container and how the codec
//! configuration record is derived.
//!
//! | Strategy  | Packet rewrite        | Configuration record          |
//! |-----------|-----------------------|-------------------------------|
//! | `AvcMp4`  | Annex-B → AVCC        | `avcC` from SPS + PPS         |
//! | `HevcMp4` | Annex-B → length-pfx  | `hvcC` from VPS + SPS + PPS   |
//! | `Av1Mp4`  | drop temporal delims  | `av1C` from sequence header   |
//! | `Vp9Webm` | none                  | none (codec id only)          |

use fraktal_common::{FraktalError, FraktalResult};
use fraktal_project_model::{ContainerFormat, VideoCodec};

use crate::av1::{self, obu_type};
use crate::avcc::{avc_codec_string, create_avcc_description};
use crate::hevc::{self, create_hvcc_description, hevc_codec_string};
use crate::nal::{self, find_nalus_with, length_prefixed, NalSyntax};
use crate::packet::{CodecConfigRecord, EncodedPacket};
use crate::vp9::vp9_codec_string;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatStrategy {
    AvcMp4,
    HevcMp4,
    Av1Mp4,
    Vp9Webm,
}

impl FormatStrategy {
    /// Look up the strategy for a container/codec pair.
    pub fn for_format(container: ContainerFormat, codec: VideoCodec) -> FraktalResult<Self> {
        match (container, codec) {
            (ContainerFormat::Mp4, VideoCodec::Avc) => Ok(Self::AvcMp4),
            (ContainerFormat::Mp4, VideoCodec::Hevc) => Ok(Self::HevcMp4),
            (ContainerFormat::Mp4, VideoCodec::Av1) => Ok(Self::Av1Mp4),
            (ContainerFormat::Webm, VideoCodec::Vp9) => Ok(Self::Vp9Webm),
            (container, codec) => Err(FraktalError::unsupported(format!(
                "no muxing strategy for {codec} in {}",
                container.extension()
            ))),
        }
    }

    pub fn codec(self) -> VideoCodec {
        match self {
            Self::AvcMp4 => VideoCodec::Avc,
            Self::HevcMp4 => VideoCodec::Hevc,
            Self::Av1Mp4 => VideoCodec::Av1,
            Self::Vp9Webm => VideoCodec::Vp9,
        }
    }

    pub fn container(self) -> ContainerFormat {
        match self {
            Self::Vp9Webm => ContainerFormat::Webm,
            _ => ContainerFormat::Mp4,
        }
    }

    /// Rewrite packet data in place for the container, returning any
    /// parameter sets found in it.
    pub fn convert(self, packet: &mut EncodedPacket) -> FraktalResult<ParameterSets> {
        let mut params = ParameterSets::default();
        match self {
            Self::AvcMp4 => {
                let chunk = nal::convert_chunk_to_avcc(&packet.data)?;
                params.sps = chunk.sps;
                params.pps = chunk.pps;
                packet.data = chunk.data;
            }
            Self::HevcMp4 => {
                let units = find_nalus_with(&packet.data, NalSyntax::H265);
                if units.is_empty() {
                    return Err(FraktalError::bitstream(format!(
                        "no Annex-B start code in {}-byte HEVC chunk",
                        packet.data.len()
                    )));
                }
                for unit in &units {
                    match unit.nal_type {
                        hevc::nal_type::VPS => params.vps = Some(unit.payload.to_vec()),
                        hevc::nal_type::SPS => params.sps = Some(unit.payload.to_vec()),
                        hevc::nal_type::PPS => params.pps = Some(unit.payload.to_vec()),
                        _ => {}
                    }
                }
                // Delimiters carry no picture data and are not stored in MP4 samples.
                packet.data = length_prefixed(
                    units
                        .iter()
                        .filter(|u| u.nal_type != hevc::nal_type::AUD)
                        .map(|u| u.payload),
                );
            }
            Self::Av1Mp4 => {
                let obus = av1::parse_obus(&packet.data)?;
                let mut data = Vec::with_capacity(packet.data.len());
                for obu in &obus {
                    match obu.obu_type {
                        obu_type::TEMPORAL_DELIMITER => continue,
                        obu_type::SEQUENCE_HEADER if params.sequence_header.is_none() => {
                            params.sequence_header = Some(obu.data.to_vec());
                        }
                        _ => {}
                    }
                    data.extend_from_slice(obu.data);
                }
                packet.data = data;
            }
            Self::Vp9Webm => {}
        }
        Ok(params)
    }

    /// Derive the configuration record from a keyframe's parameter sets, or
    /// fall back to an encoder-supplied description.
    pub fn extract_config(
        self,
        params: &ParameterSets,
        supplied_description: Option<&[u8]>,
    ) -> FraktalResult<Option<CodecConfigRecord>> {
        let codec = self.codec();
        let record = |codec_string: String, description: Vec<u8>| CodecConfigRecord {
            codec,
            codec_string,
            description: Some(description),
        };

        let config = match self {
            Self::AvcMp4 => match (&params.sps, &params.pps) {
                (Some(sps), Some(pps)) => Some(record(
                    avc_codec_string(sps),
                    create_avcc_description(sps, pps)?,
                )),
                _ => supplied_description
                    .filter(|d| d.len() >= 4)
                    .map(|d| record(avc_codec_string(d), d.to_vec())),
            },
            Self::HevcMp4 => match (&params.vps, &params.sps, &params.pps) {
                (Some(vps), Some(sps), Some(pps)) => {
                    let info = hevc::parse_sps(sps)?;
                    Some(record(
                        hevc_codec_string(&info),
                        create_hvcc_description(vps, sps, pps)?,
                    ))
                }
                _ => supplied_description.map(|d| record("hev1".to_string(), d.to_vec())),
            },
            Self::Av1Mp4 => match &params.sequence_header {
                Some(data) => {
                    let obus = av1::parse_obus(data)?;
                    let obu = obus.first().ok_or_else(|| {
                        FraktalError::bitstream("empty AV1 sequence header")
                    })?;
                    let info = av1::parse_sequence_header(obu.payload)?;
                    Some(record(
                        av1::av1_codec_string(&info),
                        av1::create_av1c_description(obu)?,
                    ))
                }
                None => supplied_description.map(|d| record("av01".to_string(), d.to_vec())),
            },
            Self::Vp9Webm => Some(CodecConfigRecord {
                codec,
                codec_string: vp9_codec_string(0),
                description: None,
            }),
        };
        Ok(config)
    }
}

/// Parameter sets found in one packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterSets {
    pub vps: Option<Vec<u8>>,
    pub sps: Option<Vec<u8>>,
    pub pps: Option<Vec<u8>>,
    /// Complete AV1 sequence header OBU.
    pub sequence_header: Option<Vec<u8>>,
}

/// Per-session packet converter.
///
/// The configuration record is computed at most once, from the first
/// keyframe that carries parameter sets, and reused for the rest of the
/// session.
#[derive(Debug)]
pub struct BitstreamConverter {
    strategy: FormatStrategy,
    config: Option<CodecConfigRecord>,
    packets: u64,
}

impl BitstreamConverter {
    pub fn new(strategy: FormatStrategy) -> Self {
        Self {
            strategy,
            config: None,
            packets: 0,
        }
    }

    pub fn strategy(&self) -> FormatStrategy {
        self.strategy
    }

    /// Configuration record, once known.
    pub fn config(&self) -> Option<&CodecConfigRecord> {
        self.config.as_ref()
    }

    /// Number of packets converted so far.
    pub fn packets(&self) -> u64 {
        self.packets
    }

    /// Rewrite one packet for the container. Returns `true` when this
    /// packet produced the session's configuration record.
    pub fn process(
        &mut self,
        packet: &mut EncodedPacket,
        supplied_description: Option<&[u8]>,
    ) -> FraktalResult<bool> {
        let params = self.strategy.convert(packet)?;
        self.packets += 1;

        if self.config.is_some() || !packet.key_frame {
            return Ok(false);
        }
        match self.strategy.extract_config(&params, supplied_description)? {
            Some(config) => {
                tracing::debug!(
                    codec = %config.codec,
                    codec_string = %config.codec_string,
                    description_len = config.description.as_ref().map_or(0, Vec::len),
                    "Codec configuration established"
                );
                self.config = Some(config);
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SPS: [u8; 5] = [0x67, 0x64, 0x00, 0x1F, 0xAC];
    const PPS: [u8; 3] = [0x68, 0xEE, 0x3C];

    fn annex_b(units: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        for unit in units {
            out.extend_from_slice(&[0, 0, 0, 1]);
            out.extend_from_slice(unit);
        }
        out
    }

    fn keyframe() -> EncodedPacket {
        EncodedPacket::new(annex_b(&[&SPS, &PPS, &[0x65, 0x88, 0x84]]), 0, 33_333, true)
    }

    fn delta_frame(ts: i64) -> EncodedPacket {
        EncodedPacket::new(annex_b(&[&[0x41, 0x9A, 0x02]]), ts, 33_333, false)
    }

    #[test]
    fn test_strategy_table() {
        assert_eq!(
            FormatStrategy::for_format(ContainerFormat::Mp4, VideoCodec::Avc).unwrap(),
            FormatStrategy::AvcMp4
        );
        assert_eq!(
            FormatStrategy::for_format(ContainerFormat::Webm, VideoCodec::Vp9).unwrap(),
            FormatStrategy::Vp9Webm
        );
        assert!(FormatStrategy::for_format(ContainerFormat::Webm, VideoCodec::Avc).is_err());
    }

    #[test]
    fn test_config_computed_once_from_keyframe() {
        let mut converter = BitstreamConverter::new(FormatStrategy::AvcMp4);

        let mut first = delta_frame(0);
        assert!(!converter.process(&mut first, None).unwrap());
        assert!(converter.config().is_none());

        let mut key = keyframe();
        assert!(converter.process(&mut key, None).unwrap());
        let config = converter.config().cloned().unwrap();
        assert_eq!(config.codec_string, "avc1.64001f");
        assert_eq!(
            config.description,
            Some(create_avcc_description(&SPS, &PPS).unwrap())
        );

        // A later keyframe with different parameter sets does not replace it.
        let mut other = EncodedPacket::new(
            annex_b(&[&[0x67, 0x42, 0xC0, 0x1E], &PPS, &[0x65, 0x01]]),
            66_667,
            33_333,
            true,
        );
        assert!(!converter.process(&mut other, None).unwrap());
        assert_eq!(converter.config(), Some(&config));
        assert_eq!(converter.packets(), 3);
    }

    #[test]
    fn test_avc_packet_is_length_prefixed() {
        let mut converter = BitstreamConverter::new(FormatStrategy::AvcMp4);
        let mut key = keyframe();
        converter.process(&mut key, None).unwrap();
        assert_eq!(&key.data[..4], &(SPS.len() as u32).to_be_bytes());
        assert_eq!(key.data.len(), SPS.len() + PPS.len() + 3 + 12);
    }

    #[test]
    fn test_supplied_description_used_without_parameter_sets() {
        let description = create_avcc_description(&SPS, &PPS).unwrap();
        let mut converter = BitstreamConverter::new(FormatStrategy::AvcMp4);
        let mut key = EncodedPacket::new(annex_b(&[&[0x65, 0x88]]), 0, 33_333, true);
        assert!(converter.process(&mut key, Some(&description)).unwrap());
        assert_eq!(
            converter.config().unwrap().description.as_deref(),
            Some(description.as_slice())
        );
    }

    #[test]
    fn test_hevc_drops_delimiters() {
        let mut packet = EncodedPacket::new(
            annex_b(&[&[0x46, 0x01, 0x10], &[0x02, 0x01, 0xD0, 0x08]]),
            0,
            33_333,
            false,
        );
        let params = FormatStrategy::HevcMp4.convert(&mut packet).unwrap();
        assert_eq!(params, ParameterSets::default());
        assert_eq!(packet.data, vec![0, 0, 0, 4, 0x02, 0x01, 0xD0, 0x08]);
    }

    #[test]
    fn test_vp9_config_has_no_description() {
        let mut converter = BitstreamConverter::new(FormatStrategy::Vp9Webm);
        let mut key = EncodedPacket::new(vec![0x82, 0x49, 0x83], 0, 33_333, true);
        assert!(converter.process(&mut key, None).unwrap());
        assert_eq!(key.data, vec![0x82, 0x49, 0x83]);
        assert!(converter.config().unwrap().description.is_none());
    }
}
