//! Incremental IVF reader for VP9/AV1 encoder output.
//!
//! IVF is a 32-byte file header (`DKIF`) followed by frames, each with a
//! 12-byte little-endian header: 4-byte size and 8-byte timestamp.

use fraktal_common::{FraktalError, FraktalResult};

const FILE_HEADER_LEN: usize = 32;
const FRAME_HEADER_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfHeader {
    pub fourcc: [u8; 4],
    pub width: u16,
    pub height: u16,
    pub timebase_den: u32,
    pub timebase_num: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfFrame {
    pub pts: u64,
    pub data: Vec<u8>,
}

/// Accumulates bytes from a pipe and yields complete frames.
#[derive(Debug, Default)]
pub struct IvfReader {
    buffer: Vec<u8>,
    header: Option<IvfHeader>,
}

impl IvfReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn header(&self) -> Option<&IvfHeader> {
        self.header.as_ref()
    }

    /// Append bytes and return every frame completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> FraktalResult<Vec<IvfFrame>> {
        self.buffer.extend_from_slice(bytes);

        let mut offset = 0;
        if self.header.is_none() {
            if self.buffer.len() < FILE_HEADER_LEN {
                return Ok(Vec::new());
            }
            self.header = Some(parse_file_header(&self.buffer[..FILE_HEADER_LEN])?);
            offset = FILE_HEADER_LEN;
        }

        let mut frames = Vec::new();
        while self.buffer.len() - offset >= FRAME_HEADER_LEN {
            let head = &self.buffer[offset..offset + FRAME_HEADER_LEN];
            let size = u32::from_le_bytes([head[0], head[1], head[2], head[3]]) as usize;
            let pts = u64::from_le_bytes([
                head[4], head[5], head[6], head[7], head[8], head[9], head[10], head[11],
            ]);
            let start = offset + FRAME_HEADER_LEN;
            if self.buffer.len() - start < size {
                break;
            }
            frames.push(IvfFrame {
                pts,
                data: self.buffer[start..start + size].to_vec(),
            });
            offset = start + size;
        }

        self.buffer.drain(..offset);
        Ok(frames)
    }

    /// Bytes buffered but not yet part of a complete frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_file_header(head: &[u8]) -> FraktalResult<IvfHeader> {
    if &head[0..4] != b"DKIF" {
        return Err(FraktalError::bitstream("IVF stream missing DKIF signature"));
    }
    let header_len = u16::from_le_bytes([head[6], head[7]]) as usize;
    if header_len != FILE_HEADER_LEN {
        return Err(FraktalError::bitstream(format!(
            "unexpected IVF header length {header_len}"
        )));
    }
    Ok(IvfHeader {
        fourcc: [head[8], head[9], head[10], head[11]],
        width: u16::from_le_bytes([head[12], head[13]]),
        height: u16::from_le_bytes([head[14], head[15]]),
        timebase_den: u32::from_le_bytes([head[16], head[17], head[18], head[19]]),
        timebase_num: u32::from_le_bytes([head[20], head[21], head[22], head[23]]),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_header() -> Vec<u8> {
        let mut head = Vec::new();
        head.extend_from_slice(b"DKIF");
        head.extend_from_slice(&0u16.to_le_bytes());
        head.extend_from_slice(&32u16.to_le_bytes());
        head.extend_from_slice(b"VP90");
        head.extend_from_slice(&640u16.to_le_bytes());
        head.extend_from_slice(&360u16.to_le_bytes());
        head.extend_from_slice(&30u32.to_le_bytes());
        head.extend_from_slice(&1u32.to_le_bytes());
        head.extend_from_slice(&0u32.to_le_bytes());
        head.extend_from_slice(&0u32.to_le_bytes());
        head
    }

    fn frame(pts: u64, data: &[u8]) -> Vec<u8> {
        let mut out = (data.len() as u32).to_le_bytes().to_vec();
        out.extend_from_slice(&pts.to_le_bytes());
        out.extend_from_slice(data);
        out
    }

    #[test]
    fn test_frames_split_across_pushes() {
        let mut stream = file_header();
        stream.extend(frame(0, &[1, 2, 3]));
        stream.extend(frame(1, &[4, 5]));

        let mut reader = IvfReader::new();
        let first = reader.push(&stream[..40]).unwrap();
        assert!(first.is_empty());
        assert_eq!(reader.header().unwrap().width, 640);
        assert_eq!(&reader.header().unwrap().fourcc, b"VP90");

        let rest = reader.push(&stream[40..]).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0], IvfFrame { pts: 0, data: vec![1, 2, 3] });
        assert_eq!(rest[1].pts, 1);
        assert_eq!(reader.pending(), 0);
    }

    #[test]
    fn test_bad_signature() {
        let mut head = file_header();
        head[0] = b'X';
        assert!(IvfReader::new().push(&head).is_err());
    }
}
