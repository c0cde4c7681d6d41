//! Access-unit framing for Annex-B pipes.
//!
//! Encoders writing raw Annex-B to a pipe are configured to emit an access
//! unit delimiter before every picture, so a complete access unit is
//! everything from one AUD start code up to the next.

use crate::nal::{find_start_codes, NalSyntax};

#[derive(Debug)]
pub struct AccessUnitSplitter {
    syntax: NalSyntax,
    buffer: Vec<u8>,
}

impl AccessUnitSplitter {
    pub fn new(syntax: NalSyntax) -> Self {
        Self {
            syntax,
            buffer: Vec::new(),
        }
    }

    /// Append bytes and return every access unit completed by them.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(bytes);

        let aud = self.syntax.aud_type();
        let boundaries: Vec<usize> = find_start_codes(&self.buffer)
            .into_iter()
            .filter(|code| {
                self.buffer
                    .get(code.payload_start)
                    .is_some_and(|&header| self.syntax.nal_type(header) == aud)
            })
            .map(|code| code.code_start)
            .filter(|&start| start > 0)
            .collect();

        let mut units = Vec::with_capacity(boundaries.len());
        let mut last = 0;
        for boundary in boundaries {
            units.push(self.buffer[last..boundary].to_vec());
            last = boundary;
        }
        self.buffer.drain(..last);
        units
    }

    /// Flush the trailing access unit at end of stream.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        if self.buffer.iter().all(|&b| b == 0) {
            self.buffer.clear();
            return None;
        }
        Some(std::mem::take(&mut self.buffer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUD: [u8; 6] = [0, 0, 0, 1, 0x09, 0xF0];

    fn access_unit(slice: u8) -> Vec<u8> {
        let mut out = AUD.to_vec();
        out.extend_from_slice(&[0, 0, 0, 1, slice, 0x88, 0x80]);
        out
    }

    #[test]
    fn test_split_on_delimiters() {
        let mut stream = access_unit(0x65);
        stream.extend(access_unit(0x41));
        stream.extend(access_unit(0x41));

        let mut splitter = AccessUnitSplitter::new(NalSyntax::H264);
        let units = splitter.push(&stream);
        assert_eq!(units.len(), 2);
        assert_eq!(units[0], access_unit(0x65));
        assert_eq!(splitter.finish(), Some(access_unit(0x41)));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn test_delimiter_split_across_pushes() {
        let mut stream = access_unit(0x65);
        stream.extend(access_unit(0x41));
        let cut = access_unit(0x65).len() + 2;

        let mut splitter = AccessUnitSplitter::new(NalSyntax::H264);
        assert!(splitter.push(&stream[..cut]).is_empty());
        let units = splitter.push(&stream[cut..]);
        assert_eq!(units, vec![access_unit(0x65)]);
    }

    #[test]
    fn test_hevc_delimiter() {
        let au = |slice: u8| {
            let mut out = vec![0, 0, 0, 1, 0x46, 0x01, 0x10];
            out.extend_from_slice(&[0, 0, 0, 1, slice, 0x01, 0xAF]);
            out
        };
        let mut stream = au(0x26);
        stream.extend(au(0x02));

        let mut splitter = AccessUnitSplitter::new(NalSyntax::H265);
        assert_eq!(splitter.push(&stream), vec![au(0x26)]);
    }
}
