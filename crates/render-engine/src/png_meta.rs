//! PNG encoding with an embedded scene description.
//!
//! Still renders carry the JSON description of the scene that produced them
//! in a single `tEXt` chunk placed right before `IEND`, so an image can be
//! reopened with its exact parameters.

use std::io::Cursor;

use fraktal_common::error::{FraktalError, FraktalResult};
use fraktal_project_model::scene::SceneDescription;

/// `tEXt` keyword used for the scene JSON.
pub const SCENE_METADATA_KEYWORD: &str = "fraktal-scene";

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

const CRC_TABLE: [u32; 256] = crc_table();

const fn crc_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut n = 0;
    while n < 256 {
        let mut c = n as u32;
        let mut k = 0;
        while k < 8 {
            c = if c & 1 != 0 {
                0xEDB8_8320 ^ (c >> 1)
            } else {
                c >> 1
            };
            k += 1;
        }
        table[n] = c;
        n += 1;
    }
    table
}

/// CRC-32 (IEEE 802.3, reflected) as used by PNG chunks.
pub fn crc32(bytes: &[u8]) -> u32 {
    crc32_update(0xFFFF_FFFF, bytes) ^ 0xFFFF_FFFF
}

fn crc32_update(mut crc: u32, bytes: &[u8]) -> u32 {
    for &b in bytes {
        crc = CRC_TABLE[((crc ^ b as u32) & 0xFF) as usize] ^ (crc >> 8);
    }
    crc
}

/// Encode tightly packed top-down RGBA8 as PNG.
pub fn encode_png(rgba: &[u8], width: u32, height: u32) -> FraktalResult<Vec<u8>> {
    let image = image::RgbaImage::from_raw(width, height, rgba.to_vec()).ok_or_else(|| {
        FraktalError::render(format!(
            "RGBA buffer of {} bytes does not match {width}x{height}",
            rgba.len()
        ))
    })?;
    let mut png = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .map_err(|e| FraktalError::render(format!("PNG encoding failed: {e}")))?;
    Ok(png)
}

/// One chunk located inside a PNG byte stream.
#[derive(Debug, Clone, Copy)]
struct ChunkRef<'a> {
    /// Offset of the length field.
    start: usize,
    kind: [u8; 4],
    data: &'a [u8],
}

/// Iterate the chunks of a PNG, validating the signature and chunk bounds.
fn chunks(png: &[u8]) -> FraktalResult<Vec<ChunkRef<'_>>> {
    if png.len() < PNG_SIGNATURE.len() || png[..8] != PNG_SIGNATURE {
        return Err(FraktalError::render("not a PNG file (bad signature)"));
    }

    let mut out = Vec::new();
    let mut pos = PNG_SIGNATURE.len();
    while pos < png.len() {
        if pos + 8 > png.len() {
            return Err(FraktalError::render(format!(
                "truncated PNG chunk header at offset {pos}"
            )));
        }
        let len = u32::from_be_bytes([png[pos], png[pos + 1], png[pos + 2], png[pos + 3]]) as usize;
        let kind = [png[pos + 4], png[pos + 5], png[pos + 6], png[pos + 7]];
        let data_start = pos + 8;
        let end = data_start
            .checked_add(len)
            .and_then(|e| e.checked_add(4))
            .filter(|&e| e <= png.len())
            .ok_or_else(|| {
                FraktalError::render(format!(
                    "PNG chunk {} at offset {pos} overruns the file",
                    String::from_utf8_lossy(&kind)
                ))
            })?;
        out.push(ChunkRef {
            start: pos,
            kind,
            data: &png[data_start..data_start + len],
        });
        pos = end;
        if &kind == b"IEND" {
            break;
        }
    }
    Ok(out)
}

fn validate_keyword(keyword: &str) -> FraktalResult<()> {
    let ok = !keyword.is_empty()
        && keyword.len() <= 79
        && keyword.bytes().all(|b| (0x20..=0x7E).contains(&b))
        && !keyword.starts_with(' ')
        && !keyword.ends_with(' ');
    if ok {
        Ok(())
    } else {
        Err(FraktalError::render(format!(
            "invalid PNG text keyword '{keyword}'"
        )))
    }
}

/// Build a complete `tEXt` chunk (length, type, data, CRC).
pub fn text_chunk(keyword: &str, text: &str) -> FraktalResult<Vec<u8>> {
    validate_keyword(keyword)?;
    let mut data = Vec::with_capacity(keyword.len() + 1 + text.len());
    data.extend_from_slice(keyword.as_bytes());
    data.push(0);
    data.extend_from_slice(text.as_bytes());
    let len = u32::try_from(data.len())
        .map_err(|_| FraktalError::render("PNG text chunk exceeds 4 GiB"))?;

    let mut chunk = Vec::with_capacity(data.len() + 12);
    chunk.extend_from_slice(&len.to_be_bytes());
    chunk.extend_from_slice(b"tEXt");
    chunk.extend_from_slice(&data);
    let crc = crc32_update(crc32_update(0xFFFF_FFFF, b"tEXt"), &data) ^ 0xFFFF_FFFF;
    chunk.extend_from_slice(&crc.to_be_bytes());
    Ok(chunk)
}

/// Insert a `tEXt` chunk immediately before `IEND`.
pub fn embed_text_chunk(png: &[u8], keyword: &str, text: &str) -> FraktalResult<Vec<u8>> {
    let iend = chunks(png)?
        .into_iter()
        .find(|c| &c.kind == b"IEND")
        .ok_or_else(|| FraktalError::render("PNG has no IEND chunk"))?;
    let chunk = text_chunk(keyword, text)?;

    let mut out = Vec::with_capacity(png.len() + chunk.len());
    out.extend_from_slice(&png[..iend.start]);
    out.extend_from_slice(&chunk);
    out.extend_from_slice(&png[iend.start..]);
    Ok(out)
}

/// Text of the first `tEXt` chunk with `keyword`, if any.
pub fn extract_text_chunk(png: &[u8], keyword: &str) -> FraktalResult<Option<String>> {
    for chunk in chunks(png)? {
        if &chunk.kind != b"tEXt" {
            continue;
        }
        let Some(split) = chunk.data.iter().position(|&b| b == 0) else {
            continue;
        };
        if &chunk.data[..split] != keyword.as_bytes() {
            continue;
        }
        let text = String::from_utf8(chunk.data[split + 1..].to_vec())
            .map_err(|e| FraktalError::render(format!("PNG text is not UTF-8: {e}")))?;
        return Ok(Some(text));
    }
    Ok(None)
}

/// Attach a scene description to an encoded PNG.
pub fn embed_scene_description(png: &[u8], scene: &SceneDescription) -> FraktalResult<Vec<u8>> {
    embed_text_chunk(png, SCENE_METADATA_KEYWORD, &scene.to_json()?)
}

/// Read back the scene description of a still render.
pub fn extract_scene_description(png: &[u8]) -> FraktalResult<Option<SceneDescription>> {
    match extract_text_chunk(png, SCENE_METADATA_KEYWORD)? {
        Some(json) => Ok(Some(SceneDescription::from_json(&json)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fraktal_project_model::scene::SceneSnapshot;

    fn tiny_png() -> Vec<u8> {
        let rgba = [255, 0, 0, 255, 0, 255, 0, 255, 0, 0, 255, 255, 9, 9, 9, 255];
        encode_png(&rgba, 2, 2).unwrap()
    }

    #[test]
    fn test_crc32_check_value() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn test_iend_crc_matches_known_value() {
        assert_eq!(crc32(b"IEND"), 0xAE42_6082);
    }

    #[test]
    fn test_text_chunk_round_trip() {
        let png = tiny_png();
        let json = r#"{"formula":"mandelbrot","zoom":1e12,"label":"Tiefe ü"}"#;
        let tagged = embed_text_chunk(&png, SCENE_METADATA_KEYWORD, json).unwrap();
        assert_eq!(
            extract_text_chunk(&tagged, SCENE_METADATA_KEYWORD).unwrap().as_deref(),
            Some(json)
        );
        assert_eq!(extract_text_chunk(&tagged, "other").unwrap(), None);

        // Still a decodable image with the chunk right before IEND.
        let decoded = image::load_from_memory(&tagged).unwrap();
        assert_eq!(decoded.width(), 2);
        let kinds: Vec<[u8; 4]> = chunks(&tagged).unwrap().iter().map(|c| c.kind).collect();
        assert_eq!(&kinds[kinds.len() - 2], b"tEXt");
        assert_eq!(&kinds[kinds.len() - 1], b"IEND");
    }

    #[test]
    fn test_chunk_crc_covers_type_and_data() {
        let chunk = text_chunk("k", "v").unwrap();
        let crc = u32::from_be_bytes(chunk[chunk.len() - 4..].try_into().unwrap());
        assert_eq!(crc, crc32(&chunk[4..chunk.len() - 4]));
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(embed_text_chunk(b"not a png", "k", "v").is_err());
        assert!(text_chunk("", "v").is_err());
        assert!(text_chunk(&"k".repeat(80), "v").is_err());

        let mut truncated = tiny_png();
        truncated.truncate(truncated.len() - 6);
        assert!(embed_text_chunk(&truncated, "k", "v").is_err());
    }

    #[test]
    fn test_scene_description_round_trip() {
        let scene = SceneDescription::new("mandelbrot", &SceneSnapshot::default());
        let tagged = embed_scene_description(&tiny_png(), &scene).unwrap();
        assert_eq!(extract_scene_description(&tagged).unwrap(), Some(scene));
        assert_eq!(extract_scene_description(&tiny_png()).unwrap(), None);
    }
}
